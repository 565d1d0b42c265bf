//! The pure scheduler function (C4): `schedule(snapshot, engine_state)
//! -> Decision`. This and the state machine are the two places the
//! design notes call "a hard architectural line" — no I/O, a function
//! of its inputs only, so every test fixture is an in-memory snapshot.

use tracing::instrument;

use crate::domain::{Task, TaskStatus};
use crate::phase::PhaseStatus;
use crate::repository::Snapshot;

/// The small slice of engine state the scheduler needs beyond the
/// snapshot: which panes are currently occupied by a live session, and
/// whether dispatch is paused.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub pane0_busy: bool,
    pub pane1_busy: bool,
    pub paused: bool,
}

impl EngineState {
    pub fn new(pane0_busy: bool, pane1_busy: bool, paused: bool) -> Self {
        Self { pane0_busy, pane1_busy, paused }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BlockedTask {
    pub task_id: String,
    pub unmet_dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    DispatchCoding(String),
    DispatchReview(String),
    Idle,
    Complete,
    Deadlock(Vec<BlockedTask>),
}

fn is_runnable(snapshot: &Snapshot, task: &Task) -> bool {
    task.status == TaskStatus::Pending
        && snapshot
            .dependencies_of(&task.id)
            .all(|dep| snapshot.task_status(dep).map(|s| s.satisfies_dependency()).unwrap_or(false))
}

/// Decide what the engine should do next, given a consistent snapshot
/// and the current engine view. Selection rules follow §4.4 in order.
#[instrument(skip(snapshot, engine), fields(pane0_busy = engine.pane0_busy, pane1_busy = engine.pane1_busy, paused = engine.paused), level = "debug", ret)]
pub fn schedule(snapshot: &Snapshot, engine: &EngineState) -> Decision {
    let mut ordered_phases: Vec<_> = snapshot.phases.iter().collect();
    ordered_phases.sort_by_key(|p| p.sequence);

    // Rule 2: find the earliest not-finished phase.
    let current_phase_id = ordered_phases
        .iter()
        .find(|p| !matches!(p.status, PhaseStatus::Completed | PhaseStatus::Skipped))
        .map(|p| p.id.as_str());

    let Some(phase_id) = current_phase_id else {
        return Decision::Complete;
    };

    let mut in_phase: Vec<&Task> = snapshot.tasks.iter().filter(|t| t.phase_id == phase_id).collect();
    in_phase.sort_by_key(|t| t.sequence);

    // Rule 1: a runnable review takes priority over coding whenever
    // pane 1 is free, so review can proceed alongside the next coding
    // task rather than queue behind it.
    if !engine.pane1_busy {
        if let Some(review) = in_phase.iter().find(|t| t.is_review() && is_runnable(snapshot, t)) {
            return Decision::DispatchReview(review.id.clone());
        }
    }

    // Rule 3 + 4: the earliest runnable coding task, never while paused.
    if !engine.paused && !engine.pane0_busy {
        if let Some(coding) = in_phase.iter().find(|t| t.is_coding() && is_runnable(snapshot, t)) {
            return Decision::DispatchCoding(coding.id.clone());
        }
    }

    any_active_session_decision(snapshot, engine)
}

fn any_active_session_decision(snapshot: &Snapshot, engine: &EngineState) -> Decision {
    if engine.pane0_busy || engine.pane1_busy {
        return Decision::Idle;
    }
    // A pause suppresses coding dispatch deliberately; that is never a
    // deadlock, just a hold an operator lifts with `resume`.
    if engine.paused {
        return Decision::Idle;
    }
    let unfinished: Vec<&Task> = snapshot
        .tasks
        .iter()
        .filter(|t| !matches!(t.status, TaskStatus::Completed | TaskStatus::Skipped))
        .collect();
    if unfinished.is_empty() {
        return Decision::Complete;
    }

    let blocked = unfinished
        .into_iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .map(|t| {
            let unmet: Vec<String> = snapshot
                .dependencies_of(&t.id)
                .filter(|dep| {
                    !snapshot
                        .task_status(dep)
                        .map(|s| s.satisfies_dependency())
                        .unwrap_or(false)
                })
                .map(|s| s.to_string())
                .collect();
            BlockedTask { task_id: t.id.clone(), unmet_dependencies: unmet }
        })
        .collect::<Vec<_>>();

    Decision::Deadlock(blocked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskKind;
    use crate::phase::Phase;

    fn phase(id: &str, seq: u32, status: PhaseStatus) -> Phase {
        let mut p = Phase::new(id.into(), "proj".into(), seq, id.into(), "".into());
        p.status = status;
        p
    }

    fn task(id: &str, phase_id: &str, seq: u32, kind: TaskKind, status: TaskStatus) -> Task {
        let mut t = Task::new(id.into(), phase_id.into(), seq, kind, id.into(), None);
        t.status = status;
        t
    }

    #[test]
    fn dispatches_the_earliest_runnable_coding_task() {
        let snapshot = Snapshot {
            phases: vec![phase("p1", 1, PhaseStatus::Pending)],
            tasks: vec![
                task("a", "p1", 1, TaskKind::Coding, TaskStatus::Pending),
                task("b", "p1", 2, TaskKind::Coding, TaskStatus::Pending),
            ],
            deps: vec![],
        };
        let decision = schedule(&snapshot, &EngineState::default());
        assert_eq!(decision, Decision::DispatchCoding("a".into()));
    }

    #[test]
    fn respects_unmet_dependencies() {
        let snapshot = Snapshot {
            phases: vec![phase("p1", 1, PhaseStatus::Pending)],
            tasks: vec![
                task("a", "p1", 1, TaskKind::Coding, TaskStatus::Pending),
                task("b", "p1", 2, TaskKind::Coding, TaskStatus::Pending),
            ],
            deps: vec![("b".into(), "a".into())],
        };
        let decision = schedule(&snapshot, &EngineState::default());
        assert_eq!(decision, Decision::DispatchCoding("a".into()));
    }

    #[test]
    fn skipped_dependency_satisfies_like_completed() {
        let snapshot = Snapshot {
            phases: vec![phase("p1", 1, PhaseStatus::Pending)],
            tasks: vec![
                task("a", "p1", 1, TaskKind::Coding, TaskStatus::Skipped),
                task("b", "p1", 2, TaskKind::Coding, TaskStatus::Pending),
            ],
            deps: vec![("b".into(), "a".into())],
        };
        let decision = schedule(&snapshot, &EngineState::default());
        assert_eq!(decision, Decision::DispatchCoding("b".into()));
    }

    #[test]
    fn review_has_priority_when_pane1_is_free() {
        let snapshot = Snapshot {
            phases: vec![phase("p1", 1, PhaseStatus::Pending)],
            tasks: vec![
                task("r1", "p1", 1, TaskKind::Review, TaskStatus::Pending),
                task("a", "p1", 2, TaskKind::Coding, TaskStatus::Pending),
            ],
            deps: vec![],
        };
        let decision = schedule(&snapshot, &EngineState::default());
        assert_eq!(decision, Decision::DispatchReview("r1".into()));
    }

    #[test]
    fn coding_proceeds_when_review_is_queued_but_pane1_is_busy() {
        let engine = EngineState::new(false, true, false);
        let snapshot = Snapshot {
            phases: vec![phase("p1", 1, PhaseStatus::Pending)],
            tasks: vec![
                task("r1", "p1", 1, TaskKind::Review, TaskStatus::Pending),
                task("a", "p1", 2, TaskKind::Coding, TaskStatus::Pending),
            ],
            deps: vec![],
        };
        assert_eq!(schedule(&snapshot, &engine), Decision::DispatchCoding("a".into()));
    }

    #[test]
    fn paused_never_dispatches_coding() {
        let engine = EngineState::new(false, false, true);
        let snapshot = Snapshot {
            phases: vec![phase("p1", 1, PhaseStatus::Pending)],
            tasks: vec![task("a", "p1", 1, TaskKind::Coding, TaskStatus::Pending)],
            deps: vec![],
        };
        assert_eq!(schedule(&snapshot, &engine), Decision::Idle);
    }

    #[test]
    fn all_completed_or_skipped_is_complete() {
        let snapshot = Snapshot {
            phases: vec![phase("p1", 1, PhaseStatus::Completed)],
            tasks: vec![task("a", "p1", 1, TaskKind::Coding, TaskStatus::Completed)],
            deps: vec![],
        };
        assert_eq!(schedule(&snapshot, &EngineState::default()), Decision::Complete);
    }

    #[test]
    fn no_runnable_task_and_no_active_session_is_deadlock() {
        let snapshot = Snapshot {
            phases: vec![phase("p1", 1, PhaseStatus::Pending)],
            tasks: vec![task("a", "p1", 1, TaskKind::Coding, TaskStatus::Pending)],
            deps: vec![("a".into(), "a".into())],
        };
        match schedule(&snapshot, &EngineState::default()) {
            Decision::Deadlock(blocked) => {
                assert_eq!(blocked.len(), 1);
                assert_eq!(blocked[0].task_id, "a");
                assert_eq!(blocked[0].unmet_dependencies, vec!["a".to_string()]);
            }
            other => panic!("expected Deadlock, got {other:?}"),
        }
    }

    #[test]
    fn stays_idle_while_a_session_is_active_even_if_nothing_is_runnable() {
        let engine = EngineState::new(true, false, false);
        let snapshot = Snapshot {
            phases: vec![phase("p1", 1, PhaseStatus::Pending)],
            tasks: vec![task("a", "p1", 1, TaskKind::Coding, TaskStatus::Running)],
            deps: vec![],
        };
        assert_eq!(schedule(&snapshot, &engine), Decision::Idle);
    }

    #[test]
    fn second_phase_is_gated_until_first_completes() {
        let snapshot = Snapshot {
            phases: vec![
                phase("p1", 1, PhaseStatus::Running),
                phase("p2", 2, PhaseStatus::Pending),
            ],
            tasks: vec![
                task("a", "p1", 1, TaskKind::Coding, TaskStatus::Running),
                task("c", "p2", 1, TaskKind::Coding, TaskStatus::Pending),
            ],
            deps: vec![],
        };
        let engine = EngineState::new(true, false, false);
        assert_eq!(schedule(&snapshot, &engine), Decision::Idle);
    }
}
