//! Universal invariants over the pure scheduler (C4), checked against
//! randomly generated snapshots the way `scheduler.rs`'s own unit
//! tests check specific ones.

use proptest::prelude::*;
use termcoder::domain::{Task, TaskKind, TaskStatus};
use termcoder::phase::{Phase, PhaseStatus};
use termcoder::repository::Snapshot;
use termcoder::scheduler::{self, Decision, EngineState};

fn arb_task_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::Running),
        Just(TaskStatus::Completed),
        Just(TaskStatus::Failed),
        Just(TaskStatus::Paused),
        Just(TaskStatus::Skipped),
    ]
}

fn arb_task_kind() -> impl Strategy<Value = TaskKind> {
    prop_oneof![Just(TaskKind::Coding), Just(TaskKind::Review)]
}

/// A single phase with 1-4 tasks, independently random kind/status, and
/// a chain of sequential dependencies (task N depends on N-1) so some
/// snapshots have unmet dependencies and some don't.
fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
    prop::collection::vec((arb_task_kind(), arb_task_status()), 1..5).prop_map(|specs| {
        let phase = Phase::new("p1".into(), "proj".into(), 1, "Phase 1".into(), "".into());
        let tasks: Vec<Task> = specs
            .into_iter()
            .enumerate()
            .map(|(i, (kind, status))| {
                let mut t = Task::new(format!("t{i}"), "p1".into(), i as u32 + 1, kind, format!("t{i}"), None);
                t.status = status;
                t
            })
            .collect();
        let deps = (1..tasks.len()).map(|i| (tasks[i].id.clone(), tasks[i - 1].id.clone())).collect();
        Snapshot { phases: vec![phase], tasks, deps }
    })
}

fn arb_engine_state() -> impl Strategy<Value = EngineState> {
    (any::<bool>(), any::<bool>(), any::<bool>())
        .prop_map(|(pane0, pane1, paused)| EngineState::new(pane0, pane1, paused))
}

proptest! {
    /// The scheduler never dispatches coding work while paused.
    #[test]
    fn never_dispatches_coding_while_paused(snapshot in arb_snapshot()) {
        let engine = EngineState::new(false, false, true);
        let decision = scheduler::schedule(&snapshot, &engine);
        prop_assert!(!matches!(decision, Decision::DispatchCoding(_)));
    }

    /// The scheduler never dispatches onto a pane it was told is busy.
    #[test]
    fn never_dispatches_onto_a_busy_pane(snapshot in arb_snapshot(), paused in any::<bool>()) {
        let engine = EngineState::new(true, true, paused);
        let decision = scheduler::schedule(&snapshot, &engine);
        prop_assert!(!matches!(decision, Decision::DispatchCoding(_) | Decision::DispatchReview(_)));
    }

    /// Whatever is dispatched is always `pending` in the snapshot, and
    /// all of its dependencies are completed or skipped.
    #[test]
    fn dispatched_task_is_pending_with_satisfied_dependencies(
        snapshot in arb_snapshot(),
        engine in arb_engine_state(),
    ) {
        let decision = scheduler::schedule(&snapshot, &engine);
        if let Decision::DispatchCoding(id) | Decision::DispatchReview(id) = decision {
            let task = snapshot.tasks.iter().find(|t| t.id == id).unwrap();
            prop_assert_eq!(task.status, TaskStatus::Pending);
            for dep in snapshot.dependencies_of(&id) {
                let dep_status = snapshot.task_status(dep).unwrap();
                prop_assert!(matches!(dep_status, TaskStatus::Completed | TaskStatus::Skipped));
            }
        }
    }

    /// `schedule` is a pure function of its inputs: calling it twice on
    /// the same snapshot and engine state gives the same decision.
    #[test]
    fn schedule_is_deterministic(snapshot in arb_snapshot(), engine in arb_engine_state()) {
        let first = scheduler::schedule(&snapshot, &engine);
        let second = scheduler::schedule(&snapshot, &engine);
        prop_assert_eq!(first, second);
    }

    /// When every task is completed or skipped, the project is done
    /// regardless of pane occupancy or pause state.
    #[test]
    fn all_tasks_finished_is_always_complete(
        count in 1usize..5,
        paused in any::<bool>(),
    ) {
        let phase = Phase::new("p1".into(), "proj".into(), 1, "Phase 1".into(), "".into());
        let tasks: Vec<Task> = (0..count)
            .map(|i| {
                let mut t = Task::new(format!("t{i}"), "p1".into(), i as u32 + 1, TaskKind::Coding, format!("t{i}"), None);
                t.status = if i % 2 == 0 { TaskStatus::Completed } else { TaskStatus::Skipped };
                t
            })
            .collect();
        let snapshot = Snapshot { phases: vec![phase], tasks, deps: vec![] };
        let engine = EngineState::new(false, false, paused);
        prop_assert_eq!(scheduler::schedule(&snapshot, &engine), Decision::Complete);
    }

    /// A phase that still has `Completed`-satisfying tasks but a
    /// non-terminal phase status never yields `Complete` while any
    /// task is still pending/running/failed/paused.
    #[test]
    fn unfinished_tasks_never_yield_complete(snapshot in arb_snapshot()) {
        let has_unfinished = snapshot
            .tasks
            .iter()
            .any(|t| !matches!(t.status, TaskStatus::Completed | TaskStatus::Skipped));
        if has_unfinished {
            let engine = EngineState::new(false, false, false);
            let decision = scheduler::schedule(&snapshot, &engine);
            prop_assert!(!matches!(decision, Decision::Complete));
        }
    }
}

/// A phase left in a non-terminal derived status never lets a later
/// phase's tasks get dispatched, no matter how runnable they look.
#[test]
fn second_phase_is_gated_until_first_phase_finishes() {
    let p1 = {
        let mut p = Phase::new("p1".into(), "proj".into(), 1, "Phase 1".into(), "".into());
        p.status = PhaseStatus::Running;
        p
    };
    let p2 = Phase::new("p2".into(), "proj".into(), 2, "Phase 2".into(), "".into());
    let a = {
        let mut t = Task::new("a".into(), "p1".into(), 1, TaskKind::Coding, "A".into(), None);
        t.status = TaskStatus::Running;
        t
    };
    let c = Task::new("c".into(), "p2".into(), 1, TaskKind::Coding, "C".into(), None);
    let snapshot = Snapshot { phases: vec![p1, p2], tasks: vec![a, c], deps: vec![] };
    let engine = EngineState::new(true, false, false);
    assert_eq!(scheduler::schedule(&snapshot, &engine), Decision::Idle);
}
