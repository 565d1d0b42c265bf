//! The single pure predicate governing legal status transitions for
//! tasks, sessions, and phases (§4.2). Nothing here touches the store;
//! it exists so the repository can reject an illegal transition inside
//! a write transaction before it is ever persisted.

use crate::domain::{SessionStatus, TaskStatus};
use crate::phase::PhaseStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Task,
    Session,
    Phase,
}

/// Whether `from -> to` is a legal transition for the given entity.
/// `from == to` is never legal — a transition is a change of state, and
/// callers that want a no-op write have a bug worth catching here.
pub fn valid_transition(entity: EntityKind, from: &str, to: &str) -> bool {
    if from == to {
        return false;
    }
    match entity {
        EntityKind::Task => valid_task_transition(from, to),
        EntityKind::Session => valid_session_transition(from, to),
        EntityKind::Phase => valid_phase_transition(from, to),
    }
}

fn valid_task_transition(from: &str, to: &str) -> bool {
    let (Some(from), Some(to)) = (TaskStatus::from_str(from), TaskStatus::from_str(to)) else {
        return false;
    };
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Pending, Skipped)
            | (Running, Completed)
            | (Running, Failed)
            | (Failed, Running)
            | (Failed, Paused)
            | (Failed, Pending)
            | (Paused, Running)
            | (Paused, Pending)
    )
}

fn valid_session_transition(from: &str, to: &str) -> bool {
    let (Some(from), Some(to)) = (SessionStatus::from_str(from), SessionStatus::from_str(to))
    else {
        return false;
    };
    use SessionStatus::*;
    matches!((from, to), (Running, Completed) | (Running, Failed) | (Running, Killed))
}

fn valid_phase_transition(from: &str, to: &str) -> bool {
    let (Some(from), Some(to)) = (PhaseStatus::from_str(from), PhaseStatus::from_str(to)) else {
        return false;
    };
    use PhaseStatus::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Failed, Pending)
            | (Completed, Pending)
    )
}

/// Raised when code attempts an illegal transition. This is a
/// programmer error per §4.2 ("never user-visible except via an
/// engine-error event") — callers surface it as an `Infrastructure` or
/// `Precondition` error depending on who initiated the write.
#[derive(Debug, thiserror::Error)]
#[error("invalid {entity:?} transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub entity: EntityKind,
    pub from: String,
    pub to: String,
}

pub fn require_valid_transition(
    entity: EntityKind,
    from: &str,
    to: &str,
) -> Result<(), InvalidTransition> {
    if valid_transition(entity, from, to) {
        Ok(())
    } else {
        Err(InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_pending_to_running_is_legal() {
        assert!(valid_transition(EntityKind::Task, "pending", "running"));
    }

    #[test]
    fn task_completed_is_terminal() {
        assert!(!valid_transition(EntityKind::Task, "completed", "pending"));
        assert!(!valid_transition(EntityKind::Task, "completed", "running"));
    }

    #[test]
    fn task_skipped_is_terminal() {
        assert!(!valid_transition(EntityKind::Task, "skipped", "pending"));
    }

    #[test]
    fn task_failed_can_retry_pause_or_reset() {
        assert!(valid_transition(EntityKind::Task, "failed", "running"));
        assert!(valid_transition(EntityKind::Task, "failed", "paused"));
        assert!(valid_transition(EntityKind::Task, "failed", "pending"));
    }

    #[test]
    fn task_paused_can_retry_or_reset() {
        assert!(valid_transition(EntityKind::Task, "paused", "running"));
        assert!(valid_transition(EntityKind::Task, "paused", "pending"));
        assert!(!valid_transition(EntityKind::Task, "paused", "failed"));
    }

    #[test]
    fn session_running_terminates_three_ways() {
        assert!(valid_transition(EntityKind::Session, "running", "completed"));
        assert!(valid_transition(EntityKind::Session, "running", "failed"));
        assert!(valid_transition(EntityKind::Session, "running", "killed"));
    }

    #[test]
    fn session_terminal_states_reject_everything() {
        assert!(!valid_transition(EntityKind::Session, "completed", "running"));
        assert!(!valid_transition(EntityKind::Session, "failed", "running"));
        assert!(!valid_transition(EntityKind::Session, "killed", "running"));
    }

    #[test]
    fn phase_follows_its_own_table() {
        assert!(valid_transition(EntityKind::Phase, "pending", "running"));
        assert!(valid_transition(EntityKind::Phase, "running", "completed"));
        assert!(valid_transition(EntityKind::Phase, "running", "failed"));
        assert!(valid_transition(EntityKind::Phase, "failed", "pending"));
        assert!(valid_transition(EntityKind::Phase, "completed", "pending"));
        assert!(!valid_transition(EntityKind::Phase, "pending", "completed"));
    }

    #[test]
    fn identity_transition_is_always_rejected() {
        assert!(!valid_transition(EntityKind::Task, "pending", "pending"));
        assert!(!valid_transition(EntityKind::Session, "running", "running"));
        assert!(!valid_transition(EntityKind::Phase, "running", "running"));
    }

    #[test]
    fn unknown_status_strings_are_rejected() {
        assert!(!valid_transition(EntityKind::Task, "pending", "bogus"));
    }

    #[test]
    fn require_valid_transition_reports_the_offending_pair() {
        let err = require_valid_transition(EntityKind::Task, "completed", "running").unwrap_err();
        assert_eq!(err.from, "completed");
        assert_eq!(err.to, "running");
    }
}
