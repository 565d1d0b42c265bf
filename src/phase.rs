//! Phase entity and the derivation rule that keeps its status in sync
//! with the tasks it owns.
//!
//! A phase's status is never written directly by a caller — it is
//! always recomputed from its tasks (§3 "A phase's status is
//! derived"). [`Phase::derive_status`] is that computation; the
//! repository calls it after every task-status write and persists the
//! result.

use serde::{Deserialize, Serialize};

use crate::domain::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub project_id: String,
    pub sequence: u32,
    pub name: String,
    pub description: String,
    pub status: PhaseStatus,
}

impl PartialEq for Phase {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Phase {
    /// Construct a phase in its initial `pending` state.
    ///
    /// Panics if `sequence` is zero — sequences are 1-based per the
    /// data model, and a caller passing zero has a bug worth catching
    /// immediately rather than silently misordering phases.
    pub fn new(
        id: String,
        project_id: String,
        sequence: u32,
        name: String,
        description: String,
    ) -> Self {
        assert!(sequence >= 1, "phase sequence must be >= 1, got {sequence}");
        Self {
            id,
            project_id,
            sequence,
            name,
            description,
            status: PhaseStatus::Pending,
        }
    }

    /// Recompute a phase's status from the statuses of its tasks, per
    /// the data-model derivation rule in spec §3:
    ///
    /// completed iff all tasks are completed or skipped; failed iff any
    /// task is failed and none is pending/running; otherwise running if
    /// any task is running, else pending.
    ///
    /// A phase with no tasks yet is pending.
    pub fn derive_status(task_statuses: &[TaskStatus]) -> PhaseStatus {
        if task_statuses.is_empty() {
            return PhaseStatus::Pending;
        }
        let all_done = task_statuses
            .iter()
            .all(|s| matches!(s, TaskStatus::Completed | TaskStatus::Skipped));
        if all_done {
            return PhaseStatus::Completed;
        }
        let any_pending_or_running = task_statuses
            .iter()
            .any(|s| matches!(s, TaskStatus::Pending | TaskStatus::Running));
        let any_failed = task_statuses.iter().any(|s| *s == TaskStatus::Failed);
        if any_failed && !any_pending_or_running {
            return PhaseStatus::Failed;
        }
        if task_statuses.iter().any(|s| *s == TaskStatus::Running) {
            return PhaseStatus::Running;
        }
        PhaseStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_phase_is_pending() {
        assert_eq!(Phase::derive_status(&[]), PhaseStatus::Pending);
    }

    #[test]
    fn all_completed_or_skipped_is_completed() {
        let statuses = [TaskStatus::Completed, TaskStatus::Skipped, TaskStatus::Completed];
        assert_eq!(Phase::derive_status(&statuses), PhaseStatus::Completed);
    }

    #[test]
    fn failed_with_no_pending_or_running_is_failed() {
        let statuses = [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Skipped];
        assert_eq!(Phase::derive_status(&statuses), PhaseStatus::Failed);
    }

    #[test]
    fn failed_but_others_still_pending_is_not_failed_yet() {
        let statuses = [TaskStatus::Failed, TaskStatus::Pending];
        assert_eq!(Phase::derive_status(&statuses), PhaseStatus::Pending);
    }

    #[test]
    fn any_running_is_running() {
        let statuses = [TaskStatus::Completed, TaskStatus::Running];
        assert_eq!(Phase::derive_status(&statuses), PhaseStatus::Running);
    }

    #[test]
    fn paused_tasks_keep_phase_pending_until_resolved() {
        let statuses = [TaskStatus::Paused, TaskStatus::Completed];
        assert_eq!(Phase::derive_status(&statuses), PhaseStatus::Pending);
    }

    #[test]
    #[should_panic(expected = "sequence must be >= 1")]
    fn zero_sequence_panics() {
        Phase::new("p".into(), "proj".into(), 0, "n".into(), "d".into());
    }
}
