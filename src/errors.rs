//! Typed error hierarchy for the orchestrator.
//!
//! `TcError` covers the five kinds the design calls out (§7): errors
//! are tagged by kind, never by text, so callers can match on them
//! instead of scraping a message. Ambient glue code (CLI plumbing,
//! file I/O during `init`) uses `anyhow::Result` with `.context(...)`
//! instead of growing this enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TcError {
    #[error("{message}")]
    Validation { message: String },

    #[error("precondition violated for {subject}: {message}")]
    Precondition { subject: String, message: String },

    #[error("task {task_id} failed: {message}")]
    TaskFailure { task_id: String, message: String },

    #[error("deadlock: {reason}")]
    Deadlock { reason: String },

    #[error("infrastructure failure: {0}")]
    Infrastructure(#[source] anyhow::Error),
}

impl TcError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Precondition { .. } => "precondition",
            Self::TaskFailure { .. } => "task_failure",
            Self::Deadlock { .. } => "deadlock",
            Self::Infrastructure(_) => "infrastructure",
        }
    }

    /// The task/session/phase id this error points at, if any, for the
    /// "short line + stable error kind + optional subject pointer"
    /// rendering contract in §7.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::Precondition { subject, .. } => Some(subject),
            Self::TaskFailure { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    /// Render the user-visible line: kind, message, and subject pointer
    /// if present.
    pub fn render(&self) -> String {
        match self.subject() {
            Some(subject) => format!("[{}] {} (subject: {})", self.kind(), self, subject),
            None => format!("[{}] {}", self.kind(), self),
        }
    }
}

impl From<crate::state_machine::InvalidTransition> for TcError {
    fn from(e: crate::state_machine::InvalidTransition) -> Self {
        TcError::Precondition {
            subject: format!("{:?}", e.entity),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_has_no_subject() {
        let err = TcError::Validation {
            message: "bad PRD".into(),
        };
        assert_eq!(err.kind(), "validation");
        assert!(err.subject().is_none());
    }

    #[test]
    fn precondition_error_carries_subject() {
        let err = TcError::Precondition {
            subject: "task-1".into(),
            message: "task is not running".into(),
        };
        assert_eq!(err.kind(), "precondition");
        assert_eq!(err.subject(), Some("task-1"));
    }

    #[test]
    fn render_includes_kind_and_subject() {
        let err = TcError::TaskFailure {
            task_id: "task-7".into(),
            message: "exit 1".into(),
        };
        let rendered = err.render();
        assert!(rendered.contains("task_failure"));
        assert!(rendered.contains("task-7"));
    }

    #[test]
    fn invalid_transition_converts_to_precondition() {
        use crate::state_machine::{EntityKind, InvalidTransition};
        let transition = InvalidTransition {
            entity: EntityKind::Task,
            from: "completed".into(),
            to: "running".into(),
        };
        let err: TcError = transition.into();
        assert_eq!(err.kind(), "precondition");
    }
}
