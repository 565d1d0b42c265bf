//! Retry policy (C5): a pure decision on what to do with a task that
//! just failed. Like the scheduler, this takes no I/O — the engine
//! applies the `RetryDecision` by calling repository methods.

use crate::domain::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Increment retry_count and return the task to pending so the
    /// scheduler picks it up again.
    Retry { new_retry_count: u8 },
    /// Persistent failure: pause the task and raise the engine's
    /// paused flag so no further coding dispatch happens until resume
    /// or manual reset.
    Pause,
}

/// Decide what happens to a task that just failed, given its
/// retry_count *before* this failure and the configured max retries
/// (`TC_MAX_RETRIES`, default 1).
pub fn decide(retry_count: u8, max_retries: u8) -> RetryDecision {
    if retry_count < max_retries {
        RetryDecision::Retry {
            new_retry_count: retry_count + 1,
        }
    } else {
        RetryDecision::Pause
    }
}

/// The task status a `RetryDecision` resolves to, for callers that
/// just want the next status without re-deriving it.
pub fn resulting_status(decision: &RetryDecision) -> TaskStatus {
    match decision {
        RetryDecision::Retry { .. } => TaskStatus::Pending,
        RetryDecision::Pause => TaskStatus::Paused,
    }
}
