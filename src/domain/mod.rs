//! Frozen value records for the five persistent entities plus the
//! append-only event log.
//!
//! Every entity here is a plain immutable record. Mutation is expressed
//! as construction of a new value: write paths live on the repository
//! and take an id plus field deltas, never a whole mutated record, so a
//! stale in-memory copy can never silently overwrite newer state.

mod event;
mod project;
mod session;
mod task;

pub use event::{Event, EventKind, EventSubject};
pub use project::{Project, ProjectStatus};
pub use session::{Pane, Session, SessionStatus};
pub use task::{Task, TaskKind, TaskStatus};

/// Re-exported so callers can refer to `domain::PhaseStatus` alongside
/// the other entity statuses even though the type itself lives in
/// [`crate::phase`] (it is shared with the scheduler's phase-derivation
/// logic).
pub use crate::phase::{Phase, PhaseStatus};
