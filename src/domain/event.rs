use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StatusChange,
    Progress,
    Error,
    ReviewVerdict,
    HumanInputRequest,
    EngineTick,
    /// Synthesized by the bus (not the store) when a subscriber falls
    /// behind and the oldest undelivered event for it is dropped.
    Overflow,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusChange => "status_change",
            Self::Progress => "progress",
            Self::Error => "error",
            Self::ReviewVerdict => "review_verdict",
            Self::HumanInputRequest => "human_input_request",
            Self::EngineTick => "engine_tick",
            Self::Overflow => "overflow",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "status_change" => Self::StatusChange,
            "progress" => Self::Progress,
            "error" => Self::Error,
            "review_verdict" => Self::ReviewVerdict,
            "human_input_request" => Self::HumanInputRequest,
            "engine_tick" => Self::EngineTick,
            "overflow" => Self::Overflow,
            _ => return None,
        })
    }
}

/// What an event is about. At most one of these is set; `None` is used
/// for project-wide events such as ticks or overflow notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSubject {
    Task(String),
    Session(uuid::Uuid),
    Phase(String),
    None,
}

/// Append-only log entry. Never mutated after insertion; the `id` is
/// assigned by the repository on insert to guarantee a monotonic order
/// independent of wall-clock resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub kind: EventKind,
    pub subject: EventSubject,
    pub payload: serde_json::Value,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Event {
    /// Construct an event with `id` left unassigned (0); the repository
    /// overwrites it with the row id on insert.
    pub fn new(kind: EventKind, subject: EventSubject, payload: serde_json::Value) -> Self {
        Self {
            id: 0,
            created_at: chrono::Utc::now(),
            kind,
            subject,
            payload,
        }
    }

    pub fn overflow_for(subject: EventSubject, dropped: u64) -> Self {
        Self::new(
            EventKind::Overflow,
            subject,
            serde_json::json!({ "dropped": dropped }),
        )
    }
}
