use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Coding,
    Review,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Review => "review",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "coding" => Self::Coding,
            "review" => Self::Review,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "paused" => Self::Paused,
            "skipped" => Self::Skipped,
            _ => return None,
        })
    }

    /// Whether a dependent task treats this status as "satisfied" for
    /// scheduling purposes. Completed and skipped are equivalent here
    /// (open question in the design notes, resolved in DESIGN.md).
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// Atomic unit of Agent work, coding or review, belonging to one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub phase_id: String,
    pub sequence: u32,
    pub kind: TaskKind,
    pub name: String,
    pub brief_ref: Option<String>,
    pub status: TaskStatus,
    pub retry_count: u8,
    pub error_context: Option<String>,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Task {
    /// Construct a new pending task with retry_count 0.
    ///
    /// Panics if `sequence` is zero or `retry_count` exceeds 1 — both
    /// are invariants a caller controls directly and should never
    /// violate (data-model §3: "retry_count ∈ {0, 1}").
    pub fn new(
        id: String,
        phase_id: String,
        sequence: u32,
        kind: TaskKind,
        name: String,
        brief_ref: Option<String>,
    ) -> Self {
        assert!(sequence >= 1, "task sequence must be >= 1, got {sequence}");
        Self {
            id,
            phase_id,
            sequence,
            kind,
            name,
            brief_ref,
            status: TaskStatus::Pending,
            retry_count: 0,
            error_context: None,
        }
    }

    pub fn is_coding(&self) -> bool {
        self.kind == TaskKind::Coding
    }

    pub fn is_review(&self) -> bool {
        self.kind == TaskKind::Review
    }
}
