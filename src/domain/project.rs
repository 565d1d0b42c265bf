use serde::{Deserialize, Serialize};

/// Overall lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Initialized,
    Planning,
    Planned,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Planning => "planning",
            Self::Planned => "planned",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "initialized" => Self::Initialized,
            "planning" => Self::Planning,
            "planned" => Self::Planned,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => return None,
        })
    }
}

/// A single project being built by the orchestrator.
///
/// Identity is the `id`; equality is structural on it, not on the other
/// fields, since two reads of the same project taken at different times
/// must still compare equal as "the same project."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub root_dir: std::path::PathBuf,
    pub status: ProjectStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl PartialEq for Project {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Project {
    /// Construct a freshly initialized project. Validation here is
    /// limited to what a constructor can enforce locally; sequencing
    /// and cross-entity invariants are the repository's job.
    pub fn new(id: String, name: String, root_dir: std::path::PathBuf) -> Self {
        Self {
            id,
            name,
            root_dir,
            status: ProjectStatus::Initialized,
            created_at: chrono::Utc::now(),
        }
    }
}
