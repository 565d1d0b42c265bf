use serde::{Deserialize, Serialize};

/// The two fixed pane slots: 0 is coding, 1 is review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pane {
    Coding,
    Review,
}

impl Pane {
    pub fn index(&self) -> u8 {
        match self {
            Self::Coding => 0,
            Self::Review => 1,
        }
    }

    pub fn from_index(i: u8) -> Option<Self> {
        match i {
            0 => Some(Self::Coding),
            1 => Some(Self::Review),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Killed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Killed => "killed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "killed" => Self::Killed,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One Agent process instance bound to a single task and pane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: uuid::Uuid,
    pub task_id: String,
    pub pane: Pane,
    pub process_id: Option<u32>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub exit_code: Option<i32>,
    pub status: SessionStatus,
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Session {
    pub fn start(id: uuid::Uuid, task_id: String, pane: Pane, process_id: Option<u32>) -> Self {
        Self {
            id,
            task_id,
            pane,
            process_id,
            started_at: chrono::Utc::now(),
            ended_at: None,
            exit_code: None,
            status: SessionStatus::Running,
        }
    }
}
