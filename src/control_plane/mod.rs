//! The control-plane service (C7): a local HTTP+JSON surface the Agent
//! connects to from within its pane session. Grounded on the teacher's
//! `factory::api`/`factory::server` pair — `AppState` shared via
//! `axum::extract::State`, a `Router` of typed routes, served over a
//! loopback `tokio::net::TcpListener` with graceful shutdown.

pub mod rpc;
pub mod server;

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;

use crate::config::Config;
use crate::domain::TaskKind;
use crate::event_bus::EventBus;
use crate::repository::Repository;

/// A `tc kill` request filed over the admin route, drained by the
/// engine on its next tick (§5's "(d) pane spawn/kill" suspension
/// point) since the CLI process that received `tc kill` has no other
/// way to reach the live session held by a separate `tc run` process.
#[derive(Debug, Clone)]
pub struct KillRequest {
    pub session_id: Option<uuid::Uuid>,
    pub force: bool,
}

/// Shared state behind every RPC handler.
#[derive(Clone)]
pub struct AppState {
    pub repo: Repository,
    pub config: Config,
    pub project_id: String,
    pub events: std::sync::Arc<EventBus>,
    /// session_token -> task_id, registered by the engine when it
    /// dispatches a session so the control plane can authorize calls.
    pub sessions: std::sync::Arc<Mutex<HashMap<String, String>>>,
    pub pending_human_input:
        std::sync::Arc<Mutex<HashMap<String, tokio::sync::oneshot::Sender<String>>>>,
    pub human_input_timeout_secs: u64,
    pub kill_requests: std::sync::Arc<Mutex<Vec<KillRequest>>>,
}

impl AppState {
    pub fn new(repo: Repository, config: Config, project_id: String, events: std::sync::Arc<EventBus>) -> Self {
        Self {
            repo,
            config,
            project_id,
            events,
            sessions: std::sync::Arc::new(Mutex::new(HashMap::new())),
            pending_human_input: std::sync::Arc::new(Mutex::new(HashMap::new())),
            human_input_timeout_secs: 300,
            kill_requests: std::sync::Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn request_kill(&self, session_id: Option<uuid::Uuid>, force: bool) {
        self.kill_requests.lock().unwrap().push(KillRequest { session_id, force });
    }

    pub fn drain_kill_requests(&self) -> Vec<KillRequest> {
        std::mem::take(&mut *self.kill_requests.lock().unwrap())
    }

    /// Register a session token so subsequent RPCs from that session
    /// authorize against `task_id`. Called by the engine right before
    /// it spawns the pane.
    pub fn register_session(&self, token: String, task_id: String) {
        self.sessions.lock().unwrap().insert(token, task_id);
    }

    pub fn unregister_session(&self, token: &str) {
        self.sessions.lock().unwrap().remove(token);
    }

    /// Record an operator's answer to a pending `request_human_input`
    /// call, waking the blocked RPC handler.
    pub fn answer_human_input(&self, request_id: &str, answer: String) -> bool {
        if let Some(tx) = self.pending_human_input.lock().unwrap().remove(request_id) {
            tx.send(answer).is_ok()
        } else {
            false
        }
    }

    pub(crate) fn enqueue_review_for(&self, task_id: &str) -> Result<()> {
        let tasks = self.repo.list_tasks_for_project(&self.project_id)?;
        let task = tasks
            .iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| anyhow::anyhow!("task {task_id} not found"))?;
        self.repo.insert_task(
            &task.phase_id,
            TaskKind::Review,
            &format!("Review: {}", task.name),
            &[task_id.to_string()],
        )?;
        Ok(())
    }

    /// Create the revision task a `changes_requested` review spawns.
    /// Findings are not stashed on the new task's `error_context` (that
    /// field is reserved for failure context per §3); the brief
    /// renderer instead pulls the `review_verdict` event off the
    /// reviewed task's history when it assembles the retry-coding
    /// prompt (C9).
    pub(crate) fn insert_followup_coding_task(&self, task_id: &str, _findings: &[String]) -> Result<()> {
        let tasks = self.repo.list_tasks_for_project(&self.project_id)?;
        let task = tasks
            .iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| anyhow::anyhow!("task {task_id} not found"))?;
        self.repo.insert_task(
            &task.phase_id,
            TaskKind::Coding,
            &format!("{} (revision)", task.name),
            &[task_id.to_string()],
        )?;
        Ok(())
    }
}
