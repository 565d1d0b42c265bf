//! The reconciliation tick loop (C8): reaps exited sessions, applies
//! retry policy (C5) to newly failed tasks, takes a consistent snapshot
//! (C3), asks the scheduler (C4) what to do next, and actuates the
//! decision by rendering a brief (C9) and spawning or tearing down a
//! pane session. The engine is the sole writer of task status outside
//! the control-plane RPCs (§4.8).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;

use crate::brief::{self, BriefContext};
use crate::control_plane::AppState;
use crate::domain::{Event, EventKind, EventSubject, Pane, ProjectStatus, SessionStatus, TaskStatus};
use crate::event_bus::EventBus;
use crate::pane::PaneWrapper;
use crate::repository::{Repository, Snapshot};
use crate::scheduler::{self, BlockedTask, Decision, EngineState};
use tracing::{info, warn};

/// What happened on one tick, for the caller driving the loop (`tc run`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Completed,
    Deadlocked(Vec<BlockedTask>),
}

struct ActiveSession {
    session_id: uuid::Uuid,
    task_id: String,
    process_id: u32,
    session_token: String,
    killed: bool,
}

/// Drives one project's plan to completion. Which pane currently holds
/// a live session is tracked only in memory; a restarted engine starts
/// with no active sessions and relies on the next tick's reaper to
/// notice and fail any session rows left `running` from a prior run.
pub struct Engine {
    repo: Repository,
    pane: std::sync::Arc<dyn PaneWrapper>,
    events: std::sync::Arc<EventBus>,
    app_state: AppState,
    max_retries: u8,
    project_id: String,
    working_dir: PathBuf,
    control_plane_addr: std::net::SocketAddr,
    active: Mutex<HashMap<Pane, ActiveSession>>,
}

impl Engine {
    pub fn new(
        repo: Repository,
        pane: std::sync::Arc<dyn PaneWrapper>,
        events: std::sync::Arc<EventBus>,
        app_state: AppState,
        max_retries: u8,
        project_id: String,
        working_dir: PathBuf,
        control_plane_addr: std::net::SocketAddr,
    ) -> Self {
        Self {
            repo,
            pane,
            events,
            app_state,
            max_retries,
            project_id,
            working_dir,
            control_plane_addr,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Pausing and resuming must be visible across process boundaries:
    /// `tc pause` runs as a separate process from the `tc run` that owns
    /// this engine, so `paused` lives in `projects.status`, the only
    /// state both processes actually share, rather than in memory here.
    pub fn pause(&self) -> Result<()> {
        self.repo.set_project_status(&self.project_id, ProjectStatus::Paused)?;
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.repo.set_project_status(&self.project_id, ProjectStatus::Running)?;
        Ok(())
    }

    pub fn is_paused(&self) -> Result<bool> {
        Ok(self.repo.get_project(&self.project_id)?.status == ProjectStatus::Paused)
    }

    /// Force-terminate a running session (`tc kill`): the pane wrapper
    /// sends a termination signal, and the reaper on the next tick
    /// records `status=killed`, task→failed with `error_context="killed"`.
    /// `session_id == None` kills whichever session is currently active.
    pub async fn kill_session(&self, session_id: Option<uuid::Uuid>, force: bool) -> Result<()> {
        let process_id = {
            let mut active = self.active.lock().unwrap();
            let target = active
                .values_mut()
                .find(|s| session_id.is_none_or(|id| s.session_id == id));
            match target {
                Some(s) => {
                    s.killed = true;
                    Some(s.process_id)
                }
                None => None,
            }
        };
        if let Some(pid) = process_id {
            self.pane.kill(pid, force).await?;
        }
        Ok(())
    }

    /// Drain any `tc kill` requests filed on the control-plane's admin
    /// route since the last tick and act on them.
    async fn process_kill_requests(&self) -> Result<()> {
        for req in self.app_state.drain_kill_requests() {
            self.kill_session(req.session_id, req.force).await?;
        }
        Ok(())
    }

    /// Run one tick of the reconciliation loop.
    pub async fn tick(&self) -> Result<TickOutcome> {
        self.process_kill_requests().await?;
        self.reap_exited_sessions().await?;

        let snapshot = self.repo.snapshot(&self.project_id)?;
        let engine_state = self.current_engine_state()?;
        let decision = scheduler::schedule(&snapshot, &engine_state);

        let outcome = self.actuate(decision, &snapshot).await?;

        self.events.publish(Event::new(
            EventKind::EngineTick,
            EventSubject::None,
            serde_json::json!({ "outcome": format!("{outcome:?}") }),
        ));

        Ok(outcome)
    }

    fn current_engine_state(&self) -> Result<EngineState> {
        let paused = self.is_paused()?;
        let active = self.active.lock().unwrap();
        Ok(EngineState::new(active.contains_key(&Pane::Coding), active.contains_key(&Pane::Review), paused))
    }

    async fn reap_exited_sessions(&self) -> Result<()> {
        let held: Vec<(Pane, ActiveSession)> = std::mem::take(&mut *self.active.lock().unwrap()).into_iter().collect();

        let mut still_active = HashMap::new();
        for (pane, session) in held {
            if self.pane.is_alive(session.process_id).await {
                still_active.insert(pane, session);
                continue;
            }
            self.reap_one(&session).await?;
        }
        *self.active.lock().unwrap() = still_active;

        self.apply_retry_policy_to_failed_tasks()?;
        Ok(())
    }

    async fn reap_one(&self, session: &ActiveSession) -> Result<()> {
        self.app_state.unregister_session(&session.session_token);
        let task = self.repo.get_task(&session.task_id)?;

        if session.killed {
            warn!(task_id = %session.task_id, session_id = %session.session_id, "session killed");
            self.repo.finish_session(session.session_id, None, SessionStatus::Killed)?;
            self.repo.update_task_status(&session.task_id, TaskStatus::Failed, Some("killed"), None)?;
            return Ok(());
        }

        match task.status {
            TaskStatus::Completed => {
                info!(task_id = %session.task_id, "session completed");
                self.repo
                    .finish_session(session.session_id, Some(0), SessionStatus::Completed)?;
            }
            TaskStatus::Failed => {
                self.repo
                    .finish_session(session.session_id, Some(1), SessionStatus::Failed)?;
            }
            _ => {
                // Process exited without a matching control-plane report.
                warn!(task_id = %session.task_id, "agent exited without reporting completion or failure");
                self.repo.finish_session(session.session_id, None, SessionStatus::Failed)?;
                self.repo.update_task_status(
                    &session.task_id,
                    TaskStatus::Failed,
                    Some("agent process exited without reporting completion or failure"),
                    None,
                )?;
            }
        }
        Ok(())
    }

    /// Apply retry policy (C5) to every task this project currently has
    /// in `failed` — a no-op on tasks retry already moved out of
    /// `failed`, so this is safe to run every tick.
    fn apply_retry_policy_to_failed_tasks(&self) -> Result<()> {
        let tasks = self.repo.list_tasks_for_project(&self.project_id)?;
        for task in tasks.iter().filter(|t| t.status == TaskStatus::Failed) {
            let decision = crate::retry::decide(task.retry_count, self.max_retries);
            let next_status = crate::retry::resulting_status(&decision);
            let new_retry_count = match &decision {
                crate::retry::RetryDecision::Retry { new_retry_count } => Some(*new_retry_count),
                crate::retry::RetryDecision::Pause => {
                    self.repo.set_project_status(&self.project_id, ProjectStatus::Paused)?;
                    None
                }
            };
            self.repo
                .update_task_status(&task.id, next_status, None, new_retry_count)?;
        }
        Ok(())
    }

    async fn actuate(&self, decision: Decision, snapshot: &Snapshot) -> Result<TickOutcome> {
        match decision {
            Decision::DispatchCoding(task_id) => {
                self.dispatch(&task_id, Pane::Coding, snapshot).await?;
                Ok(TickOutcome::Continue)
            }
            Decision::DispatchReview(task_id) => {
                self.dispatch(&task_id, Pane::Review, snapshot).await?;
                Ok(TickOutcome::Continue)
            }
            Decision::Idle => Ok(TickOutcome::Continue),
            Decision::Complete => {
                self.repo.set_project_status(&self.project_id, ProjectStatus::Completed)?;
                self.events.publish(Event::new(
                    EventKind::StatusChange,
                    EventSubject::None,
                    serde_json::json!({ "project_status": "completed" }),
                ));
                Ok(TickOutcome::Completed)
            }
            Decision::Deadlock(blocked) => {
                self.repo.set_project_status(&self.project_id, ProjectStatus::Failed)?;
                self.events.publish(Event::new(
                    EventKind::StatusChange,
                    EventSubject::None,
                    serde_json::json!({ "project_status": "failed", "blocked": &blocked }),
                ));
                Ok(TickOutcome::Deadlocked(blocked))
            }
        }
    }

    async fn dispatch(&self, task_id: &str, pane: Pane, snapshot: &Snapshot) -> Result<()> {
        info!(task_id, ?pane, "dispatching task");
        let task = self.repo.get_task(task_id)?;
        let phase = self.repo.get_phase(&task.phase_id)?;

        let dep_ids: Vec<&str> = snapshot.dependencies_of(task_id).collect();
        let completed_dependencies: Vec<_> =
            snapshot.tasks.iter().filter(|t| dep_ids.contains(&t.id.as_str())).cloned().collect();
        let dependency_events = self.collect_dependency_events(&dep_ids)?;
        let review_verdict_event = self.latest_review_verdict(&dep_ids)?;

        let ctx = BriefContext {
            phase: &phase,
            task: &task,
            completed_dependencies: &completed_dependencies,
            dependency_events: &dependency_events,
            review_verdict_event: review_verdict_event.as_ref(),
        };
        let body = brief::render(&ctx);

        // The rendered prompt content (§4.9's deterministic inputs) is
        // pure; the control-plane wiring a session needs to call back in
        // is operational plumbing, prepended here rather than folded
        // into `brief::render`.
        let session_token = uuid::Uuid::new_v4().to_string();
        let rendered = format!(
            "<!-- control-plane: http://{}/rpc  session_token: {session_token}  task_id: {task_id} -->\n\n{body}",
            self.control_plane_addr,
        );

        std::fs::create_dir_all(
            self.app_state
                .config
                .brief_path(task_id)
                .parent()
                .expect("brief path always has a parent"),
        )?;
        std::fs::write(self.app_state.config.brief_path(task_id), &rendered)?;

        self.app_state.register_session(session_token.clone(), task_id.to_string());

        let process_id = match self.pane.spawn(pane, &rendered, &self.working_dir).await {
            Ok(pid) => pid,
            Err(e) => {
                self.app_state.unregister_session(&session_token);
                return Err(e);
            }
        };
        let session = self.repo.create_session(task_id, pane, Some(process_id))?;
        self.repo.update_task_status(task_id, TaskStatus::Running, None, None)?;

        self.active.lock().unwrap().insert(
            pane,
            ActiveSession {
                session_id: session.id,
                task_id: task_id.to_string(),
                process_id,
                session_token,
                killed: false,
            },
        );
        Ok(())
    }

    fn collect_dependency_events(&self, dep_ids: &[&str]) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for id in dep_ids {
            events.extend(self.repo.read_events(Some(&EventSubject::Task((*id).to_string())), None, None)?);
        }
        Ok(events)
    }

    fn latest_review_verdict(&self, dep_ids: &[&str]) -> Result<Option<Event>> {
        for id in dep_ids {
            let events = self
                .repo
                .read_events(Some(&EventSubject::Task((*id).to_string())), None, None)?;
            if let Some(last) = events.into_iter().rev().find(|e| e.kind == EventKind::ReviewVerdict) {
                return Ok(Some(last));
            }
        }
        Ok(None)
    }
}
