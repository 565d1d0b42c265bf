//! The embedded relational store (C3). `DbHandle` is a thin
//! `Arc<Mutex<Connection>>` so the repository is `Clone` and `Send`
//! across the engine, the control-plane service, and the CLI, while
//! every write still funnels through one connection and one
//! transaction. Only this module opens write transactions; everyone
//! else goes through the methods below.

mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::instrument;

use crate::domain::{
    Event, EventKind, EventSubject, Pane, Project, ProjectStatus, Session, SessionStatus, Task,
    TaskKind, TaskStatus,
};
use crate::errors::TcError;
use crate::phase::{Phase, PhaseStatus};
use crate::state_machine::{self, EntityKind};

/// A `(task_id, depends_on_id)` edge: `task_id` cannot run until
/// `depends_on_id` is completed or skipped.
pub type Dependency = (String, String);

/// Consistent read of phases, tasks, and dependencies for a project,
/// taken in one transaction (§4.3 `snapshot`).
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub phases: Vec<Phase>,
    pub tasks: Vec<Task>,
    pub deps: Vec<Dependency>,
}

impl Snapshot {
    pub fn dependencies_of(&self, task_id: &str) -> impl Iterator<Item = &str> {
        self.deps
            .iter()
            .filter(move |(t, _)| t == task_id)
            .map(|(_, dep)| dep.as_str())
    }

    pub fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.iter().find(|t| t.id == task_id).map(|t| t.status)
    }
}

#[derive(Clone)]
pub struct DbHandle(Arc<Mutex<Connection>>);

impl DbHandle {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite database")?;
        Self::from_connection(conn)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;",
        )
        .context("failed to set database pragmas")?;
        conn.execute_batch(schema::MIGRATIONS)
            .context("failed to run migrations")?;
        Ok(Self(Arc::new(Mutex::new(conn))))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Repository pattern over [`DbHandle`]: every persistent operation
/// spec.md §4.3 names lives here as a method.
#[derive(Clone)]
pub struct Repository {
    db: DbHandle,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self { db: DbHandle::open(path)? })
    }

    pub fn new_in_memory() -> Result<Self> {
        Ok(Self { db: DbHandle::new_in_memory()? })
    }

    pub fn from_handle(db: DbHandle) -> Self {
        Self { db }
    }

    pub fn handle(&self) -> DbHandle {
        self.db.clone()
    }

    // ── Projects ──────────────────────────────────────────────────

    pub fn create_project(&self, name: &str, root_dir: &str) -> Result<Project> {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO projects (id, name, root_dir, status) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, root_dir, ProjectStatus::Initialized.as_str()],
        )
        .context("failed to insert project")?;
        drop(conn);
        self.get_project(&id)
    }

    pub fn get_project(&self, id: &str) -> Result<Project> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT id, name, root_dir, status, created_at FROM projects WHERE id = ?1",
            params![id],
            |row| {
                let status: String = row.get(3)?;
                let created_at: String = row.get(4)?;
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    root_dir: std::path::PathBuf::from(row.get::<_, String>(2)?),
                    status: ProjectStatus::from_str(&status).unwrap_or_default(),
                    created_at: parse_timestamp(&created_at),
                })
            },
        )
        .context("project not found")
    }

    pub fn set_project_status(&self, id: &str, status: ProjectStatus) -> Result<()> {
        let conn = self.db.lock();
        conn.execute(
            "UPDATE projects SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )
        .context("failed to update project status")?;
        Ok(())
    }

    /// Resolve the project whose root directory matches `root_dir`.
    /// Every CLI command but `init` has a working directory and no
    /// project id of its own; this is how it finds one.
    pub fn find_project_by_root(&self, root_dir: &str) -> Result<Option<Project>> {
        let conn = self.db.lock();
        let row = conn
            .query_row(
                "SELECT id, name, root_dir, status, created_at FROM projects WHERE root_dir = ?1",
                params![root_dir],
                |row| {
                    let status: String = row.get(3)?;
                    let created_at: String = row.get(4)?;
                    Ok(Project {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        root_dir: std::path::PathBuf::from(row.get::<_, String>(2)?),
                        status: ProjectStatus::from_str(&status).unwrap_or_default(),
                        created_at: parse_timestamp(&created_at),
                    })
                },
            )
            .optional()
            .context("failed to look up project by root dir")?;
        Ok(row)
    }

    // ── Plan (phases, tasks, dependencies) ───────────────────────

    /// Atomically replace every phase, task, and dependency edge for a
    /// project. Rejects the new plan (and persists nothing) if the
    /// dependency graph contains a cycle (§4.4, invariant 4).
    #[instrument(skip(self, phases, tasks, deps), fields(project_id = %project_id, phase_count = phases.len(), task_count = tasks.len()), level = "debug")]
    pub fn replace_plan(
        &self,
        project_id: &str,
        phases: &[Phase],
        tasks: &[Task],
        deps: &[Dependency],
    ) -> Result<(), TcError> {
        reject_cycles(tasks, deps)?;

        let mut conn = self.db.lock();
        let tx = conn
            .transaction()
            .map_err(|e| TcError::Infrastructure(e.into()))?;

        tx.execute(
            "DELETE FROM phases WHERE project_id = ?1",
            params![project_id],
        )
        .map_err(|e| TcError::Infrastructure(e.into()))?;

        for phase in phases {
            tx.execute(
                "INSERT INTO phases (id, project_id, sequence, name, description, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    phase.id,
                    project_id,
                    phase.sequence,
                    phase.name,
                    phase.description,
                    phase.status.as_str(),
                ],
            )
            .map_err(|e| TcError::Infrastructure(e.into()))?;
        }

        for task in tasks {
            tx.execute(
                "INSERT INTO tasks (id, phase_id, sequence, kind, name, brief_ref, status, retry_count, error_context)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    task.id,
                    task.phase_id,
                    task.sequence,
                    task.kind.as_str(),
                    task.name,
                    task.brief_ref,
                    task.status.as_str(),
                    task.retry_count,
                    task.error_context,
                ],
            )
            .map_err(|e| TcError::Infrastructure(e.into()))?;
        }

        for (task_id, depends_on_id) in deps {
            tx.execute(
                "INSERT INTO task_dependencies (task_id, depends_on_id) VALUES (?1, ?2)",
                params![task_id, depends_on_id],
            )
            .map_err(|e| TcError::Infrastructure(e.into()))?;
        }

        tx.commit().map_err(|e| TcError::Infrastructure(e.into()))?;
        Ok(())
    }

    pub fn list_phases(&self, project_id: &str) -> Result<Vec<Phase>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, sequence, name, description, status
             FROM phases WHERE project_id = ?1 ORDER BY sequence",
        )?;
        let rows = stmt
            .query_map(params![project_id], row_to_phase)
            .context("failed to query phases")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read phase row")
    }

    pub fn list_tasks_for_phase(&self, phase_id: &str) -> Result<Vec<Task>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, phase_id, sequence, kind, name, brief_ref, status, retry_count, error_context
             FROM tasks WHERE phase_id = ?1 ORDER BY sequence",
        )?;
        let rows = stmt
            .query_map(params![phase_id], row_to_task)
            .context("failed to query tasks")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read task row")
    }

    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT id, phase_id, sequence, kind, name, brief_ref, status, retry_count, error_context
             FROM tasks WHERE id = ?1",
            params![task_id],
            row_to_task,
        )
        .context("task not found")
    }

    pub fn get_phase(&self, phase_id: &str) -> Result<Phase> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT id, project_id, sequence, name, description, status FROM phases WHERE id = ?1",
            params![phase_id],
            row_to_phase,
        )
        .context("phase not found")
    }

    pub fn list_tasks_for_project(&self, project_id: &str) -> Result<Vec<Task>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.phase_id, t.sequence, t.kind, t.name, t.brief_ref, t.status, t.retry_count, t.error_context
             FROM tasks t JOIN phases p ON p.id = t.phase_id
             WHERE p.project_id = ?1 ORDER BY p.sequence, t.sequence",
        )?;
        let rows = stmt
            .query_map(params![project_id], row_to_task)
            .context("failed to query tasks")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read task row")
    }

    pub fn list_dependencies(&self, project_id: &str) -> Result<Vec<Dependency>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT d.task_id, d.depends_on_id FROM task_dependencies d
             JOIN tasks t ON t.id = d.task_id
             JOIN phases p ON p.id = t.phase_id
             WHERE p.project_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("failed to query dependencies")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read dependency row")
    }

    /// Consistent read of phases, tasks, and dependencies taken in one
    /// transaction, for the scheduler to consume.
    pub fn snapshot(&self, project_id: &str) -> Result<Snapshot> {
        let conn = self.db.lock();
        let tx = conn.unchecked_transaction().context("failed to start snapshot read")?;

        let mut phase_stmt = tx.prepare(
            "SELECT id, project_id, sequence, name, description, status
             FROM phases WHERE project_id = ?1 ORDER BY sequence",
        )?;
        let phases = phase_stmt
            .query_map(params![project_id], row_to_phase)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read phases for snapshot")?;
        drop(phase_stmt);

        let mut task_stmt = tx.prepare(
            "SELECT t.id, t.phase_id, t.sequence, t.kind, t.name, t.brief_ref, t.status, t.retry_count, t.error_context
             FROM tasks t JOIN phases p ON p.id = t.phase_id
             WHERE p.project_id = ?1 ORDER BY p.sequence, t.sequence",
        )?;
        let tasks = task_stmt
            .query_map(params![project_id], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read tasks for snapshot")?;
        drop(task_stmt);

        let mut dep_stmt = tx.prepare(
            "SELECT d.task_id, d.depends_on_id FROM task_dependencies d
             JOIN tasks t ON t.id = d.task_id
             JOIN phases p ON p.id = t.phase_id
             WHERE p.project_id = ?1",
        )?;
        let deps = dep_stmt
            .query_map(params![project_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read dependencies for snapshot")?;
        drop(dep_stmt);

        tx.commit().context("failed to commit snapshot read")?;
        Ok(Snapshot { phases, tasks, deps })
    }

    // ── Task status ───────────────────────────────────────────────

    /// Transition a task's status, validating via C2 inside the
    /// transaction, appending a `status_change` event, and reconciling
    /// the owning phase's derived status.
    #[instrument(skip(self), fields(task_id = %task_id, new_status = new_status.as_str()), level = "debug")]
    pub fn update_task_status(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        error_context: Option<&str>,
        retry_count: Option<u8>,
    ) -> Result<(), TcError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction().map_err(|e| TcError::Infrastructure(e.into()))?;

        let (current, phase_id): (String, String) = tx
            .query_row(
                "SELECT status, phase_id FROM tasks WHERE id = ?1",
                params![task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| TcError::Precondition {
                subject: task_id.to_string(),
                message: "task not found".into(),
            })?;

        state_machine::require_valid_transition(EntityKind::Task, &current, new_status.as_str())?;

        tx.execute(
            "UPDATE tasks SET status = ?1,
                error_context = COALESCE(?2, error_context),
                retry_count = COALESCE(?3, retry_count)
             WHERE id = ?4",
            params![new_status.as_str(), error_context, retry_count, task_id],
        )
        .map_err(|e| TcError::Infrastructure(e.into()))?;

        insert_event(
            &tx,
            EventKind::StatusChange,
            Some("task"),
            Some(task_id),
            serde_json::json!({ "from": current, "to": new_status.as_str() }),
        )
        .map_err(TcError::Infrastructure)?;

        reconcile_phase(&tx, &phase_id).map_err(TcError::Infrastructure)?;

        tx.commit().map_err(|e| TcError::Infrastructure(e.into()))?;
        Ok(())
    }

    // ── Sessions ──────────────────────────────────────────────────

    /// Start a new session for a task on a pane. Fails with
    /// `Precondition` if a session is already running for that task or
    /// that pane (§3 invariants).
    #[instrument(skip(self), fields(task_id = %task_id, ?pane), level = "debug")]
    pub fn create_session(
        &self,
        task_id: &str,
        pane: Pane,
        process_id: Option<u32>,
    ) -> Result<Session, TcError> {
        let conn = self.db.lock();
        let already_running_task: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sessions WHERE task_id = ?1 AND status = 'running'",
                params![task_id],
                |row| row.get(0),
            )
            .map_err(|e| TcError::Infrastructure(e.into()))?;
        if already_running_task > 0 {
            return Err(TcError::Precondition {
                subject: task_id.to_string(),
                message: "a session is already running for this task".into(),
            });
        }
        let already_running_pane: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sessions WHERE pane = ?1 AND status = 'running'",
                params![pane.index()],
                |row| row.get(0),
            )
            .map_err(|e| TcError::Infrastructure(e.into()))?;
        if already_running_pane > 0 {
            return Err(TcError::Precondition {
                subject: format!("pane-{}", pane.index()),
                message: "a session is already running on this pane".into(),
            });
        }

        let session = Session::start(uuid::Uuid::new_v4(), task_id.to_string(), pane, process_id);
        conn.execute(
            "INSERT INTO sessions (id, task_id, pane, process_id, started_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id.to_string(),
                session.task_id,
                pane.index(),
                session.process_id,
                session.started_at.to_rfc3339(),
                SessionStatus::Running.as_str(),
            ],
        )
        .map_err(|e| TcError::Infrastructure(e.into()))?;
        Ok(session)
    }

    #[instrument(skip(self), fields(%session_id, ?status), level = "debug")]
    pub fn finish_session(
        &self,
        session_id: uuid::Uuid,
        exit_code: Option<i32>,
        status: SessionStatus,
    ) -> Result<(), TcError> {
        let conn = self.db.lock();
        let current: String = conn
            .query_row(
                "SELECT status FROM sessions WHERE id = ?1",
                params![session_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|_| TcError::Precondition {
                subject: session_id.to_string(),
                message: "session not found".into(),
            })?;
        state_machine::require_valid_transition(EntityKind::Session, &current, status.as_str())?;

        conn.execute(
            "UPDATE sessions SET status = ?1, exit_code = ?2, ended_at = ?3 WHERE id = ?4",
            params![
                status.as_str(),
                exit_code,
                chrono::Utc::now().to_rfc3339(),
                session_id.to_string(),
            ],
        )
        .map_err(|e| TcError::Infrastructure(e.into()))?;
        Ok(())
    }

    /// All sessions currently `running` for a project, for the engine's
    /// reconciliation tick to reap.
    pub fn list_running_sessions(&self, project_id: &str) -> Result<Vec<Session>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.task_id, s.pane, s.process_id, s.started_at, s.ended_at, s.exit_code, s.status
             FROM sessions s
             JOIN tasks t ON t.id = s.task_id
             JOIN phases p ON p.id = t.phase_id
             WHERE p.project_id = ?1 AND s.status = 'running'",
        )?;
        let rows = stmt
            .query_map(params![project_id], row_to_session)
            .context("failed to query running sessions")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read session row")
    }

    pub fn running_session_for_task(&self, task_id: &str) -> Result<Option<Session>> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT id, task_id, pane, process_id, started_at, ended_at, exit_code, status
             FROM sessions WHERE task_id = ?1 AND status = 'running'",
            params![task_id],
            row_to_session,
        )
        .optional()
        .context("failed to query running session")
    }

    // ── Events ────────────────────────────────────────────────────

    #[instrument(skip(self, event), fields(kind = event.kind.as_str()), level = "debug")]
    pub fn append_event(&self, event: &Event) -> Result<Event> {
        let conn = self.db.lock();
        let (subject_type, subject_id) = subject_columns(&event.subject);
        conn.execute(
            "INSERT INTO events (kind, subject_type, subject_id, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                event.kind.as_str(),
                subject_type,
                subject_id,
                event.payload.to_string(),
            ],
        )
        .context("failed to insert event")?;
        let id = conn.last_insert_rowid();
        let mut stored = event.clone();
        stored.id = id;
        Ok(stored)
    }

    pub fn read_events(
        &self,
        subject: Option<&EventSubject>,
        since: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Event>> {
        let conn = self.db.lock();
        let (subject_type, subject_id) = subject
            .map(subject_columns)
            .unwrap_or((None, None));
        let mut stmt = conn.prepare(
            "SELECT id, created_at, kind, subject_type, subject_id, payload FROM events
             WHERE (?1 IS NULL OR subject_type = ?1)
               AND (?2 IS NULL OR subject_id = ?2)
               AND (?3 IS NULL OR id > ?3)
             ORDER BY id ASC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![subject_type, subject_id, since, limit.unwrap_or(i64::MAX)],
            row_to_event,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read event row")
    }

    // ── Reset semantics (§7) ─────────────────────────────────────

    /// Kill any running session for `task_id`, clear retry_count and
    /// error_context, set status pending, and reconcile the phase.
    ///
    /// This is a forced write, not a validated transition: an operator
    /// reset is allowed from any status (including `running`), which is
    /// exactly the escape hatch the state machine's normal table does
    /// not provide.
    pub fn reset_task(&self, task_id: &str) -> Result<()> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE sessions SET status = 'killed', ended_at = ?1
             WHERE task_id = ?2 AND status = 'running'",
            params![chrono::Utc::now().to_rfc3339(), task_id],
        )?;

        let phase_id: String = tx.query_row(
            "SELECT phase_id FROM tasks WHERE id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "UPDATE tasks SET status = 'pending', retry_count = 0, error_context = NULL WHERE id = ?1",
            params![task_id],
        )?;

        insert_event(
            &tx,
            EventKind::StatusChange,
            Some("task"),
            Some(task_id),
            serde_json::json!({ "to": "pending", "reason": "reset" }),
        )?;

        reconcile_phase(&tx, &phase_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Insert a single new task into an existing phase, appended after
    /// the phase's current highest sequence, with dependency edges on
    /// `depends_on`. Used by the control-plane service to enqueue a
    /// review task after `report_completion` and a follow-up coding
    /// task after a `changes_requested` review (§4.7) — unlike
    /// `replace_plan`, this does not touch any other task in the
    /// project.
    pub fn insert_task(
        &self,
        phase_id: &str,
        kind: TaskKind,
        name: &str,
        depends_on: &[String],
    ) -> Result<Task, TcError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction().map_err(|e| TcError::Infrastructure(e.into()))?;

        let next_sequence: u32 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM tasks WHERE phase_id = ?1",
                params![phase_id],
                |row| row.get(0),
            )
            .map_err(|e| TcError::Infrastructure(e.into()))?;

        let task = Task::new(
            uuid::Uuid::new_v4().to_string(),
            phase_id.to_string(),
            next_sequence,
            kind,
            name.to_string(),
            None,
        );

        tx.execute(
            "INSERT INTO tasks (id, phase_id, sequence, kind, name, brief_ref, status, retry_count, error_context)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.id,
                task.phase_id,
                task.sequence,
                task.kind.as_str(),
                task.name,
                task.brief_ref,
                task.status.as_str(),
                task.retry_count,
                task.error_context,
            ],
        )
        .map_err(|e| TcError::Infrastructure(e.into()))?;

        for dep in depends_on {
            tx.execute(
                "INSERT INTO task_dependencies (task_id, depends_on_id) VALUES (?1, ?2)",
                params![task.id, dep],
            )
            .map_err(|e| TcError::Infrastructure(e.into()))?;
        }

        insert_event(
            &tx,
            EventKind::StatusChange,
            Some("task"),
            Some(&task.id),
            serde_json::json!({ "to": "pending", "reason": "inserted" }),
        )
        .map_err(TcError::Infrastructure)?;

        reconcile_phase(&tx, phase_id).map_err(TcError::Infrastructure)?;
        tx.commit().map_err(|e| TcError::Infrastructure(e.into()))?;
        Ok(task)
    }

    /// Cascade `reset_task` to every task in a phase.
    pub fn reset_phase(&self, phase_id: &str) -> Result<()> {
        let task_ids: Vec<String> = {
            let conn = self.db.lock();
            let mut stmt = conn.prepare("SELECT id FROM tasks WHERE phase_id = ?1")?;
            stmt.query_map(params![phase_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        for task_id in task_ids {
            self.reset_task(&task_id)?;
        }
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or_else(|_| chrono::Utc::now())
        })
}

fn row_to_phase(row: &rusqlite::Row) -> rusqlite::Result<Phase> {
    let status: String = row.get(5)?;
    Ok(Phase {
        id: row.get(0)?,
        project_id: row.get(1)?,
        sequence: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        status: PhaseStatus::from_str(&status).unwrap_or(PhaseStatus::Pending),
    })
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let kind: String = row.get(3)?;
    let status: String = row.get(6)?;
    Ok(Task {
        id: row.get(0)?,
        phase_id: row.get(1)?,
        sequence: row.get(2)?,
        kind: TaskKind::from_str(&kind).unwrap_or(TaskKind::Coding),
        name: row.get(4)?,
        brief_ref: row.get(5)?,
        status: TaskStatus::from_str(&status).unwrap_or(TaskStatus::Pending),
        retry_count: row.get(7)?,
        error_context: row.get(8)?,
    })
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let id: String = row.get(0)?;
    let pane: u8 = row.get(2)?;
    let started_at: String = row.get(4)?;
    let ended_at: Option<String> = row.get(5)?;
    let status: String = row.get(7)?;
    Ok(Session {
        id: uuid::Uuid::parse_str(&id).unwrap_or_default(),
        task_id: row.get(1)?,
        pane: Pane::from_index(pane).unwrap_or(Pane::Coding),
        process_id: row.get(3)?,
        started_at: parse_timestamp(&started_at),
        ended_at: ended_at.map(|s| parse_timestamp(&s)),
        exit_code: row.get(6)?,
        status: SessionStatus::from_str(&status).unwrap_or(SessionStatus::Running),
    })
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let created_at: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let subject_type: Option<String> = row.get(3)?;
    let subject_id: Option<String> = row.get(4)?;
    let payload: String = row.get(5)?;
    Ok(Event {
        id: row.get(0)?,
        created_at: parse_timestamp(&created_at),
        kind: EventKind::from_str(&kind).unwrap_or(EventKind::Progress),
        subject: subject_from_columns(subject_type.as_deref(), subject_id),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
    })
}

fn subject_columns(subject: &EventSubject) -> (Option<String>, Option<String>) {
    match subject {
        EventSubject::Task(id) => (Some("task".into()), Some(id.clone())),
        EventSubject::Session(id) => (Some("session".into()), Some(id.to_string())),
        EventSubject::Phase(id) => (Some("phase".into()), Some(id.clone())),
        EventSubject::None => (None, None),
    }
}

fn subject_from_columns(subject_type: Option<&str>, subject_id: Option<String>) -> EventSubject {
    match (subject_type, subject_id) {
        (Some("task"), Some(id)) => EventSubject::Task(id),
        (Some("session"), Some(id)) => {
            EventSubject::Session(uuid::Uuid::parse_str(&id).unwrap_or_default())
        }
        (Some("phase"), Some(id)) => EventSubject::Phase(id),
        _ => EventSubject::None,
    }
}

fn insert_event(
    tx: &rusqlite::Transaction,
    kind: EventKind,
    subject_type: Option<&str>,
    subject_id: Option<&str>,
    payload: serde_json::Value,
) -> Result<()> {
    tx.execute(
        "INSERT INTO events (kind, subject_type, subject_id, payload) VALUES (?1, ?2, ?3, ?4)",
        params![kind.as_str(), subject_type, subject_id, payload.to_string()],
    )
    .context("failed to insert event")?;
    Ok(())
}

/// Recompute and persist a phase's derived status from its tasks.
fn reconcile_phase(tx: &rusqlite::Transaction, phase_id: &str) -> Result<()> {
    let mut stmt = tx.prepare("SELECT status FROM tasks WHERE phase_id = ?1")?;
    let statuses: Vec<TaskStatus> = stmt
        .query_map(params![phase_id], |row| {
            let s: String = row.get(0)?;
            Ok(TaskStatus::from_str(&s).unwrap_or(TaskStatus::Pending))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);
    let derived = Phase::derive_status(&statuses);
    tx.execute(
        "UPDATE phases SET status = ?1 WHERE id = ?2",
        params![derived.as_str(), phase_id],
    )?;
    Ok(())
}

/// Reject a plan whose dependency graph contains a cycle, via
/// Kahn's algorithm: repeatedly remove nodes with no remaining
/// incoming edges; if any node is left unvisited, a cycle exists.
fn reject_cycles(tasks: &[Task], deps: &[Dependency]) -> Result<(), TcError> {
    use std::collections::{HashMap, HashSet, VecDeque};

    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let mut indegree: HashMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
    let mut edges: HashMap<&str, Vec<&str>> = ids.iter().map(|id| (*id, Vec::new())).collect();

    for (task_id, depends_on_id) in deps {
        if !ids.contains(task_id.as_str()) || !ids.contains(depends_on_id.as_str()) {
            continue;
        }
        edges.entry(depends_on_id.as_str()).or_default().push(task_id.as_str());
        *indegree.entry(task_id.as_str()).or_default() += 1;
    }

    let mut queue: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0usize;
    while let Some(node) = queue.pop_front() {
        visited += 1;
        for next in edges.get(node).into_iter().flatten() {
            let deg = indegree.get_mut(next).unwrap();
            *deg -= 1;
            if *deg == 0 {
                queue.push_back(next);
            }
        }
    }

    if visited != ids.len() {
        return Err(TcError::Validation {
            message: "plan rejected: task_dependencies contains a cycle".into(),
        });
    }
    Ok(())
}
