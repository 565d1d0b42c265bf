//! Terminal-pane management: a thin wrapper over the multiplexer
//! providing `spawn`, `is_alive`, `kill` (named explicitly as an
//! external collaborator in §1). The engine only ever talks to the
//! trait; [`ProcessPaneWrapper`] is a real implementation that spawns
//! the Agent as a child process, grounded on the teacher's
//! `ClaudeRunner::run_iteration` (stdin-fed `tokio::process::Command`,
//! PID tracking, graceful-then-escalated kill).

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};

use crate::domain::Pane;

#[async_trait::async_trait]
pub trait PaneWrapper: Send + Sync {
    /// Spawn the Agent on `pane`, feeding `brief` over stdin. Returns
    /// the process id the engine stores on the `Session` row.
    async fn spawn(&self, pane: Pane, brief: &str, working_dir: &std::path::Path) -> Result<u32>;

    /// Whether the process behind `process_id` still exists.
    async fn is_alive(&self, process_id: u32) -> bool;

    /// Terminate the process. `force` escalates past a graceful signal
    /// after the grace period instead of waiting for it.
    async fn kill(&self, process_id: u32, force: bool) -> Result<()>;
}

/// Spawns the Agent binary (`claude` by default) as a real child
/// process per pane, tracking handles by pid so `is_alive`/`kill` can
/// act on them later without re-spawning.
pub struct ProcessPaneWrapper {
    agent_cmd: String,
    children: Mutex<HashMap<u32, Child>>,
    grace_period: std::time::Duration,
}

impl ProcessPaneWrapper {
    pub fn new(agent_cmd: impl Into<String>) -> Self {
        Self {
            agent_cmd: agent_cmd.into(),
            children: Mutex::new(HashMap::new()),
            grace_period: std::time::Duration::from_secs(5),
        }
    }
}

#[async_trait::async_trait]
impl PaneWrapper for ProcessPaneWrapper {
    async fn spawn(&self, _pane: Pane, brief: &str, working_dir: &std::path::Path) -> Result<u32> {
        use tokio::io::AsyncWriteExt;

        let mut cmd = Command::new(&self.agent_cmd);
        cmd.current_dir(working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().context("failed to spawn agent process")?;
        let pid = child.id().context("spawned process has no pid")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(brief.as_bytes())
                .await
                .context("failed to write brief to agent stdin")?;
            stdin.shutdown().await.context("failed to close agent stdin")?;
        }

        self.children.lock().unwrap().insert(pid, child);
        Ok(pid)
    }

    async fn is_alive(&self, process_id: u32) -> bool {
        let mut children = self.children.lock().unwrap();
        match children.get_mut(&process_id) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn kill(&self, process_id: u32, force: bool) -> Result<()> {
        let child = self.children.lock().unwrap().remove(&process_id);
        let Some(mut child) = child else {
            return Ok(());
        };
        if force {
            child.kill().await.context("failed to force-kill process")?;
            return Ok(());
        }
        tokio::select! {
            result = child.wait() => { result.context("failed waiting on process exit")?; }
            _ = tokio::time::sleep(self.grace_period) => {
                child.kill().await.context("failed to escalate kill after grace period")?;
            }
        }
        Ok(())
    }
}

/// In-process fake used by integration tests: no multiplexer, no real
/// process, just bookkeeping the engine can drive deterministically.
#[derive(Default)]
pub struct FakePaneWrapper {
    alive: Mutex<HashMap<u32, bool>>,
    next_pid: Mutex<u32>,
}

impl FakePaneWrapper {
    pub fn new() -> Self {
        Self {
            alive: Mutex::new(HashMap::new()),
            next_pid: Mutex::new(1000),
        }
    }

    /// Test hook: mark a fake session as exited.
    pub fn finish(&self, process_id: u32) {
        self.alive.lock().unwrap().insert(process_id, false);
    }
}

#[async_trait::async_trait]
impl PaneWrapper for FakePaneWrapper {
    async fn spawn(&self, _pane: Pane, _brief: &str, _working_dir: &std::path::Path) -> Result<u32> {
        let mut next_pid = self.next_pid.lock().unwrap();
        let pid = *next_pid;
        *next_pid += 1;
        self.alive.lock().unwrap().insert(pid, true);
        Ok(pid)
    }

    async fn is_alive(&self, process_id: u32) -> bool {
        *self.alive.lock().unwrap().get(&process_id).unwrap_or(&false)
    }

    async fn kill(&self, process_id: u32, _force: bool) -> Result<()> {
        self.alive.lock().unwrap().insert(process_id, false);
        Ok(())
    }
}
