//! Project directory layout and tunable configuration.
//!
//! `Config` resolves the on-disk paths a project owns (mirrors the
//! `.forge/` layout resolution in the teacher's `Config`); `TcConfig`
//! holds the handful of environment-overridable tunables from §6.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Resolved on-disk layout for a project, rooted at `<project>/.tc/`.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub tc_dir: PathBuf,
    pub db_path: PathBuf,
    pub briefs_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub plans_dir: PathBuf,
    pub mcp_config_path: PathBuf,
}

impl Config {
    /// Resolve the layout for a project directory. Does not create
    /// anything on disk; `ensure_directories` does that.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("failed to resolve project directory")?;
        let tc_dir = project_dir.join(".tc");
        Ok(Self {
            db_path: tc_dir.join("tc.db"),
            briefs_dir: tc_dir.join("briefs"),
            logs_dir: tc_dir.join("logs"),
            plans_dir: tc_dir.join("plans"),
            mcp_config_path: project_dir.join(".mcp.json"),
            tc_dir,
            project_dir,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.tc_dir).context("failed to create .tc directory")?;
        std::fs::create_dir_all(&self.briefs_dir).context("failed to create briefs directory")?;
        std::fs::create_dir_all(&self.logs_dir).context("failed to create logs directory")?;
        std::fs::create_dir_all(&self.plans_dir).context("failed to create plans directory")?;
        Ok(())
    }

    pub fn exists(project_dir: &Path) -> bool {
        project_dir.join(".tc").join("tc.db").exists()
    }

    pub fn brief_path(&self, task_id: &str) -> PathBuf {
        self.briefs_dir.join(format!("{task_id}.md"))
    }

    pub fn session_log_path(&self, session_id: uuid::Uuid) -> PathBuf {
        self.logs_dir.join(format!("session-{session_id}.log"))
    }

    pub fn session_result_path(&self, session_id: uuid::Uuid) -> PathBuf {
        self.logs_dir
            .join(format!("session-{session_id}-result.json"))
    }

    pub fn plan_path(&self, timestamp: i64) -> PathBuf {
        self.plans_dir.join(format!("plan-{timestamp}.json"))
    }
}

/// Tunables honored from the environment (§6 "Environment variables").
#[derive(Debug, Clone, Copy)]
pub struct TcConfig {
    pub tick_interval_ms: u64,
    pub max_retries: u8,
    pub event_buffer: usize,
}

impl Default for TcConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2000,
            max_retries: 1,
            event_buffer: 256,
        }
    }
}

impl TcConfig {
    /// Load from the environment, falling back to defaults. Values out
    /// of range are clamped rather than rejected, matching §6's
    /// "clamped ≥0 ≤1" wording for `TC_MAX_RETRIES`; malformed numbers
    /// fall back to the default rather than panicking.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let tick_interval_ms = std::env::var("TC_TICK_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.tick_interval_ms);
        let max_retries = std::env::var("TC_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u8>().ok())
            .map(|v| v.clamp(0, 1))
            .unwrap_or(defaults.max_retries);
        let event_buffer = std::env::var("TC_EVENT_BUFFER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.event_buffer);
        Self {
            tick_interval_ms,
            max_retries,
            event_buffer,
        }
    }

    /// Validate a config loaded from explicit values (used by
    /// `tc config validate` to report malformed environment variables
    /// as `Validation` errors instead of silently clamping).
    pub fn validate_env() -> Result<(), crate::errors::TcError> {
        if let Ok(v) = std::env::var("TC_MAX_RETRIES")
            && let Ok(parsed) = v.parse::<i64>()
            && !(0..=1).contains(&parsed)
        {
            return Err(crate::errors::TcError::Validation {
                message: format!("TC_MAX_RETRIES must be 0 or 1, got {parsed}"),
            });
        }
        if let Ok(v) = std::env::var("TC_TICK_INTERVAL_MS")
            && v.parse::<u64>().is_err()
        {
            return Err(crate::errors::TcError::Validation {
                message: format!("TC_TICK_INTERVAL_MS must be a non-negative integer, got {v}"),
            });
        }
        if let Ok(v) = std::env::var("TC_EVENT_BUFFER")
            && v.parse::<usize>().is_err()
        {
            return Err(crate::errors::TcError::Validation {
                message: format!("TC_EVENT_BUFFER must be a positive integer, got {v}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let c = TcConfig::default();
        assert_eq!(c.tick_interval_ms, 2000);
        assert_eq!(c.max_retries, 1);
        assert_eq!(c.event_buffer, 256);
    }

    #[test]
    fn config_lays_out_tc_dir_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.tc_dir, dir.path().canonicalize().unwrap().join(".tc"));
        assert_eq!(config.db_path, config.tc_dir.join("tc.db"));
        assert!(!Config::exists(dir.path()));
    }

    #[test]
    fn ensure_directories_creates_the_full_layout() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf()).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.briefs_dir.is_dir());
        assert!(config.logs_dir.is_dir());
        assert!(config.plans_dir.is_dir());
    }
}
