//! The `tc` command surface. One subcommand per CLI operation, each
//! dispatching to a plain function the way the teacher's `main.rs`
//! dispatches `Commands::*` to `cmd_*` free functions; `dispatch`
//! carries the exit-code contract so `main` only has to call
//! `std::process::exit`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::config::{Config, TcConfig};
use crate::domain::{Project, ProjectStatus, TaskStatus};
use crate::errors::TcError;
use crate::planner::Planner;
use crate::repository::Repository;

#[derive(Parser)]
#[command(name = "tc")]
#[command(version, about = "Orchestrates an autonomous coding agent over a dependency-ordered plan")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new project directory
    Init {
        dir: PathBuf,
        #[arg(long)]
        prd: PathBuf,
        #[arg(long)]
        bootstrap: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    /// Verify bootstrap.md predicates
    Verify,
    /// Generate or regenerate the plan
    Plan {
        #[arg(long)]
        replan: bool,
    },
    /// Drive the reconciliation loop to completion
    Run {
        #[arg(long)]
        headless: bool,
    },
    /// Show project/phase/task status
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Suspend coding dispatch
    Pause,
    /// Resume coding dispatch
    Resume,
    /// Clear a failed/paused task back to pending
    Retry {
        #[arg(long = "task")]
        task_id: String,
    },
    /// Force a task or an entire phase back to pending
    Reset {
        #[arg(long = "task")]
        task_id: Option<String>,
        #[arg(long = "phase")]
        phase_sequence: Option<u32>,
    },
    /// Force-terminate a running session
    Kill {
        #[arg(long = "session")]
        session_id: Option<uuid::Uuid>,
        #[arg(long)]
        force: bool,
    },
    /// Show the event history
    History {
        #[arg(long = "task")]
        task_id: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Follow the event log as it's written
    Dashboard,
    /// Inspect or validate the ambient tunables
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    Show,
    Validate,
}

/// What a command produced, before it's turned into a process exit
/// code. Keeping this separate from `anyhow::Error` means "precondition
/// violated" and "no project here" aren't strings to pattern-match on —
/// they're the same typed outcomes the engine itself reports.
enum Outcome {
    Ok,
    ArgError(String),
    NoProject,
    Precondition(String),
    Deadlock(String),
}

impl From<TcError> for Outcome {
    fn from(err: TcError) -> Self {
        match err {
            TcError::Validation { message } => Outcome::ArgError(message),
            TcError::Precondition { message, .. } => Outcome::Precondition(message),
            TcError::Deadlock { reason } => Outcome::Deadlock(reason),
            other => Outcome::Precondition(other.render()),
        }
    }
}

fn exit_code(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Ok => 0,
        Outcome::ArgError(_) => 2,
        Outcome::NoProject => 3,
        Outcome::Precondition(_) => 4,
        Outcome::Deadlock(_) => 5,
    }
}

/// Run the selected subcommand and return the process exit code.
pub async fn dispatch(cli: Cli) -> i32 {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("error: failed to resolve current directory: {e}");
                return 1;
            }
        },
    };

    let result = run_command(cli.command, &project_dir).await;
    match result {
        Ok(outcome) => {
            match &outcome {
                Outcome::ArgError(msg) => eprintln!("error: {msg}"),
                Outcome::NoProject => eprintln!("error: no project initialized in {}", project_dir.display()),
                Outcome::Precondition(msg) => eprintln!("error: {msg}"),
                Outcome::Deadlock(msg) => eprintln!("deadlock: {msg}"),
                Outcome::Ok => {}
            }
            exit_code(&outcome)
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    }
}

async fn run_command(command: Commands, project_dir: &Path) -> Result<Outcome> {
    match command {
        Commands::Init { dir, prd, bootstrap, name } => cmd_init(&dir, &prd, &bootstrap, name.as_deref()),
        Commands::Verify => cmd_verify(project_dir),
        Commands::Plan { replan } => cmd_plan(project_dir, replan).await,
        Commands::Run { headless } => cmd_run(project_dir, headless).await,
        Commands::Status { json } => cmd_status(project_dir, json),
        Commands::Pause => cmd_pause(project_dir),
        Commands::Resume => cmd_resume(project_dir),
        Commands::Retry { task_id } => cmd_retry(project_dir, &task_id),
        Commands::Reset { task_id, phase_sequence } => cmd_reset(project_dir, task_id.as_deref(), phase_sequence),
        Commands::Kill { session_id, force } => cmd_kill(project_dir, session_id, force).await,
        Commands::History { task_id, limit } => cmd_history(project_dir, task_id.as_deref(), limit),
        Commands::Dashboard => cmd_dashboard(project_dir).await,
        Commands::Config { command } => cmd_config(command),
    }
}

// ── project resolution ───────────────────────────────────────────

fn open_project(project_dir: &Path) -> Result<Option<(Config, Repository, Project)>> {
    if !Config::exists(project_dir) {
        return Ok(None);
    }
    let config = Config::new(project_dir.to_path_buf())?;
    let repo = Repository::open(&config.db_path)?;
    let root = config.project_dir.to_string_lossy().into_owned();
    let project = repo.find_project_by_root(&root)?;
    Ok(project.map(|p| (config, repo, p)))
}

fn agent_cmd() -> String {
    std::env::var("TC_AGENT_CMD").unwrap_or_else(|_| "claude".to_string())
}

// ── init ──────────────────────────────────────────────────────────

fn cmd_init(dir: &Path, prd: &Path, bootstrap: &Path, name: Option<&str>) -> Result<Outcome> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let already_initialized = Config::exists(dir);

    let config = Config::new(dir.to_path_buf())?;
    config.ensure_directories()?;
    let repo = Repository::open(&config.db_path)?;

    let root = config.project_dir.to_string_lossy().into_owned();
    if repo.find_project_by_root(&root)?.is_none() {
        let project_name = name.unwrap_or_else(|| {
            config.project_dir.file_name().and_then(|n| n.to_str()).unwrap_or("project")
        });
        repo.create_project(project_name, &root)?;
    }

    std::fs::copy(prd, config.project_dir.join("prd.md")).context("failed to copy PRD into project")?;
    std::fs::copy(bootstrap, config.project_dir.join("bootstrap.md"))
        .context("failed to copy bootstrap.md into project")?;

    let claude_md = config.project_dir.join("CLAUDE.md");
    if !claude_md.exists() {
        std::fs::write(
            &claude_md,
            "# Project agent instructions\n\n\
             Report progress, completion, and failure via the control-plane RPCs \
             described in the brief header of each task you run.\n",
        )?;
    }

    if already_initialized {
        println!("Project already initialized at {}", config.project_dir.display());
    } else {
        println!("Initialized project at {}", config.project_dir.display());
        println!();
        println!("  .tc/tc.db       # relational store");
        println!("  .tc/briefs/     # rendered task prompts");
        println!("  .tc/logs/       # session logs");
        println!("  .tc/plans/      # generated plan snapshots");
        println!("  prd.md          # product requirements");
        println!("  bootstrap.md    # verifiable setup predicates");
        println!();
        println!("Next: run `tc verify`, then `tc plan`, then `tc run`.");
    }
    Ok(Outcome::Ok)
}

// ── verify ────────────────────────────────────────────────────────

fn cmd_verify(project_dir: &Path) -> Result<Outcome> {
    let Some((config, repo, project)) = open_project(project_dir)? else {
        return Ok(Outcome::NoProject);
    };
    let bootstrap_md = std::fs::read_to_string(config.project_dir.join("bootstrap.md"))
        .context("failed to read bootstrap.md")?;
    let results = crate::bootstrap::verify_predicates(&bootstrap_md, &config.project_dir);

    let mut all_passed = true;
    for result in &results {
        let mark = if result.passed { "ok" } else { "FAILED" };
        println!("[{mark}] {}", result.predicate);
        if !result.passed {
            all_passed = false;
            if !result.output.trim().is_empty() {
                println!("    {}", result.output.trim());
            }
        }
    }

    repo.append_event(&crate::domain::Event::new(
        crate::domain::EventKind::StatusChange,
        crate::domain::EventSubject::None,
        serde_json::json!({ "verify_passed": all_passed }),
    ))?;

    if all_passed {
        Ok(Outcome::Ok)
    } else {
        let _ = &project;
        Ok(Outcome::Precondition("one or more bootstrap predicates failed".into()))
    }
}

// ── plan ──────────────────────────────────────────────────────────

async fn cmd_plan(project_dir: &Path, replan: bool) -> Result<Outcome> {
    let Some((config, repo, project)) = open_project(project_dir)? else {
        return Ok(Outcome::NoProject);
    };

    let planner = crate::planner::ProcessPlanner::new(agent_cmd());
    let prompt = if replan {
        let phases = repo.list_phases(&project.id)?;
        let phase_names: Vec<String> = phases.iter().map(|p| p.name.clone()).collect();
        let tasks = repo.list_tasks_for_project(&project.id)?;
        let failure_context = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed || t.status == TaskStatus::Paused)
            .map(|t| format!("{}: {}", t.name, t.error_context.as_deref().unwrap_or("(no context)")))
            .collect::<Vec<_>>()
            .join("\n");
        crate::brief::render_replan(&phase_names, &failure_context)
    } else {
        let prd = std::fs::read_to_string(config.project_dir.join("prd.md")).context("failed to read prd.md")?;
        let bootstrap = std::fs::read_to_string(config.project_dir.join("bootstrap.md"))
            .context("failed to read bootstrap.md")?;
        format!(
            "# Plan this project\n\n## PRD\n{prd}\n\n## Bootstrap\n{bootstrap}\n\n\
             Respond with a <plan> block containing JSON of the shape \
             {{\"phases\":[{{\"name\":...,\"description\":...,\"tasks\":[...]}}]}}.",
        )
    };

    let raw_output = planner.generate(&prompt)?;
    let timestamp = chrono::Utc::now().timestamp();
    std::fs::write(config.plan_path(timestamp), &raw_output).context("failed to write plan snapshot")?;

    let raw_plan = match crate::planner::parse_plan(&raw_output) {
        Ok(p) => p,
        Err(e) => return Ok(e.into()),
    };
    let (phases, tasks, deps) = crate::planner::materialize(&raw_plan, &project.id);
    if let Err(e) = repo.replace_plan(&project.id, &phases, &tasks, &deps) {
        return Ok(e.into());
    }
    repo.set_project_status(&project.id, ProjectStatus::Planned)?;

    println!("Plan written: {} phase(s), {} task(s)", phases.len(), tasks.len());
    Ok(Outcome::Ok)
}

// ── run ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct McpConfig {
    control_plane_addr: String,
}

async fn cmd_run(project_dir: &Path, headless: bool) -> Result<Outcome> {
    let Some((config, repo, project)) = open_project(project_dir)? else {
        return Ok(Outcome::NoProject);
    };
    if !matches!(project.status, ProjectStatus::Planned | ProjectStatus::Running | ProjectStatus::Paused) {
        return Ok(Outcome::Precondition("project has no plan yet; run `tc plan` first".into()));
    }

    let tc_config = TcConfig::from_env();
    let events = std::sync::Arc::new(crate::event_bus::EventBus::new(tc_config.event_buffer));
    let app_state = crate::control_plane::AppState::new(repo.clone(), config.clone(), project.id.clone(), events.clone());

    let control_plane_addr = crate::control_plane::server::start_server(app_state.clone(), 0).await?;
    std::fs::write(
        &config.mcp_config_path,
        serde_json::to_string_pretty(&McpConfig { control_plane_addr: control_plane_addr.to_string() })?,
    )
    .context("failed to write .mcp.json")?;

    if project.status == ProjectStatus::Planned {
        repo.set_project_status(&project.id, ProjectStatus::Running)?;
    }

    let pane = std::sync::Arc::new(crate::pane::ProcessPaneWrapper::new(agent_cmd()));
    let engine = crate::engine::Engine::new(
        repo.clone(),
        pane,
        events.clone(),
        app_state,
        tc_config.max_retries,
        project.id.clone(),
        config.project_dir.clone(),
        control_plane_addr,
    );

    if !headless {
        let mut sub = events.subscribe();
        tokio::spawn(async move {
            loop {
                let event = sub.recv().await;
                println!("[{:?}] {:?} {:?}", event.kind, event.subject, event.payload);
            }
        });
    }

    println!("Running. Control plane listening on {control_plane_addr}.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted; stopping after current tick.");
                return Ok(Outcome::Ok);
            }
            outcome = engine.tick() => {
                match outcome? {
                    crate::engine::TickOutcome::Continue => {}
                    crate::engine::TickOutcome::Completed => {
                        println!("Project completed.");
                        return Ok(Outcome::Ok);
                    }
                    crate::engine::TickOutcome::Deadlocked(blocked) => {
                        for b in &blocked {
                            println!("blocked: {} waiting on {:?}", b.task_id, b.unmet_dependencies);
                        }
                        return Ok(Outcome::Deadlock("no runnable task and no active session".into()));
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(tc_config.tick_interval_ms)).await;
            }
        }
    }
}

// ── status ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatusReport {
    project: Project,
    phases: Vec<crate::phase::Phase>,
    tasks: Vec<crate::domain::Task>,
}

fn cmd_status(project_dir: &Path, json: bool) -> Result<Outcome> {
    let Some((_config, repo, project)) = open_project(project_dir)? else {
        return Ok(Outcome::NoProject);
    };
    let phases = repo.list_phases(&project.id)?;
    let tasks = repo.list_tasks_for_project(&project.id)?;

    if json {
        let report = StatusReport { project, phases, tasks };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(Outcome::Ok);
    }

    println!("Project: {} ({})", project.name, project.status.as_str());
    for phase in &phases {
        println!("\nPhase {} [{}]: {}", phase.sequence, phase.status.as_str(), phase.name);
        for task in tasks.iter().filter(|t| t.phase_id == phase.id) {
            println!("  - {} [{}] {}", task.sequence, task.status.as_str(), task.name);
        }
    }
    Ok(Outcome::Ok)
}

// ── pause / resume ────────────────────────────────────────────────

fn cmd_pause(project_dir: &Path) -> Result<Outcome> {
    let Some((_config, repo, project)) = open_project(project_dir)? else {
        return Ok(Outcome::NoProject);
    };
    repo.set_project_status(&project.id, ProjectStatus::Paused)?;
    println!("Paused.");
    Ok(Outcome::Ok)
}

fn cmd_resume(project_dir: &Path) -> Result<Outcome> {
    let Some((_config, repo, project)) = open_project(project_dir)? else {
        return Ok(Outcome::NoProject);
    };
    repo.set_project_status(&project.id, ProjectStatus::Running)?;
    println!("Resumed.");
    Ok(Outcome::Ok)
}

// ── retry / reset ─────────────────────────────────────────────────

fn cmd_retry(project_dir: &Path, task_id: &str) -> Result<Outcome> {
    let Some((_config, repo, _project)) = open_project(project_dir)? else {
        return Ok(Outcome::NoProject);
    };
    let task = repo.get_task(task_id)?;
    if !matches!(task.status, TaskStatus::Failed | TaskStatus::Paused) {
        return Ok(Outcome::Precondition(format!("task {task_id} is not failed or paused")));
    }
    repo.reset_task(task_id)?;
    println!("Task {task_id} reset to pending for retry.");
    Ok(Outcome::Ok)
}

fn cmd_reset(project_dir: &Path, task_id: Option<&str>, phase_sequence: Option<u32>) -> Result<Outcome> {
    let Some((_config, repo, project)) = open_project(project_dir)? else {
        return Ok(Outcome::NoProject);
    };
    match (task_id, phase_sequence) {
        (Some(task_id), None) => {
            repo.reset_task(task_id)?;
            println!("Task {task_id} reset to pending.");
            Ok(Outcome::Ok)
        }
        (None, Some(sequence)) => {
            let phases = repo.list_phases(&project.id)?;
            let Some(phase) = phases.iter().find(|p| p.sequence == sequence) else {
                return Ok(Outcome::ArgError(format!("no phase with sequence {sequence}")));
            };
            repo.reset_phase(&phase.id)?;
            println!("Phase {sequence} reset to pending.");
            Ok(Outcome::Ok)
        }
        _ => Ok(Outcome::ArgError("exactly one of --task or --phase is required".into())),
    }
}

// ── kill ──────────────────────────────────────────────────────────

async fn cmd_kill(project_dir: &Path, session_id: Option<uuid::Uuid>, force: bool) -> Result<Outcome> {
    let Some((config, _repo, _project)) = open_project(project_dir)? else {
        return Ok(Outcome::NoProject);
    };
    let mcp_raw = std::fs::read_to_string(&config.mcp_config_path)
        .context("no running `tc run` found (.mcp.json missing) — is the engine running?")?;
    let mcp: McpConfig = serde_json::from_str(&mcp_raw).context("malformed .mcp.json")?;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/admin/kill", mcp.control_plane_addr))
        .json(&serde_json::json!({ "session_id": session_id, "force": force }))
        .send()
        .await
        .context("failed to reach the running engine's control plane")?;

    if !response.status().is_success() {
        return Ok(Outcome::Precondition(format!("kill request rejected: {}", response.status())));
    }
    println!("Kill request filed; the engine will act on it within one tick.");
    Ok(Outcome::Ok)
}

// ── history / dashboard ───────────────────────────────────────────

fn cmd_history(project_dir: &Path, task_id: Option<&str>, limit: Option<i64>) -> Result<Outcome> {
    let Some((_config, repo, _project)) = open_project(project_dir)? else {
        return Ok(Outcome::NoProject);
    };
    let subject = task_id.map(|id| crate::domain::EventSubject::Task(id.to_string()));
    let events = repo.read_events(subject.as_ref(), None, limit)?;
    for event in &events {
        println!("{} {:?} {:?} {}", event.id, event.kind, event.subject, event.payload);
    }
    Ok(Outcome::Ok)
}

async fn cmd_dashboard(project_dir: &Path) -> Result<Outcome> {
    let Some((_config, repo, project)) = open_project(project_dir)? else {
        return Ok(Outcome::NoProject);
    };
    let tc_config = TcConfig::from_env();
    println!("Following event log for {}. Ctrl+C to stop.", project.name);

    let mut cursor: Option<i64> = None;
    loop {
        let events = repo.read_events(None, cursor, None)?;
        for event in &events {
            println!("{} {:?} {:?} {}", event.id, event.kind, event.subject, event.payload);
            cursor = Some(event.id);
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(Outcome::Ok),
            _ = tokio::time::sleep(std::time::Duration::from_millis(tc_config.tick_interval_ms)) => {}
        }
    }
}

// ── config ────────────────────────────────────────────────────────

fn cmd_config(command: Option<ConfigCommands>) -> Result<Outcome> {
    let tc_config = TcConfig::from_env();
    match command.unwrap_or(ConfigCommands::Show) {
        ConfigCommands::Show => {
            println!("tick_interval_ms = {}", tc_config.tick_interval_ms);
            println!("max_retries      = {}", tc_config.max_retries);
            println!("event_buffer     = {}", tc_config.event_buffer);
            Ok(Outcome::Ok)
        }
        ConfigCommands::Validate => match TcConfig::validate_env() {
            Ok(()) => {
                println!("Environment configuration is valid.");
                Ok(Outcome::Ok)
            }
            Err(e) => Ok(e.into()),
        },
    }
}

