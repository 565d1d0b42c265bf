//! The six control-plane RPC operations (§4.7): request/response
//! payloads and the handlers axum dispatches them to. Every handler
//! validates its precondition against the state machine before
//! mutating anything, and responds `{ok, error?}` plus an
//! operation-specific payload for `get_context`, matching the wire
//! contract in §6.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use axum::routing::post;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::domain::{Event, EventKind, EventSubject, TaskKind, TaskStatus};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct RpcEnvelope<T> {
    pub session_token: String,
    pub task_id: String,
    #[serde(flatten)]
    pub body: T,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse<T: Serialize> {
    pub ok: bool,
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Option<T>,
}

impl<T: Serialize> RpcResponse<T> {
    fn ok(payload: Option<T>) -> Self {
        Self { ok: true, error: None, payload }
    }

    fn err(message: impl Into<String>) -> Self {
        Self { ok: false, error: Some(message.into()), payload: None }
    }
}

pub enum RpcError {
    Precondition(String),
    Infrastructure(String),
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            RpcError::Precondition(msg) => (StatusCode::PRECONDITION_FAILED, msg),
            RpcError::Infrastructure(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(RpcResponse::<()>::err(message))).into_response()
    }
}

impl From<crate::errors::TcError> for RpcError {
    fn from(e: crate::errors::TcError) -> Self {
        match &e {
            crate::errors::TcError::Precondition { .. } => RpcError::Precondition(e.render()),
            _ => RpcError::Infrastructure(e.render()),
        }
    }
}

type RpcResult<T> = Result<Json<RpcResponse<T>>, RpcError>;

/// Resolve `session_token` to the task it is scoped to and confirm it
/// matches the request's `task_id`; every RPC precondition starts here.
fn authorize(state: &AppState, session_token: &str, task_id: &str) -> Result<(), RpcError> {
    let bound_task = state
        .sessions
        .lock()
        .unwrap()
        .get(session_token)
        .cloned()
        .ok_or_else(|| RpcError::Precondition("unknown session token".into()))?;
    if bound_task != task_id {
        return Err(RpcError::Precondition(
            "session token does not authorize this task".into(),
        ));
    }
    Ok(())
}

fn require_status(state: &AppState, task_id: &str, expected: TaskStatus) -> Result<(), RpcError> {
    let snapshot = state
        .repo
        .list_tasks_for_project(&state.project_id)
        .map_err(|e| RpcError::Infrastructure(e.to_string()))?;
    let task = snapshot
        .iter()
        .find(|t| t.id == task_id)
        .ok_or_else(|| RpcError::Precondition("task not found".into()))?;
    if task.status != expected {
        return Err(RpcError::Precondition(format!(
            "task {task_id} is {:?}, expected {:?}",
            task.status, expected
        )));
    }
    Ok(())
}

fn require_kind(state: &AppState, task_id: &str, expected: TaskKind) -> Result<(), RpcError> {
    let tasks = state
        .repo
        .list_tasks_for_project(&state.project_id)
        .map_err(|e| RpcError::Infrastructure(e.to_string()))?;
    let task = tasks
        .iter()
        .find(|t| t.id == task_id)
        .ok_or_else(|| RpcError::Precondition("task not found".into()))?;
    if task.kind != expected {
        return Err(RpcError::Precondition(format!(
            "task {task_id} has kind {:?}, expected {:?}",
            task.kind, expected
        )));
    }
    Ok(())
}

// ── report_progress ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReportProgressBody {
    pub pct: Option<u8>,
    pub note: String,
}

#[instrument(skip(state, req), fields(task_id = %req.task_id))]
async fn report_progress(
    State(state): State<AppState>,
    Json(req): Json<RpcEnvelope<ReportProgressBody>>,
) -> RpcResult<()> {
    authorize(&state, &req.session_token, &req.task_id)?;
    require_status(&state, &req.task_id, TaskStatus::Running)?;

    let stored = state
        .repo
        .append_event(&Event::new(
            EventKind::Progress,
            EventSubject::Task(req.task_id.clone()),
            serde_json::json!({ "pct": req.body.pct, "note": req.body.note }),
        ))
        .map_err(|e| RpcError::Infrastructure(e.to_string()))?;
    state.events.publish(stored);

    Ok(Json(RpcResponse::ok(None)))
}

// ── report_completion ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReportCompletionBody {
    pub summary: String,
    pub files_changed: Vec<String>,
}

#[instrument(skip(state, req), fields(task_id = %req.task_id))]
async fn report_completion(
    State(state): State<AppState>,
    Json(req): Json<RpcEnvelope<ReportCompletionBody>>,
) -> RpcResult<()> {
    authorize(&state, &req.session_token, &req.task_id)?;
    require_status(&state, &req.task_id, TaskStatus::Running)?;
    require_kind(&state, &req.task_id, TaskKind::Coding)?;

    state
        .repo
        .update_task_status(&req.task_id, TaskStatus::Completed, None, None)?;
    let stored = state
        .repo
        .append_event(&Event::new(
            EventKind::StatusChange,
            EventSubject::Task(req.task_id.clone()),
            serde_json::json!({ "summary": req.body.summary, "files_changed": req.body.files_changed }),
        ))
        .map_err(|e| RpcError::Infrastructure(e.to_string()))?;
    state.events.publish(stored);

    state.enqueue_review_for(&req.task_id).map_err(|e| RpcError::Infrastructure(e.to_string()))?;

    Ok(Json(RpcResponse::ok(None)))
}

// ── report_failure ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReportFailureBody {
    pub message: String,
    pub context: Option<String>,
}

#[instrument(skip(state, req), fields(task_id = %req.task_id))]
async fn report_failure(
    State(state): State<AppState>,
    Json(req): Json<RpcEnvelope<ReportFailureBody>>,
) -> RpcResult<()> {
    authorize(&state, &req.session_token, &req.task_id)?;
    require_status(&state, &req.task_id, TaskStatus::Running)?;

    let context = req.body.context.unwrap_or_else(|| req.body.message.clone());
    state
        .repo
        .update_task_status(&req.task_id, TaskStatus::Failed, Some(&context), None)?;
    let stored = state
        .repo
        .append_event(&Event::new(
            EventKind::Error,
            EventSubject::Task(req.task_id.clone()),
            serde_json::json!({ "message": req.body.message }),
        ))
        .map_err(|e| RpcError::Infrastructure(e.to_string()))?;
    state.events.publish(stored);

    Ok(Json(RpcResponse::ok(None)))
}

// ── report_review ────────────────────────────────────────────────

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    ChangesRequested,
}

#[derive(Debug, Deserialize)]
pub struct ReportReviewBody {
    pub verdict: ReviewVerdict,
    pub findings: Vec<String>,
}

#[instrument(skip(state, req), fields(task_id = %req.task_id))]
async fn report_review(
    State(state): State<AppState>,
    Json(req): Json<RpcEnvelope<ReportReviewBody>>,
) -> RpcResult<()> {
    authorize(&state, &req.session_token, &req.task_id)?;
    require_status(&state, &req.task_id, TaskStatus::Running)?;
    require_kind(&state, &req.task_id, TaskKind::Review)?;

    state
        .repo
        .update_task_status(&req.task_id, TaskStatus::Completed, None, None)?;
    let stored = state
        .repo
        .append_event(&Event::new(
            EventKind::ReviewVerdict,
            EventSubject::Task(req.task_id.clone()),
            serde_json::json!({ "verdict": &req.body.verdict, "findings": req.body.findings }),
        ))
        .map_err(|e| RpcError::Infrastructure(e.to_string()))?;
    state.events.publish(stored);

    if req.body.verdict == ReviewVerdict::ChangesRequested {
        state
            .insert_followup_coding_task(&req.task_id, &req.body.findings)
            .map_err(|e| RpcError::Infrastructure(e.to_string()))?;
    }

    Ok(Json(RpcResponse::ok(None)))
}

impl Serialize for ReviewVerdict {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            ReviewVerdict::Approved => s.serialize_str("approved"),
            ReviewVerdict::ChangesRequested => s.serialize_str("changes_requested"),
        }
    }
}

// ── get_context ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GetContextBody {
    pub task_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ContextPayload {
    pub brief: Option<String>,
    pub recent_events: Vec<Event>,
}

#[instrument(skip(state, req), fields(task_id = %req.task_id))]
async fn get_context(
    State(state): State<AppState>,
    Json(req): Json<RpcEnvelope<GetContextBody>>,
) -> RpcResult<ContextPayload> {
    authorize(&state, &req.session_token, &req.task_id)?;
    let lookup_task = req.body.task_id.as_deref().unwrap_or(&req.task_id);
    let brief = std::fs::read_to_string(state.config.brief_path(lookup_task)).ok();
    let recent_events = state
        .repo
        .read_events(Some(&EventSubject::Task(lookup_task.to_string())), None, Some(50))
        .map_err(|e| RpcError::Infrastructure(e.to_string()))?;

    Ok(Json(RpcResponse::ok(Some(ContextPayload { brief, recent_events }))))
}

// ── request_human_input ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RequestHumanInputBody {
    pub question: String,
    pub choices: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct HumanInputPayload {
    pub answer: Option<String>,
    pub timed_out: bool,
}

#[instrument(skip(state, req), fields(task_id = %req.task_id))]
async fn request_human_input(
    State(state): State<AppState>,
    Json(req): Json<RpcEnvelope<RequestHumanInputBody>>,
) -> RpcResult<HumanInputPayload> {
    authorize(&state, &req.session_token, &req.task_id)?;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let request_id = uuid::Uuid::new_v4().to_string();
    state.pending_human_input.lock().unwrap().insert(request_id.clone(), tx);

    let stored = state
        .repo
        .append_event(&Event::new(
            EventKind::HumanInputRequest,
            EventSubject::Task(req.task_id.clone()),
            serde_json::json!({
                "request_id": request_id,
                "question": req.body.question,
                "choices": req.body.choices,
            }),
        ))
        .map_err(|e| RpcError::Infrastructure(e.to_string()))?;
    state.events.publish(stored);

    let timeout = Duration::from_secs(state.human_input_timeout_secs);
    let payload = match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(answer)) => HumanInputPayload { answer: Some(answer), timed_out: false },
        _ => {
            state.pending_human_input.lock().unwrap().remove(&request_id);
            HumanInputPayload { answer: None, timed_out: true }
        }
    };

    Ok(Json(RpcResponse::ok(Some(payload))))
}

pub fn rpc_router() -> Router<AppState> {
    Router::new()
        .route("/rpc/report_progress", post(report_progress))
        .route("/rpc/report_completion", post(report_completion))
        .route("/rpc/report_failure", post(report_failure))
        .route("/rpc/report_review", post(report_review))
        .route("/rpc/get_context", post(get_context))
        .route("/rpc/request_human_input", post(request_human_input))
}
