use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Deserialize;

use super::AppState;
use super::rpc::rpc_router;

/// Build the full router: RPC routes plus `/health` and the local
/// `/admin/kill` route `tc kill` posts to — a separate process from
/// the one holding the live session, so this is the only channel it
/// has to reach it.
pub fn build_router(state: AppState) -> Router {
    rpc_router()
        .route("/health", get(health_check))
        .route("/admin/kill", post(admin_kill))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct AdminKillBody {
    session_id: Option<uuid::Uuid>,
    #[serde(default)]
    force: bool,
}

async fn admin_kill(State(state): State<AppState>, axum::Json(body): axum::Json<AdminKillBody>) -> impl IntoResponse {
    state.request_kill(body.session_id, body.force);
    StatusCode::ACCEPTED
}

/// Bind a loopback listener and serve until Ctrl+C, returning the
/// bound address so the caller can record it into `.mcp.json`.
pub async fn start_server(state: AppState, port: u16) -> Result<std::net::SocketAddr> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("failed to bind control-plane listener on port {port}"))?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;
    });

    Ok(addr)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event_bus::EventBus;
    use crate::repository::Repository;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let repo = Repository::new_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf()).unwrap();
        AppState::new(repo, config, "proj".into(), std::sync::Arc::new(EventBus::new(16)))
    }

    #[tokio::test]
    async fn health_check_returns_200() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
