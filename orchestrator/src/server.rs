//! HTTP host for the pipeline: session management and SSE runs.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::core::event::Content;
use crate::pipeline::Pipeline;
use crate::session::{Session, SessionHandle, SessionStore};

/// Error response rendered as `{"detail": ...}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Shared state for every host handler.
#[derive(Clone)]
pub struct HostState {
    pub app_name: String,
    pub pipeline: Arc<Pipeline>,
    pub sessions: SessionStore,
}

impl HostState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            app_name: pipeline.name().to_string(),
            pipeline: Arc::new(pipeline),
            sessions: SessionStore::new(),
        }
    }

    fn check_app(&self, app_name: &str) -> Result<(), ApiError> {
        if app_name == self.app_name {
            Ok(())
        } else {
            Err(ApiError::not_found(format!("App not found: {app_name}")))
        }
    }

    async fn session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<SessionHandle, ApiError> {
        self.check_app(app_name)?;
        self.sessions
            .get(app_name, user_id, session_id)
            .await
            .ok_or_else(|| ApiError::not_found(format!("Session not found: {session_id}")))
    }
}

/// Body of `POST /run_sse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub new_message: Content,
    /// Accepted for compatibility; events are always streamed whole.
    #[serde(default)]
    pub streaming: bool,
}

pub fn router(state: HostState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/list-apps", get(list_apps))
        .route("/apps/{app}/users/{user}/sessions", post(create_session))
        .route("/apps/{app}/users/{user}/sessions/{id}", get(get_session))
        .route("/run_sse", post(run_sse))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: HostState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, app_name = %state.app_name, "pipeline host listening");
    axum::serve(listener, router(state))
        .await
        .context("serve pipeline host")
}

async fn health() -> &'static str {
    "ok"
}

/// GET /list-apps
async fn list_apps(State(state): State<HostState>) -> Json<Vec<String>> {
    Json(vec![state.app_name.clone()])
}

/// POST /apps/{app}/users/{user}/sessions
async fn create_session(
    State(state): State<HostState>,
    Path((app, user)): Path<(String, String)>,
) -> Result<Json<Session>, ApiError> {
    state.check_app(&app)?;
    let handle = state.sessions.create(&app, &user).await;
    Ok(Json(handle.snapshot().await))
}

/// GET /apps/{app}/users/{user}/sessions/{id}
async fn get_session(
    State(state): State<HostState>,
    Path((app, user, id)): Path<(String, String, String)>,
) -> Result<Json<Session>, ApiError> {
    let handle = state.session(&app, &user, &id).await?;
    Ok(Json(handle.snapshot().await))
}

/// POST /run_sse - one `data:` frame per pipeline event.
#[instrument(skip_all, fields(session_id = %request.session_id, user_id = %request.user_id))]
async fn run_sse(
    State(state): State<HostState>,
    Json(request): Json<RunRequest>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let session = state
        .session(&request.app_name, &request.user_id, &request.session_id)
        .await?;
    if request.new_message.is_empty() {
        return Err(ApiError::bad_request("new_message must contain at least one part"));
    }
    info!(parts = request.new_message.parts.len(), "starting streamed run");

    let events = Arc::clone(&state.pipeline).stream(session, request.new_message);
    let frames = events.filter_map(|event| async move {
        match serde_json::to_string(&event) {
            Ok(json) => Some(Ok::<_, Infallible>(SseEvent::default().data(json))),
            Err(err) => {
                warn!(err = %err, ordinal = event.ordinal, "failed to encode event");
                None
            }
        }
    });
    Ok(Sse::new(frames).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingArtifacts, ScriptedInvoker, threat_model_pipeline};

    fn state() -> HostState {
        HostState::new(threat_model_pipeline(
            Arc::new(ScriptedInvoker::new()),
            Arc::new(RecordingArtifacts::new()),
            1,
        ))
    }

    #[tokio::test]
    async fn unknown_app_is_not_found() {
        let err = state()
            .session("nope", "user", "missing")
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert!(err.detail.contains("App not found"));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let state = state();
        let app = state.app_name.clone();
        let err = state.session(&app, "user", "missing").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn api_error_renders_detail() {
        let response = ApiError::unavailable("down").into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn run_request_defaults_streaming() {
        let request: RunRequest = serde_json::from_value(json!({
            "app_name": "a",
            "user_id": "u",
            "session_id": "s",
            "new_message": {"parts": [{"text": "hi"}]}
        }))
        .expect("parse");
        assert!(!request.streaming);
        assert_eq!(request.new_message, Content::text("hi"));
    }
}
