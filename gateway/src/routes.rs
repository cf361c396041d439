//! HTTP route handlers for the browser-facing API.

use std::path::{Path as FsPath, PathBuf};
use std::time::UNIX_EPOCH;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use orchestrator::core::event::{Content, Part};
use orchestrator::server::{ApiError, RunRequest};

use crate::relay::relay_response;
use crate::state::GatewayState;

pub const DEFAULT_USER_ID: &str = "web_user";

/// Build the API router.
pub fn api_router() -> Router<GatewayState> {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", post(create_session))
        .route("/query", post(query))
        .route("/reports/latest-pdf", get(latest_pdf))
        .route("/reports/download/{filename}", get(download_report))
}

/// GET /api/health
async fn health(State(state): State<GatewayState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "orchestrator_url": state.upstream.base_url(),
    }))
}

/// POST /api/sessions - the upstream session JSON.
async fn create_session(State(state): State<GatewayState>) -> Result<Json<Value>, ApiError> {
    state.create_session(DEFAULT_USER_ID).await.map(Json)
}

fn default_user_id() -> String {
    DEFAULT_USER_ID.to_string()
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub message_parts: Vec<Part>,
}

impl QueryRequest {
    /// `message_parts` wins; otherwise a non-empty `message` becomes one text part.
    fn into_content(self) -> Option<Content> {
        if !self.message_parts.is_empty() {
            return Some(Content::new(self.message_parts));
        }
        self.message
            .filter(|message| !message.trim().is_empty())
            .map(Content::text)
    }
}

/// POST /api/query - relays the run's SSE stream.
#[instrument(skip_all, fields(session_id = %request.session_id, user_id = %request.user_id))]
async fn query(
    State(state): State<GatewayState>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, ApiError> {
    let user_id = request.user_id.clone();
    let session_id = request.session_id.clone();
    let Some(new_message) = request.into_content() else {
        return Err(ApiError::bad_request(
            "Either message or message_parts must be provided",
        ));
    };

    let run = RunRequest {
        app_name: state.app_name().to_string(),
        user_id,
        session_id,
        new_message,
        streaming: true,
    };
    let upstream = state
        .upstream
        .run_sse(&run)
        .await
        .map_err(|err| ApiError::unavailable(format!("Cannot connect to orchestrator: {err:#}")))?;
    info!(status = upstream.status().as_u16(), "relaying run");

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(relay_response(upstream)),
    )
        .into_response())
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct LatestReport {
    pub file_path: String,
    pub filename: String,
    /// Modification time, seconds since the Unix epoch.
    pub created: f64,
}

/// GET /api/reports/latest-pdf
async fn latest_pdf(State(state): State<GatewayState>) -> Result<Json<LatestReport>, ApiError> {
    newest_report(&state.reports_dir)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No PDF reports found"))
}

fn is_report_pdf(filename: &str) -> bool {
    filename.starts_with("report_")
        && filename.ends_with(".pdf")
        && !filename.contains(['/', '\\'])
        && !filename.contains("..")
}

async fn newest_report(dir: &FsPath) -> Option<LatestReport> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut newest: Option<(f64, PathBuf, String)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !is_report_pdf(&name) {
            continue;
        }
        let Ok(modified) = entry.metadata().await.and_then(|meta| meta.modified()) else {
            continue;
        };
        let created = modified
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |elapsed| elapsed.as_secs_f64());
        if newest.as_ref().is_none_or(|(best, _, _)| created > *best) {
            newest = Some((created, entry.path(), name));
        }
    }
    newest.map(|(created, path, filename)| LatestReport {
        file_path: path.display().to_string(),
        filename,
        created,
    })
}

/// GET /api/reports/download/{filename}
async fn download_report(
    State(state): State<GatewayState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    if !is_report_pdf(&filename) {
        return Err(ApiError::bad_request("Invalid filename"));
    }
    let path = state.reports_dir.join(&filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("Report not found"));
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "failed to read report");
            return Err(ApiError::new(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read report",
            ));
        }
    };
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(value: Value) -> QueryRequest {
        serde_json::from_value(value).expect("query request")
    }

    #[test]
    fn message_parts_win_over_message() {
        let content = request(json!({
            "session_id": "s",
            "message": "ignored",
            "message_parts": [{"text": "diagram attached"}]
        }))
        .into_content();
        assert_eq!(content, Some(Content::text("diagram attached")));
    }

    #[test]
    fn blank_query_has_no_content() {
        let query = request(json!({"session_id": "s", "message": "  "}));
        assert_eq!(query.user_id, DEFAULT_USER_ID);
        assert_eq!(query.into_content(), None);
    }

    #[test]
    fn report_filenames_are_restricted() {
        assert!(is_report_pdf("report_20260101_120000.pdf"));
        assert!(!is_report_pdf("notes.pdf"));
        assert!(!is_report_pdf("report_x.md"));
        assert!(!is_report_pdf("report_..pdf"));
    }

    #[tokio::test]
    async fn newest_report_ignores_other_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(newest_report(temp.path()).await, None);

        std::fs::write(temp.path().join("report_a.md"), "# md").expect("write md");
        std::fs::write(temp.path().join("report_a.pdf"), "%PDF").expect("write pdf");
        let latest = newest_report(temp.path()).await.expect("latest");
        assert_eq!(latest.filename, "report_a.pdf");
        assert!(latest.created > 0.0);
    }
}
