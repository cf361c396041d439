//! HTTP client for the pipeline host.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{debug, instrument};

use orchestrator::server::RunRequest;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LIST_APPS_TIMEOUT: Duration = Duration::from_secs(5);
const CREATE_SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin wrapper over the host's `/list-apps`, session and `/run_sse` routes.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("build upstream http client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// App names the host advertises.
    pub async fn list_apps(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .get(self.url("/list-apps"))
            .timeout(LIST_APPS_TIMEOUT)
            .send()
            .await
            .context("request /list-apps")?;
        let status = response.status();
        if !status.is_success() {
            bail!("/list-apps returned {}", status.as_u16());
        }
        response.json().await.context("decode /list-apps")
    }

    /// Create a session under `app_name`, returning the host's session JSON.
    #[instrument(skip(self))]
    pub async fn create_session(&self, app_name: &str, user_id: &str) -> Result<Value> {
        let response = self
            .http
            .post(self.url(&format!("/apps/{app_name}/users/{user_id}/sessions")))
            .timeout(CREATE_SESSION_TIMEOUT)
            .json(&serde_json::json!({}))
            .send()
            .await
            .with_context(|| format!("create session under {app_name}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("app {app_name} rejected session creation ({}): {body}", status.as_u16());
        }
        response.json().await.context("decode session")
    }

    /// Start a streamed run. Only connection failures are errors here; the
    /// caller inspects the status.
    pub async fn run_sse(&self, request: &RunRequest) -> Result<reqwest::Response> {
        debug!(
            session_id = %request.session_id,
            parts = request.new_message.parts.len(),
            "forwarding run"
        );
        self.http
            .post(self.url("/run_sse"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .context("connect to orchestrator")
    }
}
