//! Shared gateway state and app-name discovery.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use orchestrator::core::types::PIPELINE_NAME;
use orchestrator::server::ApiError;

use crate::upstream::UpstreamClient;

/// Names tried, in order, when the host advertises one of them.
pub const APP_NAME_CANDIDATES: [&str; 4] = [
    "threat_model_orchestrator",
    "threat_modeller_orchestrator",
    "orchestrator",
    "threat_model_orchestrator_agent",
];

/// Names tried when `/list-apps` is unavailable or matches nothing.
pub const FALLBACK_APP_NAMES: [&str; 2] = [PIPELINE_NAME, "orchestrator"];

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub upstream: UpstreamClient,
    /// Directory scanned for rendered PDF reports.
    pub reports_dir: PathBuf,
    app_name: Arc<OnceCell<String>>,
}

impl GatewayState {
    pub fn new(upstream: UpstreamClient, reports_dir: PathBuf) -> Self {
        Self {
            upstream,
            reports_dir,
            app_name: Arc::new(OnceCell::new()),
        }
    }

    /// The discovered app name, or the pipeline's default before discovery.
    pub fn app_name(&self) -> &str {
        self.app_name.get().map_or(PIPELINE_NAME, String::as_str)
    }

    /// Create a session, discovering the host's app name on first use.
    pub async fn create_session(&self, user_id: &str) -> Result<Value, ApiError> {
        if let Some(name) = self.app_name.get() {
            return self
                .upstream
                .create_session(name, user_id)
                .await
                .map_err(|err| ApiError::unavailable(format!("Orchestrator unavailable: {err:#}")));
        }

        let (name, session) = self.discover(user_id).await?;
        info!(app_name = %name, "discovered orchestrator app");
        // A concurrent discovery may have won; both names came from the host.
        let _ = self.app_name.set(name);
        Ok(session)
    }

    async fn discover(&self, user_id: &str) -> Result<(String, Value), ApiError> {
        let names = match self.upstream.list_apps().await {
            Ok(apps) => candidate_names(&apps),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "list-apps failed, trying fallback names");
                FALLBACK_APP_NAMES.iter().map(|s| s.to_string()).collect()
            }
        };

        let mut failures = Vec::new();
        for name in names {
            match self.upstream.create_session(&name, user_id).await {
                Ok(session) => return Ok((name, session)),
                Err(err) => {
                    warn!(app_name = %name, err = %format!("{err:#}"), "session creation failed");
                    failures.push(format!("{name}: {err:#}"));
                }
            }
        }
        Err(ApiError::unavailable(format!(
            "Orchestrator at {} is unreachable or rejected every app name ({})",
            self.upstream.base_url(),
            failures.join("; ")
        )))
    }
}

/// Candidate names present in `apps`, in preference order, then the
/// fallbacks not already listed.
fn candidate_names(apps: &[String]) -> Vec<String> {
    let mut names: Vec<String> = APP_NAME_CANDIDATES
        .iter()
        .filter(|candidate| apps.iter().any(|app| app == *candidate))
        .map(|s| s.to_string())
        .collect();
    if names.is_empty() {
        names.extend(apps.first().cloned());
    }
    for fallback in FALLBACK_APP_NAMES {
        if !names.iter().any(|name| name == fallback) {
            names.push(fallback.to_string());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn known_candidates_come_first() {
        let names = candidate_names(&owned(&["other", "orchestrator"]));
        assert_eq!(names, owned(&["orchestrator", PIPELINE_NAME]));
    }

    #[test]
    fn unknown_apps_use_first_listed_then_fallbacks() {
        let names = candidate_names(&owned(&["custom_app"]));
        assert_eq!(names, owned(&["custom_app", PIPELINE_NAME, "orchestrator"]));
    }

    #[test]
    fn empty_listing_uses_fallbacks() {
        assert_eq!(candidate_names(&[]), owned(&FALLBACK_APP_NAMES));
    }

    #[test]
    fn app_name_defaults_before_discovery() {
        let state = GatewayState::new(
            UpstreamClient::new("http://127.0.0.1:1").expect("client"),
            PathBuf::from("reports"),
        );
        assert_eq!(state.app_name(), PIPELINE_NAME);
    }
}
