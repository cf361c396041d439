//! Browser-facing gateway in front of the pipeline host.
//!
//! Creates sessions upstream and relays each run's SSE stream chunk by chunk.

pub mod relay;
pub mod routes;
pub mod state;
pub mod upstream;

use std::path::PathBuf;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::state::GatewayState;

/// The full gateway app: `/api` routes, permissive CORS and an optional
/// static frontend as the fallback service.
pub fn app(state: GatewayState, ui_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(state);

    match ui_dir {
        Some(dir) if dir.exists() => {
            info!(ui_dir = %dir.display(), "serving static UI files");
            app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
        }
        Some(dir) => info!(ui_dir = %dir.display(), "UI directory not found, API-only mode"),
        None => {}
    }
    app
}
