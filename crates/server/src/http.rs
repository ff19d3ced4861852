//! HTTP router

use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::ota;
use crate::state::AppState;
use crate::vision;
use crate::ws;

/// Create the application router.
///
/// CORS headers are applied by the layer on every response, error
/// statuses included.
pub fn create_router(state: AppState) -> Router {
    let ws_path = state.settings.server.ws_path.clone();

    Router::new()
        // device conversation endpoint
        .route(&ws_path, get(ws::ws_handler))
        // firmware
        .route("/ota", get(ota::ota_get).post(ota::ota_post))
        .route("/ota/bin/:filename", get(ota::ota_download))
        // vision Q&A
        .route("/vision", get(vision::vision_get).post(vision::vision_post))
        // health
        .route("/healthz", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.registry.count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use voiceline_config::Settings;

    #[test]
    fn test_router_creation() {
        let state = AppState::new(Settings::default());
        let _ = create_router(state);
    }
}
