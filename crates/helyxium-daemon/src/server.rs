//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api;
use crate::state::AppState;
use crate::ws;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // API routes
        .route("/api/status", get(api::get_status))
        .route("/api/snapshot", get(api::get_snapshot))
        .route("/api/devices", get(api::list_devices))
        .route("/api/devices/{vendor}/{model}", get(api::get_device))
        .route("/api/platforms", get(api::list_platforms))
        .route("/api/platforms/{platform}", get(api::get_platform))
        .route("/api/diagnostics", get(api::get_diagnostics))
        .route("/api/refresh", post(api::trigger_refresh))
        .route("/api/config", get(api::get_config))
        // WebSocket for real-time updates
        .route("/ws", get(ws::websocket_handler))
        // CORS
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // State
        .with_state(state)
}

/// Start the monitor and serve until the shutdown token is cancelled
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    state.spawn_monitor();

    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, "Starting web server");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Web server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_routes_are_mounted() {
        let app = router(test_state());
        for path in [
            "/api/status",
            "/api/snapshot",
            "/api/devices",
            "/api/platforms",
            "/api/platforms?running=true",
            "/api/diagnostics",
            "/api/config",
        ] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", path);
        }
    }

    #[tokio::test]
    async fn test_refresh_requires_post() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/api/refresh").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
