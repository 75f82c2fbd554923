//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use turnover_core::config::GatewayConfig;
use turnover_scheduler::CoordinationWorkflow;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    /// Every callback resumes a suspended execution through this.
    pub workflow: Arc<CoordinationWorkflow>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(workflow: Arc<CoordinationWorkflow>) -> Self {
        Self {
            workflow,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    let cors = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));
    // Example: TURNOVER_CORS_ORIGINS=https://ops.example.com
    let cors = if let Ok(origins_str) = std::env::var("TURNOVER_CORS_ORIGINS") {
        let origins: Vec<_> = origins_str
            .split(',')
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();
        cors.allow_origin(origins)
    } else {
        cors.allow_origin(Any)
    };

    Router::new()
        .route("/health", get(super::routes::health_check))
        .route(
            "/api/v1/respond",
            get(super::routes::respond_page).post(super::routes::respond_json),
        )
        .route("/api/v1/respond/confirm", post(super::routes::respond_form))
        .route("/api/v1/executions", get(super::routes::list_open))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server. Runs until the listener fails.
pub async fn serve(config: &GatewayConfig, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
