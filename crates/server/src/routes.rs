//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::trace::trace_id_middleware;
use axum::Router;
use axum::middleware;
use axum::routing::{get, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::home_page))
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/logs/upload", put(handlers::upload_log))
        .route("/v1/logs/watch", get(handlers::watch_logs))
        // Catch-all so nested ids reach the handler and get a 400.
        .route("/v1/logs/get/{*rest}", get(handlers::get_log))
        .fallback(handlers::fallback);

    // The metrics endpoint is unauthenticated; restrict it at the network level.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Order of execution: TraceLayer -> trace id -> handler
    router
        .layer(middleware::from_fn(trace_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
