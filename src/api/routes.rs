//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, delete_handler, delete_tag_handler, get_handler, get_tag_handler,
    has_handler, health_handler, keys_handler, metadata_handler, reset_stats_handler,
    set_handler, stats_handler, touch_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/set", put(set_handler))
        .route("/get/:key", get(get_handler))
        .route("/has/:key", get(has_handler))
        .route("/meta/:key", get(metadata_handler))
        .route("/del/:key", delete(delete_handler))
        .route("/touch/:key", post(touch_handler))
        .route("/keys", get(keys_handler))
        .route("/tags/:tag", get(get_tag_handler).delete(delete_tag_handler))
        .route("/clear", post(clear_handler))
        .route("/stats", get(stats_handler))
        .route("/stats/reset", post(reset_stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
