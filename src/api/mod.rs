use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::chat::ChatService;

pub mod handlers;
pub mod models;

pub fn create_router(service: Arc<ChatService>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(handlers::health_handler))
        .route("/chat", post(handlers::chat_handler))
        .route("/test-search", get(handlers::test_search_handler))
        .with_state(service)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// CORS for the chat frontend. `*` allows any origin.
pub fn cors_layer(allowed_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origin.trim() == "*" {
        return cors.allow_origin(Any);
    }
    match HeaderValue::from_str(allowed_origin.trim()) {
        Ok(origin) => cors.allow_origin(origin),
        Err(e) => {
            log::warn!("ignoring invalid ALLOWED_ORIGIN {allowed_origin:?}: {e}");
            cors
        }
    }
}
