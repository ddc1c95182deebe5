//! Router assembly: HTTP endpoints, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - JSON API under `/api/v1/...`
/// - CORS (allow any origin/method/headers); adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::http_health))
        // Quiz sessions
        .route(
            "/api/v1/quiz/:slug/session",
            post(http::http_create_session).get(http::http_quiz_info),
        )
        .route(
            "/api/v1/session/:id",
            get(http::http_get_session)
                .post(http::http_post_answer)
                .delete(http::http_abandon_session),
        )
        .route("/api/v1/session/:id/question/:index", get(http::http_get_question))
        // Learner progress
        .route("/api/v1/users/:user_id/mastery", get(http::http_user_mastery))
        .route("/api/v1/users/:user_id/badges", get(http::http_user_badges))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
