//! Operator-only listener: cache control and health.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics::counter;
use serde::Serialize;
use tracing::info;

use crate::application::repos::HealthRepo;
use crate::cache::ResponseCache;

use super::db_health_response;
use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct AdminState {
    pub cache: Option<Arc<ResponseCache>>,
    pub health: Arc<dyn HealthRepo>,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/_cache/clear", post(clear_cache))
        .route("/_health/db", get(admin_health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Serialize)]
struct ClearedCache {
    removed: usize,
}

async fn clear_cache(State(state): State<AdminState>) -> Response {
    let removed = state.cache.as_ref().map_or(0, |cache| cache.clear());
    counter!("murmur_response_cache_cleared_total").increment(removed as u64);
    info!(
        target = "murmur::cache",
        removed,
        "response cache cleared"
    );
    (StatusCode::OK, Json(ClearedCache { removed })).into_response()
}

async fn admin_health(State(state): State<AdminState>) -> Response {
    db_health_response(state.health.ping().await)
}
