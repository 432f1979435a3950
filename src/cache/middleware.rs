//! Response cache middleware for public feed pages.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    middleware::Next,
    response::Response,
};
use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::application::accounts::Viewer;

use super::{
    keys::ResponseKey,
    store::{ResponseCache, should_store_response},
};

const METRIC_CACHE_HIT: &str = "murmur_response_cache_hit_total";
const METRIC_CACHE_MISS: &str = "murmur_response_cache_miss_total";

/// Per-route cache state: the shared store plus the prefix that namespaces the route.
#[derive(Clone)]
pub struct CacheRoute {
    pub cache: Arc<ResponseCache>,
    pub prefix: &'static str,
}

impl CacheRoute {
    pub fn new(cache: Arc<ResponseCache>, prefix: &'static str) -> Self {
        Self { cache, prefix }
    }
}

/// Serve `GET` requests from the store while fresh; otherwise run the handler
/// and remember a successful result.
#[instrument(skip_all, fields(prefix = route.prefix, path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(route): State<CacheRoute>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let viewer = request
        .extensions()
        .get::<Viewer>()
        .and_then(Viewer::user_id);
    let key = ResponseKey::new(
        route.prefix,
        viewer,
        request.uri().path(),
        request.uri().query().unwrap_or(""),
    );

    if let Some(cached) = route.cache.get(&key) {
        counter!(METRIC_CACHE_HIT, "prefix" => route.prefix).increment(1);
        debug!(outcome = "hit", "serving cached response");
        return cached;
    }

    counter!(METRIC_CACHE_MISS, "prefix" => route.prefix).increment(1);
    debug!(outcome = "miss", "cache miss, executing handler");

    let response = next.run(request).await;
    if !should_store_response(&response) {
        return response;
    }

    match route.cache.store_response(key, response).await {
        Ok(response) => response,
        Err((response, error)) => {
            warn!(error = %error, "failed to cache response");
            response
        }
    }
}
