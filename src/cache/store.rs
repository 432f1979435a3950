//! In-memory store for rendered page responses.

use std::sync::RwLock;
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use lru::LruCache;
use thiserror::Error;
use tokio::time::Instant;

use super::config::CacheConfig;
use super::keys::ResponseKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

#[derive(Debug, Clone)]
pub struct CachedResponse {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
    expires_at: Instant,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: &HeaderMap, body: Bytes, expires_at: Instant) -> Self {
        Self {
            status,
            headers: headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            body,
            expires_at,
        }
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            headers.append(name, value);
        }
        response
    }
}

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("failed to buffer response body: {0}")]
    Buffer(String),
}

/// TTL-bounded, LRU-evicted response store. Entries are never invalidated by
/// writes; they simply expire.
pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<LruCache<ResponseKey, CachedResponse>>,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl,
            entries: RwLock::new(LruCache::new(config.max_entries)),
        }
    }

    /// Return a fresh copy of the stored response. Expired entries are dropped.
    pub fn get(&self, key: &ResponseKey) -> Option<Response> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        match entries.get(key) {
            Some(cached) if cached.is_fresh(now) => Some(cached.clone().into_response()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Buffer `response`, remember it under `key` and hand back an equivalent response.
    pub async fn store_response(
        &self,
        key: ResponseKey,
        response: Response,
    ) -> Result<Response, (Response, CacheStoreError)> {
        let expires_at = Instant::now() + self.ttl;
        let (rebuilt, cached) = buffer_response(response, expires_at).await?;
        rw_write(&self.entries, SOURCE, "store").put(key, cached);
        Ok(rebuilt)
    }

    /// Drop every entry regardless of prefix. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Only complete, cookie-free 200 responses are shared between requests.
pub fn should_store_response(response: &Response) -> bool {
    response.status() == StatusCode::OK && !response.headers().contains_key(header::SET_COOKIE)
}

pub async fn buffer_response(
    response: Response,
    expires_at: Instant,
) -> Result<(Response, CachedResponse), (Response, CacheStoreError)> {
    let (parts, body) = response.into_parts();
    match BodyExt::collect(body).await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            let cached =
                CachedResponse::new(parts.status, &parts.headers, bytes.clone(), expires_at);
            Ok((Response::from_parts(parts, Body::from(bytes)), cached))
        }
        Err(error) => {
            let rebuilt = Response::from_parts(parts, Body::empty());
            Err((rebuilt, CacheStoreError::Buffer(error.to_string())))
        }
    }
}
