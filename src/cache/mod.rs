//! Short-lived response cache for public feed pages.
//!
//! Cached pages are keyed by route prefix, viewer, path and query string and
//! expire after `cache.ttl_seconds`. Writes never invalidate entries; operators
//! can drop everything through the admin listener.

mod config;
mod keys;
mod lock;
mod middleware;
mod store;

pub use config::CacheConfig;
pub use keys::ResponseKey;
pub use middleware::{CacheRoute, response_cache_layer};
pub use store::{
    CacheStoreError, CachedResponse, ResponseCache, buffer_response, should_store_response,
};
