//! # SwKit Routing
//!
//! Request routing for the SwKit service-worker toolkit.
//!
//! ## Design Goals
//!
//! 1. **Declarative routes**: allow/deny filters over request paths
//! 2. **Strategies**: cache-first serving with network fallthrough
//! 3. **Catch-all**: every request resolves, even on error or no match
//! 4. **Pluggable network**: strategies fetch through the [`Fetcher`] seam
//!
//! ## Architecture
//!
//! ```text
//! FetchEvent ──→ Router
//!                  ├── Route { matcher, handler } ──→ CacheFirst ──→ Cache / Fetcher
//!                  ├── Route { matcher, handler } ──→ ...
//!                  └── catch handler ──→ network fallback / explicit failure
//! ```

use hashbrown::HashMap;
use thiserror::Error;
use url::Url;

pub mod fetch;
pub mod route;
pub mod strategy;

pub use fetch::{Fetcher, HttpFetcher};
pub use route::{
    CatchHandler, NavigationRoute, NetworkFallback, Route, RouteFilter, RouteHandler,
    RouteMatcher, Router,
};
pub use strategy::{CacheFirst, NetworkOnly};

use swkit_cache::CacheEntry;

/// Errors that can occur in routing.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Invalid route pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Fetch timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("No route matched {0}")]
    NoRouteMatched(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A request flowing through the router.
///
/// Events carry only what routing and diagnostics need; bodies and
/// credentials stay with the host.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// Request URL (absolute).
    pub url: Url,

    /// Request method.
    pub method: String,

    /// Originating client, when known.
    pub client_id: Option<String>,

    /// Whether this is a full-page navigation request.
    pub is_navigation: bool,
}

impl FetchEvent {
    /// Create a navigation request event.
    pub fn navigation(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            client_id: None,
            is_navigation: true,
        }
    }

    /// Create a sub-resource request event.
    pub fn subresource(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            client_id: None,
            is_navigation: false,
        }
    }

    /// Attach the originating client id.
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// The root-relative form of the request URL (path plus query), which
    /// is what route filters and cache keys are compared against.
    pub fn request_key(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }
}

/// A response produced by a route handler or the catch-all fallback.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Status code (0 for a network error).
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether the response was served from cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a successful response.
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::new(),
            body,
            from_cache: false,
        }
    }

    /// Create the explicit network-error response. This is the resolved
    /// failure outcome the catch-all contract requires.
    pub fn network_error() -> Self {
        Self {
            status: 0,
            status_text: "Network Error".to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
            from_cache: false,
        }
    }

    /// Build a response from a stored cache entry.
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            status: entry.status,
            status_text: "OK".to_string(),
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }

    /// Convert into a cache entry stored under `key`.
    pub fn to_entry(&self, key: &str) -> CacheEntry {
        let mut entry = CacheEntry::new(key, self.status, self.body.clone());
        entry.headers = self.headers.clone();
        entry
    }

    /// Whether the status is in the success range.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_key_includes_query() {
        let event =
            FetchEvent::navigation(Url::parse("https://example.com/app?page=2").unwrap());
        assert_eq!(event.request_key(), "/app?page=2");

        let event = FetchEvent::subresource(Url::parse("https://example.com/app").unwrap());
        assert_eq!(event.request_key(), "/app");
    }

    #[test]
    fn test_response_entry_round_trip() {
        let response = FetchResponse::ok(b"body".to_vec());
        let entry = response.to_entry("/app");
        assert_eq!(entry.url, "/app");
        assert_eq!(entry.status, 200);

        let served = FetchResponse::from_entry(&entry);
        assert!(served.from_cache);
        assert_eq!(served.body, b"body".to_vec());
    }

    #[test]
    fn test_network_error_is_resolved_failure() {
        let response = FetchResponse::network_error();
        assert_eq!(response.status, 0);
        assert!(!response.is_ok());
    }
}
