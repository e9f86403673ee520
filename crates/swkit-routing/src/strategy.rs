//! Caching strategies.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use swkit_cache::{normalize_cache_key, CacheStorage, IgnoreParamRule};

use crate::fetch::Fetcher;
use crate::route::RouteHandler;
use crate::{FetchEvent, FetchResponse, RoutingError};

/// Serve from a named bucket if present; otherwise fetch from network and
/// populate the bucket.
pub struct CacheFirst {
    bucket: String,
    storage: Arc<RwLock<CacheStorage>>,
    fetcher: Arc<dyn Fetcher>,
    ignore_rules: Vec<IgnoreParamRule>,
}

impl CacheFirst {
    pub fn new(
        bucket: impl Into<String>,
        storage: Arc<RwLock<CacheStorage>>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            storage,
            fetcher,
            ignore_rules: Vec::new(),
        }
    }

    /// Strip matching query parameters before key comparison.
    pub fn with_ignore_rules(mut self, rules: Vec<IgnoreParamRule>) -> Self {
        self.ignore_rules = rules;
        self
    }

    /// The bucket this strategy reads and writes.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl RouteHandler for CacheFirst {
    async fn handle(&self, event: &FetchEvent) -> Result<FetchResponse, RoutingError> {
        let key = normalize_cache_key(&event.request_key(), &self.ignore_rules);

        {
            let storage = self.storage.read().await;
            if let Some(entry) = storage.get(&self.bucket).and_then(|c| c.match_key(&key)) {
                debug!(bucket = %self.bucket, %key, "cache hit");
                return Ok(FetchResponse::from_entry(entry));
            }
        }

        trace!(bucket = %self.bucket, %key, "cache miss, fetching");
        let response = self.fetcher.fetch(&event.url).await?;
        if response.is_ok() {
            let mut storage = self.storage.write().await;
            storage.open(&self.bucket).put(&key, response.to_entry(&key));
        }
        Ok(response)
    }
}

/// Always fetch from network; never touches a cache.
pub struct NetworkOnly {
    fetcher: Arc<dyn Fetcher>,
}

impl NetworkOnly {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl RouteHandler for NetworkOnly {
    async fn handle(&self, event: &FetchEvent) -> Result<FetchResponse, RoutingError> {
        self.fetcher.fetch(&event.url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use url::Url;

    struct StubFetcher {
        calls: AtomicU32,
        fail: bool,
    }

    impl StubFetcher {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, url: &Url) -> Result<FetchResponse, RoutingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RoutingError::Fetch {
                    url: url.to_string(),
                    message: "unreachable".to_string(),
                });
            }
            Ok(FetchResponse::ok(url.path().as_bytes().to_vec()))
        }
    }

    fn nav(url: &str) -> FetchEvent {
        FetchEvent::navigation(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_cache_first_populates_on_miss() {
        let storage = Arc::new(RwLock::new(CacheStorage::new()));
        let fetcher = Arc::new(StubFetcher::new());
        let strategy = CacheFirst::new("default-handler-cache", storage.clone(), fetcher.clone());

        let response = strategy.handle(&nav("https://example.com/app")).await.unwrap();
        assert!(!response.from_cache);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        let storage = storage.read().await;
        assert!(storage
            .get("default-handler-cache")
            .unwrap()
            .match_key("/app")
            .is_some());
    }

    #[tokio::test]
    async fn test_cache_first_serves_from_cache_on_hit() {
        let storage = Arc::new(RwLock::new(CacheStorage::new()));
        let fetcher = Arc::new(StubFetcher::new());
        let strategy = CacheFirst::new("bucket", storage, fetcher.clone());

        let event = nav("https://example.com/app");
        strategy.handle(&event).await.unwrap();
        let second = strategy.handle(&event).await.unwrap();

        assert!(second.from_cache);
        // The network was only consulted for the first request.
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_first_key_ignores_configured_params() {
        let storage = Arc::new(RwLock::new(CacheStorage::new()));
        let fetcher = Arc::new(StubFetcher::new());
        let strategy = CacheFirst::new("bucket", storage, fetcher.clone())
            .with_ignore_rules(vec![IgnoreParamRule::new("hash").unwrap()]);

        strategy
            .handle(&nav("https://example.com/app?hash=v1"))
            .await
            .unwrap();
        let second = strategy
            .handle(&nav("https://example.com/app?hash=v2"))
            .await
            .unwrap();

        assert!(second.from_cache);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_first_error_propagates_without_caching() {
        let storage = Arc::new(RwLock::new(CacheStorage::new()));
        let fetcher = Arc::new(StubFetcher::failing());
        let strategy = CacheFirst::new("bucket", storage.clone(), fetcher);

        let result = strategy.handle(&nav("https://example.com/app")).await;
        assert!(result.is_err());
        assert!(storage.read().await.get("bucket").is_none());
    }

    #[tokio::test]
    async fn test_network_only_never_caches() {
        let fetcher = Arc::new(StubFetcher::new());
        let strategy = NetworkOnly::new(fetcher.clone());

        let event = nav("https://example.com/data");
        strategy.handle(&event).await.unwrap();
        let second = strategy.handle(&event).await.unwrap();

        assert!(!second.from_cache);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}
