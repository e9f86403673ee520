//! Network fetch contract and the HTTP-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use tracing::trace;
use url::Url;

use swkit_common::{retry_with_backoff, with_timeout, RetryConfig};

use crate::{FetchResponse, RoutingError};

/// The network seam behind strategies and the catch-all fallback.
///
/// Strategies never talk to the network directly; tests substitute an
/// in-memory implementation.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, RoutingError>;
}

/// HTTP fetcher with per-attempt timeouts, retries with backoff, and an
/// overall deadline.
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryConfig,
    total_timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher with default retry and timeout policy.
    pub fn new() -> Result<Self, RoutingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            retry: RetryConfig::default(),
            total_timeout: Duration::from_secs(120),
        })
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the overall deadline covering all attempts.
    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = timeout;
        self
    }

    async fn fetch_once(&self, url: &Url) -> Result<FetchResponse, RoutingError> {
        trace!(%url, "network fetch");
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.to_string(), value.to_string());
            }
        }

        let body = response.bytes().await?.to_vec();

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            from_cache: false,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, RoutingError> {
        with_timeout(self.total_timeout, || {
            retry_with_backoff(&self.retry, || self.fetch_once(url))
        })
        .await
        .map_err(|_| RoutingError::Timeout(self.total_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_fetcher_builds() {
        let fetcher = HttpFetcher::new().unwrap();
        assert_eq!(fetcher.retry.max_attempts, RetryConfig::default().max_attempts);
    }

    #[test]
    fn test_http_fetcher_policy_overrides() {
        let fetcher = HttpFetcher::new()
            .unwrap()
            .with_retry(RetryConfig::none())
            .with_total_timeout(Duration::from_secs(5));
        assert_eq!(fetcher.retry.max_attempts, 1);
        assert_eq!(fetcher.total_timeout, Duration::from_secs(5));
    }
}
