//! # SwKit Precache
//!
//! Precaching for the SwKit service-worker toolkit: a manifest of
//! `{url, revision}` entries, revision-qualified cache keys, install-time
//! population, and a route serving precached resources.
//!
//! ## Architecture
//!
//! ```text
//! PrecacheManifest (url → revision, deduplicated)
//!         │
//! PrecacheController
//!         ├── install: fetch each entry, store under its cache key
//!         ├── activate: drop cache keys no longer in the manifest
//!         └── cache_key_for_url: bare URL → revisioned key
//!         │
//! PrecacheRoute + PrecacheHandler (registered on the Router)
//! ```
//!
//! The cache key for a revisioned entry is the entry URL with the revision
//! appended as a reserved query parameter, so two revisions of one URL
//! never collide in the bucket.

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::{form_urlencoded, Url};

use swkit_cache::{normalize_cache_key, CacheStorage, IgnoreParamRule};
use swkit_routing::{
    FetchEvent, FetchResponse, Fetcher, Route, RouteHandler, RouteMatcher, Router, RoutingError,
};

/// Reserved query parameter carrying the entry revision in cache keys.
pub const REVISION_PARAM: &str = "__swk_revision__";

// ==================== Errors ====================

/// Errors that can occur in precaching.
#[derive(Error, Debug)]
pub enum PrecacheError {
    #[error("Conflicting precache entries for {url}: revision {existing:?} vs {conflicting:?}")]
    ConflictingEntry {
        url: String,
        existing: Option<String>,
        conflicting: Option<String>,
    },

    #[error("Invalid precache entry {url}: {message}")]
    InvalidEntry { url: String, message: String },

    #[error("URL is not in the precache manifest: {0}")]
    UnknownUrl(String),

    #[error("Failed to populate {url}")]
    Population {
        url: String,
        #[source]
        source: RoutingError,
    },
}

// ==================== Manifest ====================

/// One precached resource: a root-relative URL plus an opaque cache-busting
/// revision. A missing revision means the URL itself is revisioned (e.g. a
/// hashed filename); a constant placeholder revision is legal and simply
/// never busts the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheEntry {
    /// Root-relative path of the resource.
    pub url: String,

    /// Opaque revision token.
    #[serde(default)]
    pub revision: Option<String>,
}

impl PrecacheEntry {
    /// Create a revisioned entry.
    pub fn new(url: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revision: Some(revision.into()),
        }
    }

    /// Create an entry whose URL carries its own revision.
    pub fn unrevisioned(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revision: None,
        }
    }

    /// The bucket key this entry is stored under.
    pub fn cache_key(&self) -> String {
        match self.revision {
            Some(ref revision) => {
                let encoded: String = form_urlencoded::byte_serialize(revision.as_bytes()).collect();
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}{}={}", self.url, separator, REVISION_PARAM, encoded)
            }
            None => self.url.clone(),
        }
    }
}

/// A validated, deduplicated set of precache entries.
///
/// Exact duplicates collapse silently; one URL mapped to two different
/// revisions is a conflict.
#[derive(Debug, Clone, Default)]
pub struct PrecacheManifest {
    entries: Vec<PrecacheEntry>,
    by_url: HashMap<String, usize>,
}

impl PrecacheManifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest from an entry list.
    pub fn from_entries(
        entries: impl IntoIterator<Item = PrecacheEntry>,
    ) -> Result<Self, PrecacheError> {
        let mut manifest = Self::new();
        for entry in entries {
            manifest.add(entry)?;
        }
        Ok(manifest)
    }

    /// Add an entry, deduplicating and rejecting revision conflicts.
    pub fn add(&mut self, entry: PrecacheEntry) -> Result<(), PrecacheError> {
        if entry.url.is_empty() {
            return Err(PrecacheError::InvalidEntry {
                url: entry.url,
                message: "empty URL".to_string(),
            });
        }

        if let Some(&index) = self.by_url.get(&entry.url) {
            let existing = &self.entries[index];
            if existing.revision == entry.revision {
                debug!(url = %entry.url, "duplicate precache entry collapsed");
                return Ok(());
            }
            return Err(PrecacheError::ConflictingEntry {
                url: entry.url,
                existing: existing.revision.clone(),
                conflicting: entry.revision,
            });
        }

        self.by_url.insert(entry.url.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// The deduplicated entries, in insertion order.
    pub fn entries(&self) -> &[PrecacheEntry] {
        &self.entries
    }

    /// All manifest URLs.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.url.as_str())
    }

    /// All bucket keys the manifest maps to.
    pub fn cache_keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.cache_key()).collect()
    }

    /// Whether a URL is precached.
    pub fn contains(&self, url: &str) -> bool {
        self.by_url.contains_key(url)
    }

    /// The bucket key for a bare URL.
    pub fn cache_key_for_url(&self, url: &str) -> Option<String> {
        self.by_url
            .get(url)
            .map(|&index| self.entries[index].cache_key())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Controller ====================

/// Outcome of install-time population.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PrecacheStats {
    /// URLs fetched and stored by this install.
    pub updated: Vec<String>,
    /// URLs whose current revision was already cached.
    pub up_to_date: Vec<String>,
}

/// Owns the manifest and the precache bucket.
pub struct PrecacheController {
    manifest: PrecacheManifest,
    bucket: String,
    origin: Url,
    storage: Arc<RwLock<CacheStorage>>,
    ignore_rules: Vec<IgnoreParamRule>,
}

impl PrecacheController {
    /// Create a controller. `origin` is the worker scope origin that
    /// root-relative manifest URLs resolve against when fetching.
    pub fn new(
        manifest: PrecacheManifest,
        bucket: impl Into<String>,
        origin: Url,
        storage: Arc<RwLock<CacheStorage>>,
    ) -> Self {
        Self {
            manifest,
            bucket: bucket.into(),
            origin,
            storage,
            ignore_rules: Vec::new(),
        }
    }

    /// Strip matching query parameters from incoming requests before they
    /// are compared against the manifest.
    pub fn with_ignore_rules(mut self, rules: Vec<IgnoreParamRule>) -> Self {
        self.ignore_rules = rules;
        self
    }

    /// The manifest this controller serves.
    pub fn manifest(&self) -> &PrecacheManifest {
        &self.manifest
    }

    /// The bucket precached responses live in.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Populate the bucket from the manifest. Entries whose current cache
    /// key is already stored are skipped; any fetch failure fails the
    /// install.
    pub async fn install(&self, fetcher: &dyn Fetcher) -> Result<PrecacheStats, PrecacheError> {
        let mut stats = PrecacheStats::default();

        for entry in self.manifest.entries() {
            let key = entry.cache_key();

            let already_cached = {
                let storage = self.storage.read().await;
                storage
                    .get(&self.bucket)
                    .and_then(|cache| cache.match_key(&key))
                    .is_some()
            };
            if already_cached {
                stats.up_to_date.push(entry.url.clone());
                continue;
            }

            let resolved = self.origin.join(&entry.url).map_err(|e| {
                PrecacheError::InvalidEntry {
                    url: entry.url.clone(),
                    message: e.to_string(),
                }
            })?;

            let response = fetcher.fetch(&resolved).await.map_err(|source| {
                warn!(url = %entry.url, "precache population failed");
                PrecacheError::Population {
                    url: entry.url.clone(),
                    source,
                }
            })?;

            let mut storage = self.storage.write().await;
            storage
                .open(&self.bucket)
                .put(&key, response.to_entry(&key));
            stats.updated.push(entry.url.clone());
        }

        info!(
            bucket = %self.bucket,
            updated = stats.updated.len(),
            up_to_date = stats.up_to_date.len(),
            "precache populated"
        );
        Ok(stats)
    }

    /// Drop bucket keys that no longer correspond to a manifest entry.
    /// Returns the removed keys.
    pub async fn activate(&self) -> Vec<String> {
        let keep = self.manifest.cache_keys();
        let mut storage = self.storage.write().await;
        let removed = storage.open(&self.bucket).retain_keys(&keep);
        if !removed.is_empty() {
            info!(bucket = %self.bucket, removed = removed.len(), "outdated precache entries removed");
        }
        removed
    }

    /// The manifest URL an incoming request resolves to, if any.
    /// Query parameters matching the ignore rules do not affect the match.
    pub fn precached_url_for(&self, event: &FetchEvent) -> Option<String> {
        let normalized = normalize_cache_key(&event.request_key(), &self.ignore_rules);
        self.manifest.contains(&normalized).then_some(normalized)
    }

    /// The bucket key for a bare URL, honoring ignore rules.
    pub fn cache_key_for_url(&self, url: &str) -> Option<String> {
        let normalized = normalize_cache_key(url, &self.ignore_rules);
        self.manifest.cache_key_for_url(&normalized)
    }

    async fn serve_key(&self, key: &str) -> Option<FetchResponse> {
        let storage = self.storage.read().await;
        storage
            .get(&self.bucket)
            .and_then(|cache| cache.match_key(key))
            .map(FetchResponse::from_entry)
    }
}

// ==================== Routes ====================

/// Matches any request whose URL is in the manifest.
pub struct PrecacheRoute {
    controller: Arc<PrecacheController>,
}

impl PrecacheRoute {
    pub fn new(controller: Arc<PrecacheController>) -> Self {
        Self { controller }
    }
}

impl RouteMatcher for PrecacheRoute {
    fn matches(&self, event: &FetchEvent) -> bool {
        self.controller.precached_url_for(event).is_some()
    }
}

/// Serves precached responses, falling through to network (and
/// repopulating the bucket) on a miss.
pub struct PrecacheHandler {
    controller: Arc<PrecacheController>,
    fetcher: Arc<dyn Fetcher>,
}

impl PrecacheHandler {
    pub fn new(controller: Arc<PrecacheController>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { controller, fetcher }
    }
}

#[async_trait]
impl RouteHandler for PrecacheHandler {
    async fn handle(&self, event: &FetchEvent) -> Result<FetchResponse, RoutingError> {
        let key = self
            .controller
            .precached_url_for(event)
            .and_then(|url| self.controller.manifest.cache_key_for_url(&url))
            .ok_or_else(|| RoutingError::NoRouteMatched(event.url.to_string()))?;

        if let Some(response) = self.controller.serve_key(&key).await {
            debug!(%key, "serving precached response");
            return Ok(response);
        }

        debug!(%key, "precached response missing, refetching");
        let response = self.fetcher.fetch(&event.url).await?;
        if response.is_ok() {
            let mut storage = self.controller.storage.write().await;
            storage
                .open(&self.controller.bucket)
                .put(&key, response.to_entry(&key));
        }
        Ok(response)
    }
}

/// Serves one fixed precached URL regardless of the request, the shape a
/// navigation route takes when every in-app navigation should receive the
/// application shell.
pub struct PrecachedUrlHandler {
    controller: Arc<PrecacheController>,
    url: String,
}

impl PrecachedUrlHandler {
    /// Fails if `url` is not in the manifest.
    pub fn new(controller: Arc<PrecacheController>, url: impl Into<String>) -> Result<Self, PrecacheError> {
        let url = url.into();
        if !controller.manifest.contains(&url) {
            return Err(PrecacheError::UnknownUrl(url));
        }
        Ok(Self { controller, url })
    }
}

#[async_trait]
impl RouteHandler for PrecachedUrlHandler {
    async fn handle(&self, event: &FetchEvent) -> Result<FetchResponse, RoutingError> {
        let key = match self.controller.manifest.cache_key_for_url(&self.url) {
            Some(key) => key,
            None => {
                return Err(RoutingError::Fetch {
                    url: event.url.to_string(),
                    message: format!("{} dropped from the precache manifest", self.url),
                })
            }
        };

        match self.controller.serve_key(&key).await {
            Some(response) => {
                debug!(shell = %self.url, request = %event.url, "serving precached shell");
                Ok(response)
            }
            None => Err(RoutingError::Fetch {
                url: event.url.to_string(),
                message: format!("precached response for {} missing", self.url),
            }),
        }
    }
}

/// Register the manifest's route on a router: any precached URL is served
/// from the bucket, with network fallthrough.
pub fn precache_and_route(
    router: &mut Router,
    controller: Arc<PrecacheController>,
    fetcher: Arc<dyn Fetcher>,
) {
    let matcher = Arc::new(PrecacheRoute::new(controller.clone()));
    let handler = Arc::new(PrecacheHandler::new(controller, fetcher));
    router.register_route(Route::new(matcher, handler));
}
