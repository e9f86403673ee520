//! Worker scope: configuration-driven wiring of precaching, routing, and
//! lifecycle handling.
//!
//! All configuration is explicit and immutable after startup. The scope
//! owns no lifecycle state; it reacts to the events the host dispatches.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::{trace, warn};
use url::Url;

use swkit_cache::{CacheStorage, IgnoreParamRule};
use swkit_precache::{
    precache_and_route, PrecacheController, PrecacheEntry, PrecacheManifest, PrecacheStats,
    PrecachedUrlHandler,
};
use swkit_routing::{
    CacheFirst, FetchEvent, FetchResponse, Fetcher, NetworkFallback, Route, RouteFilter, Router,
};

use crate::{
    ActivateEvent, InstallEvent, LifecycleController, MessageEvent, WorkerError, WorkerHost,
};

/// Static worker configuration: route table, ignore rules, bucket names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Scope origin that root-relative URLs resolve against.
    pub origin: String,

    /// Resources to precache.
    pub precache: Vec<PrecacheEntry>,

    /// Query parameters (by name pattern) that never affect cache keys.
    pub ignore_url_parameters: Vec<String>,

    /// Bucket precached responses live in.
    pub precache_bucket: String,

    /// Navigation route declaration.
    pub navigation: NavigationConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost".to_string(),
            precache: Vec::new(),
            ignore_url_parameters: Vec::new(),
            precache_bucket: "precache-v1".to_string(),
            navigation: NavigationConfig::default(),
        }
    }
}

/// The navigation route: one allow/deny filter plus a handler style.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Paths navigations must match.
    pub allow: Vec<String>,

    /// Paths navigations must not match. Deny wins.
    pub deny: Vec<String>,

    /// How matched navigations are served.
    pub handler: NavigationStyle,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
            handler: NavigationStyle::default(),
        }
    }
}

/// How the navigation route serves matched requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationStyle {
    /// Serve this precached URL (the application shell) for every matched
    /// navigation.
    PrecachedShell { url: String },

    /// Cache-first over a dedicated bucket.
    CacheFirst { bucket: String },
}

impl Default for NavigationStyle {
    fn default() -> Self {
        Self::CacheFirst {
            bucket: "default-handler-cache".to_string(),
        }
    }
}

/// A configured worker scope.
pub struct WorkerScope {
    controller: LifecycleController,
    precache: Arc<PrecacheController>,
    router: Router,
    fetcher: Arc<dyn Fetcher>,
    origin: Url,
}

impl WorkerScope {
    /// Wire up a scope from its configuration. The route table is built
    /// once here and immutable afterwards.
    pub fn new(
        config: WorkerConfig,
        host: Arc<dyn WorkerHost>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, WorkerError> {
        let origin = Url::parse(&config.origin)
            .map_err(|e| WorkerError::Config(format!("invalid origin '{}': {e}", config.origin)))?;

        let rules = IgnoreParamRule::compile_all(&config.ignore_url_parameters)?;
        let manifest = PrecacheManifest::from_entries(config.precache)?;
        let storage = Arc::new(RwLock::new(CacheStorage::new()));

        let precache = Arc::new(
            PrecacheController::new(
                manifest,
                &config.precache_bucket,
                origin.clone(),
                storage.clone(),
            )
            .with_ignore_rules(rules.clone()),
        );

        let mut router = Router::new();
        precache_and_route(&mut router, precache.clone(), fetcher.clone());

        let filter = RouteFilter::from_patterns(&config.navigation.allow, &config.navigation.deny)?;
        let handler: Arc<dyn swkit_routing::RouteHandler> = match config.navigation.handler {
            NavigationStyle::PrecachedShell { url } => {
                Arc::new(PrecachedUrlHandler::new(precache.clone(), url)?)
            }
            NavigationStyle::CacheFirst { bucket } => Arc::new(
                CacheFirst::new(bucket, storage, fetcher.clone()).with_ignore_rules(rules),
            ),
        };
        router.register_route(Route::navigation(filter, handler));
        router.set_catch_handler(Arc::new(NetworkFallback::new(fetcher.clone())));

        Ok(Self {
            controller: LifecycleController::new(host),
            precache,
            router,
            fetcher,
            origin,
        })
    }

    /// Install: request immediate promotion, then populate the precache.
    /// Skip-waiting is unconditional; a failed population fails install.
    pub async fn handle_install(&self) -> Result<PrecacheStats, WorkerError> {
        self.controller.on_install(&InstallEvent).await;
        let stats = self.precache.install(self.fetcher.as_ref()).await?;
        Ok(stats)
    }

    /// Activate: drop outdated precache entries and claim all clients.
    /// Does not return until the claim has resolved.
    pub async fn handle_activate(&self) -> Result<(), WorkerError> {
        self.precache.activate().await;
        let mut event = ActivateEvent::new();
        self.controller.on_activate(&mut event);
        event.finish().await
    }

    /// Message: react to structured client messages.
    pub async fn handle_message(&self, data: JsonValue) {
        self.controller.on_message(&MessageEvent::new(data)).await;
    }

    /// Fetch: resolve a request through the route table. Cross-origin
    /// requests bypass the table and go straight to network.
    pub async fn handle_fetch(&self, event: &FetchEvent) -> FetchResponse {
        if event.url.origin() != self.origin.origin() {
            trace!(url = %event.url, "cross-origin request, bypassing routes");
            return match self.fetcher.fetch(&event.url).await {
                Ok(response) => response,
                Err(error) => {
                    warn!(url = %event.url, %error, "cross-origin fetch failed");
                    FetchResponse::network_error()
                }
            };
        }
        self.router.handle_fetch(event).await
    }

    /// The precache controller (cache-key lookups, manifest inspection).
    pub fn precache(&self) -> &PrecacheController {
        &self.precache
    }
}
