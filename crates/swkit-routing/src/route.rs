//! Route filters, route registration, and the router.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, trace, warn};

use crate::fetch::Fetcher;
use crate::{FetchEvent, FetchResponse, RoutingError};

/// An allow/deny filter over request paths.
///
/// A path matches iff it matches any `allow` pattern and no `deny` pattern.
/// An empty allow list admits every path, so a filter can be deny-only.
#[derive(Debug, Clone, Default)]
pub struct RouteFilter {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl RouteFilter {
    /// Create an empty filter (matches every path).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an allow pattern.
    pub fn allow(mut self, pattern: &str) -> Result<Self, RoutingError> {
        self.allow.push(compile(pattern)?);
        Ok(self)
    }

    /// Add a deny pattern. Deny wins over allow.
    pub fn deny(mut self, pattern: &str) -> Result<Self, RoutingError> {
        self.deny.push(compile(pattern)?);
        Ok(self)
    }

    /// Compile a filter from pattern lists.
    pub fn from_patterns(allow: &[String], deny: &[String]) -> Result<Self, RoutingError> {
        let mut filter = Self::new();
        for pattern in allow {
            filter = filter.allow(pattern)?;
        }
        for pattern in deny {
            filter = filter.deny(pattern)?;
        }
        Ok(filter)
    }

    /// Check a request path against the filter.
    pub fn matches(&self, path: &str) -> bool {
        if self.deny.iter().any(|re| re.is_match(path)) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|re| re.is_match(path))
    }
}

fn compile(pattern: &str) -> Result<Regex, RoutingError> {
    Regex::new(pattern).map_err(|source| RoutingError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Decides whether a route applies to a request.
pub trait RouteMatcher: Send + Sync {
    fn matches(&self, event: &FetchEvent) -> bool;
}

/// Produces a response for a matched request.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, event: &FetchEvent) -> Result<FetchResponse, RoutingError>;
}

/// A matcher that applies only to full-page navigations passing a filter.
#[derive(Debug, Clone)]
pub struct NavigationRoute {
    filter: RouteFilter,
}

impl NavigationRoute {
    pub fn new(filter: RouteFilter) -> Self {
        Self { filter }
    }
}

impl RouteMatcher for NavigationRoute {
    fn matches(&self, event: &FetchEvent) -> bool {
        event.is_navigation && self.filter.matches(event.url.path())
    }
}

/// A registered route: a matcher paired with a handler.
pub struct Route {
    matcher: Arc<dyn RouteMatcher>,
    handler: Arc<dyn RouteHandler>,
}

impl Route {
    pub fn new(matcher: Arc<dyn RouteMatcher>, handler: Arc<dyn RouteHandler>) -> Self {
        Self { matcher, handler }
    }

    /// Convenience constructor for a navigation route.
    pub fn navigation(filter: RouteFilter, handler: Arc<dyn RouteHandler>) -> Self {
        Self::new(Arc::new(NavigationRoute::new(filter)), handler)
    }
}

/// Handles requests no route resolved. Must always return a response;
/// a pending or missing outcome is not an option.
#[async_trait]
pub trait CatchHandler: Send + Sync {
    async fn catch(&self, event: &FetchEvent, reason: &RoutingError) -> FetchResponse;
}

/// The default catch-all: log the triggering event, then fall back to a
/// plain network fetch, degrading to the explicit failure response.
pub struct NetworkFallback {
    fetcher: Arc<dyn Fetcher>,
}

impl NetworkFallback {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl CatchHandler for NetworkFallback {
    async fn catch(&self, event: &FetchEvent, reason: &RoutingError) -> FetchResponse {
        debug!(url = %event.url, method = %event.method, client = ?event.client_id, %reason, "catch handler invoked");
        match self.fetcher.fetch(&event.url).await {
            Ok(response) => response,
            Err(error) => {
                warn!(url = %event.url, %error, "catch-all network fallback failed");
                FetchResponse::network_error()
            }
        }
    }
}

/// Ordered route table with a catch-all fallback.
///
/// Routes are consulted in registration order; the first whose matcher
/// accepts the event handles it. Handler errors and unmatched requests go
/// to the catch handler, so `handle_fetch` always resolves.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    catch: Option<Arc<dyn CatchHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Order of registration is match order.
    pub fn register_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Install the catch-all handler.
    pub fn set_catch_handler(&mut self, handler: Arc<dyn CatchHandler>) {
        self.catch = Some(handler);
    }

    /// Number of registered routes.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Resolve a request to a response.
    pub async fn handle_fetch(&self, event: &FetchEvent) -> FetchResponse {
        for (index, route) in self.routes.iter().enumerate() {
            if !route.matcher.matches(event) {
                continue;
            }
            trace!(url = %event.url, index, "route matched");
            match route.handler.handle(event).await {
                Ok(response) => return response,
                Err(error) => {
                    warn!(url = %event.url, index, %error, "route handler failed");
                    return self.run_catch(event, &error).await;
                }
            }
        }

        trace!(url = %event.url, "no route matched");
        let reason = RoutingError::NoRouteMatched(event.url.to_string());
        self.run_catch(event, &reason).await
    }

    async fn run_catch(&self, event: &FetchEvent, reason: &RoutingError) -> FetchResponse {
        match self.catch {
            Some(ref handler) => handler.catch(event, reason).await,
            None => {
                warn!(url = %event.url, %reason, "no catch handler installed");
                FetchResponse::network_error()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn nav(url: &str) -> FetchEvent {
        FetchEvent::navigation(Url::parse(url).unwrap())
    }

    struct FixedHandler(u16);

    #[async_trait]
    impl RouteHandler for FixedHandler {
        async fn handle(&self, _event: &FetchEvent) -> Result<FetchResponse, RoutingError> {
            let mut response = FetchResponse::ok(Vec::new());
            response.status = self.0;
            Ok(response)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl RouteHandler for FailingHandler {
        async fn handle(&self, event: &FetchEvent) -> Result<FetchResponse, RoutingError> {
            Err(RoutingError::Fetch {
                url: event.url.to_string(),
                message: "boom".to_string(),
            })
        }
    }

    struct CountingCatch(std::sync::atomic::AtomicU32);

    #[async_trait]
    impl CatchHandler for CountingCatch {
        async fn catch(&self, _event: &FetchEvent, _reason: &RoutingError) -> FetchResponse {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            FetchResponse::network_error()
        }
    }

    #[test]
    fn test_filter_allow_and_deny() {
        let filter = RouteFilter::new()
            .allow(r"^/app")
            .unwrap()
            .deny(r"^/app/service-worker\.js")
            .unwrap();

        assert!(filter.matches("/app"));
        assert!(filter.matches("/app/anything"));
        assert!(!filter.matches("/app/service-worker.js"));
        assert!(!filter.matches("/admin"));
    }

    #[test]
    fn test_empty_allow_admits_all_paths() {
        let filter = RouteFilter::new()
            .deny(r"^/service-worker\.js")
            .unwrap();

        assert!(filter.matches("/"));
        assert!(filter.matches("/anything/else"));
        assert!(!filter.matches("/service-worker.js"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            RouteFilter::new().allow("("),
            Err(RoutingError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_navigation_route_ignores_subresources() {
        let filter = RouteFilter::new().allow(r"^/app").unwrap();
        let route = NavigationRoute::new(filter);

        assert!(route.matches(&nav("https://example.com/app/page")));

        let sub = FetchEvent::subresource(Url::parse("https://example.com/app/page").unwrap());
        assert!(!route.matches(&sub));
    }

    #[tokio::test]
    async fn test_router_first_match_wins() {
        let mut router = Router::new();
        router.register_route(Route::navigation(
            RouteFilter::new().allow(r"^/app").unwrap(),
            Arc::new(FixedHandler(201)),
        ));
        router.register_route(Route::navigation(
            RouteFilter::new().allow(r"^/").unwrap(),
            Arc::new(FixedHandler(202)),
        ));

        let response = router.handle_fetch(&nav("https://example.com/app/x")).await;
        assert_eq!(response.status, 201);

        let response = router.handle_fetch(&nav("https://example.com/other")).await;
        assert_eq!(response.status, 202);
    }

    #[tokio::test]
    async fn test_unmatched_request_reaches_catch_handler() {
        let catch = Arc::new(CountingCatch(std::sync::atomic::AtomicU32::new(0)));
        let mut router = Router::new();
        router.register_route(Route::navigation(
            RouteFilter::new().allow(r"^/app").unwrap(),
            Arc::new(FixedHandler(200)),
        ));
        router.set_catch_handler(catch.clone());

        let response = router.handle_fetch(&nav("https://example.com/elsewhere")).await;
        assert_eq!(response.status, 0);
        assert_eq!(catch.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_reaches_catch_handler() {
        let catch = Arc::new(CountingCatch(std::sync::atomic::AtomicU32::new(0)));
        let mut router = Router::new();
        router.register_route(Route::navigation(
            RouteFilter::new().allow(r"^/app").unwrap(),
            Arc::new(FailingHandler),
        ));
        router.set_catch_handler(catch.clone());

        let response = router.handle_fetch(&nav("https://example.com/app")).await;
        assert_eq!(response.status, 0);
        assert_eq!(catch.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_router_without_catch_still_resolves() {
        let router = Router::new();
        let response = router.handle_fetch(&nav("https://example.com/x")).await;
        assert_eq!(response.status, 0);
    }
}
