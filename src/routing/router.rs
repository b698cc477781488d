//! Route lookup.
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan over routes sorted by priority, then by prefix length
//! - Explicit `None` rather than a silent default route

use axum::http::Request;

use crate::config::RouteConfig;
use crate::routing::matcher::{HostMatcher, Matcher, PathPrefixMatcher};

/// Compiled route.
#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    pub service: String,
    pub priority: u32,
    pub strip_prefix: bool,
    host: Option<HostMatcher>,
    path: PathPrefixMatcher,
}

impl Route {
    pub fn from_config(config: RouteConfig) -> Self {
        Self {
            name: config.name,
            service: config.service,
            priority: config.priority,
            strip_prefix: config.strip_prefix,
            host: config.host.map(HostMatcher::new),
            path: PathPrefixMatcher::new(config.path_prefix),
        }
    }

    pub fn matches<B>(&self, req: &Request<B>) -> bool {
        self.host.as_ref().map_or(true, |h| h.matches(req)) && self.path.matches(req)
    }

    /// Path to send upstream.
    pub fn upstream_path(&self, path: &str) -> String {
        if !self.strip_prefix || self.path.prefix() == "/" {
            return path.to_string();
        }
        match path.strip_prefix(self.path.prefix()) {
            Some("") => "/".to_string(),
            Some(rest) => rest.to_string(),
            None => path.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn from_config(configs: Vec<RouteConfig>) -> Self {
        let mut routes: Vec<Route> = configs.into_iter().map(Route::from_config).collect();
        routes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.path.prefix().len().cmp(&a.path.prefix().len()))
        });
        for route in &routes {
            tracing::debug!(
                route = %route.name,
                prefix = %route.path.prefix(),
                service = %route.service,
                priority = route.priority,
                "Route compiled"
            );
        }
        Self { routes }
    }

    pub fn match_request<B>(&self, req: &Request<B>) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(req))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn route(name: &str, prefix: &str, service: &str, priority: u32) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            host: None,
            path_prefix: prefix.into(),
            service: service.into(),
            strip_prefix: false,
            priority,
        }
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_longest_prefix_within_priority() {
        let router = Router::from_config(vec![
            route("api", "/api", "api", 0),
            route("orders", "/api/orders", "orders", 0),
        ]);
        assert_eq!(router.match_request(&get("/api/orders/1")).unwrap().service, "orders");
        assert_eq!(router.match_request(&get("/api/users")).unwrap().service, "api");
        assert!(router.match_request(&get("/health")).is_none());
    }

    #[test]
    fn test_priority_wins() {
        let router = Router::from_config(vec![
            route("orders", "/api/orders", "orders", 0),
            route("catch", "/", "fallback", 10),
        ]);
        assert_eq!(router.match_request(&get("/api/orders")).unwrap().service, "fallback");
    }

    #[test]
    fn test_strip_prefix() {
        let mut config = route("orders", "/api/orders", "orders", 0);
        config.strip_prefix = true;
        let route = Route::from_config(config);
        assert_eq!(route.upstream_path("/api/orders/7"), "/7");
        assert_eq!(route.upstream_path("/api/orders"), "/");
    }
}
