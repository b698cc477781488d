//! Route matching logic.
//!
//! # Design Decisions
//! - Host matching is case-insensitive and ignores the port
//! - Path prefixes match on segment boundaries: `/api` matches `/api` and
//!   `/api/x` but not `/apix`
//! - Empty condition = always matches (wildcard)

use axum::http::Request;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    fn matches<B>(&self, req: &Request<B>) -> bool;
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches<B>(&self, req: &Request<B>) -> bool {
        req.headers()
            .get("host")
            .and_then(|h| h.to_str().ok())
            .or_else(|| req.uri().host())
            .map(|h| strip_port(h).eq_ignore_ascii_case(&self.expected_host))
            .unwrap_or(false)
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [v6]:port
        return host.split(']').next().map_or(host, |h| &h[1..]);
    }
    host.rsplit_once(':').map_or(host, |(h, _)| h)
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        while prefix.len() > 1 && prefix.ends_with('/') {
            prefix.pop();
        }
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches_path(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return true;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches<B>(&self, req: &Request<B>) -> bool {
        self.matches_path(req.uri().path())
    }
}
