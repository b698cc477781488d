//! Scoped rate limiter registry.
//!
//! # Responsibilities
//! - Hold one limiter per `scope:identifier` key, created lazily
//! - Pick the algorithm from the scope's configured policy
//! - Scale the adaptive scope by the externally supplied load factor
//! - Keep memory bounded (max entries + idle sweep)
//!
//! # Design Decisions
//! - One mutex around the whole key map; every operation is O(1) bookkeeping
//! - A scope without a policy fails open (logged), so a configuration slip
//!   cannot take traffic down
//! - A rejection does not consume capacity in the scope that rejected it.
//!   `admit` checks scopes in order, so scopes earlier in the chain have
//!   already been charged

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::RateLimitConfig;
use crate::error::GatewayError;
use crate::security::client::RequestIdentity;
use crate::security::sliding_window::SlidingWindow;
use crate::security::token_bucket::TokenBucket;

/// Key namespaces. Limits in different scopes never interfere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Ip,
    User,
    Path,
    ApiKey,
    Adaptive,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Ip => "ip",
            Scope::User => "user",
            Scope::Path => "path",
            Scope::ApiKey => "api_key",
            Scope::Adaptive => "adaptive",
        }
    }

    pub fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.as_str(), identifier)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Algorithm and parameters for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimitPolicy {
    TokenBucket {
        capacity: u32,
        refill_per_sec: f64,
    },
    SlidingWindow {
        limit: u32,
        #[serde(with = "humantime_serde")]
        window: Duration,
    },
}

impl LimitPolicy {
    pub fn limit(&self) -> u64 {
        match self {
            LimitPolicy::TokenBucket { capacity, .. } => *capacity as u64,
            LimitPolicy::SlidingWindow { limit, .. } => *limit as u64,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            LimitPolicy::TokenBucket {
                capacity,
                refill_per_sec,
            } => {
                if *capacity == 0 {
                    return Err("token bucket capacity must be greater than 0".to_string());
                }
                if !refill_per_sec.is_finite() || *refill_per_sec <= 0.0 {
                    return Err("token bucket refill_per_sec must be a positive number".to_string());
                }
            }
            LimitPolicy::SlidingWindow { limit, window } => {
                if *limit == 0 {
                    return Err("sliding window limit must be greater than 0".to_string());
                }
                if window.is_zero() {
                    return Err("sliding window duration must be greater than 0".to_string());
                }
            }
        }
        Ok(())
    }

    fn build(&self, now: Instant) -> Limiter {
        match self {
            LimitPolicy::TokenBucket {
                capacity,
                refill_per_sec,
            } => Limiter::TokenBucket(TokenBucket::new_at(*capacity, *refill_per_sec, now)),
            LimitPolicy::SlidingWindow { limit, window } => {
                Limiter::SlidingWindow(SlidingWindow::new(*limit, *window))
            }
        }
    }
}

/// Per-(method, path prefix) rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRule {
    /// HTTP method; `None` matches any method.
    #[serde(default)]
    pub method: Option<String>,
    pub path_prefix: String,
    pub policy: LimitPolicy,
}

impl PathRule {
    /// Identifier within the path scope.
    pub fn key(&self) -> String {
        format!(
            "{} {}",
            self.method.as_deref().unwrap_or("*").to_ascii_uppercase(),
            self.path_prefix
        )
    }

    fn matches(&self, method: &str, path: &str) -> bool {
        let method_ok = self
            .method
            .as_deref()
            .map_or(true, |m| m.eq_ignore_ascii_case(method));
        method_ok && path.starts_with(&self.path_prefix)
    }
}

/// Result of one scope check.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub scope: Scope,
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Time until capacity is next available.
    pub reset_after: Duration,
}

impl RateLimitDecision {
    /// Wall-clock time of next available capacity. Waits too long to
    /// represent are capped at [`MAX_RESET_AFTER`].
    pub fn reset_at(&self) -> SystemTime {
        let now = SystemTime::now();
        now.checked_add(self.reset_after.min(MAX_RESET_AFTER))
            .unwrap_or(now)
    }

    /// `reset_at` as unix seconds, rounded up.
    pub fn reset_at_unix(&self) -> u64 {
        let at = self
            .reset_at()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        ceil_secs(at)
    }

    /// Whole seconds a rejected client should wait, at least 1.
    pub fn retry_after_secs(&self) -> u64 {
        ceil_secs(self.reset_after.min(MAX_RESET_AFTER)).max(1)
    }

    pub fn into_error(self) -> GatewayError {
        GatewayError::RateLimitExceeded {
            scope: self.scope,
            limit: self.limit,
            retry_after: self.reset_after,
        }
    }
}

/// Longest reset hint reported to clients.
pub const MAX_RESET_AFTER: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Largest accepted adaptive load factor.
pub const MAX_LOAD_FACTOR: f64 = 1_000.0;

pub(crate) fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    pub enabled: bool,
    pub entries: usize,
    pub max_entries: usize,
    pub load_factor: f64,
    pub per_scope: HashMap<String, usize>,
}

#[derive(Debug)]
enum Limiter {
    TokenBucket(TokenBucket),
    SlidingWindow(SlidingWindow),
}

impl Limiter {
    fn allow_at(&mut self, now: Instant) -> bool {
        match self {
            Limiter::TokenBucket(b) => b.allow_at(now),
            Limiter::SlidingWindow(w) => w.allow_at(now),
        }
    }

    fn remaining_at(&mut self, now: Instant) -> u64 {
        match self {
            Limiter::TokenBucket(b) => b.remaining_at(now),
            Limiter::SlidingWindow(w) => w.remaining_at(now),
        }
    }

    fn time_until_available_at(&mut self, now: Instant) -> Duration {
        match self {
            Limiter::TokenBucket(b) => b.time_until_available_at(now),
            Limiter::SlidingWindow(w) => w.time_until_available_at(now),
        }
    }

    fn limit(&self) -> u64 {
        match self {
            Limiter::TokenBucket(b) => b.capacity(),
            Limiter::SlidingWindow(w) => w.limit(),
        }
    }

    /// Bring an adaptive bucket in line with the current effective policy.
    fn retune(&mut self, policy: &LimitPolicy, now: Instant) {
        if let (
            Limiter::TokenBucket(bucket),
            LimitPolicy::TokenBucket {
                capacity,
                refill_per_sec,
            },
        ) = (self, policy)
        {
            if bucket.refill_rate() != *refill_per_sec {
                bucket.set_refill_rate_at(*refill_per_sec, now);
            }
            if bucket.capacity() != *capacity as u64 {
                bucket.set_capacity(*capacity);
            }
        }
    }
}

#[derive(Debug)]
struct Entry {
    limiter: Limiter,
    last_seen: Instant,
}

/// Owns every limiter keyed by `scope:identifier`.
pub struct RateLimiterRegistry {
    enabled: bool,
    policies: HashMap<Scope, LimitPolicy>,
    paths: Vec<PathRule>,
    whitelist: HashSet<IpAddr>,
    max_entries: usize,
    idle_ttl: Duration,
    /// f64 bits of the current load factor.
    load_factor: AtomicU64,
    entries: Mutex<HashMap<String, Entry>>,
}

impl RateLimiterRegistry {
    pub fn new(config: RateLimitConfig) -> Self {
        let mut policies = HashMap::new();
        for (scope, policy) in [
            (Scope::Global, config.global),
            (Scope::Ip, config.ip),
            (Scope::User, config.user),
            (Scope::ApiKey, config.api_key),
            (Scope::Adaptive, config.adaptive),
        ] {
            if let Some(policy) = policy {
                policies.insert(scope, policy);
            }
        }

        Self {
            enabled: config.enabled,
            policies,
            paths: config.paths,
            whitelist: config.whitelist.into_iter().collect(),
            max_entries: config.max_entries,
            idle_ttl: config.idle_ttl,
            load_factor: AtomicU64::new(1.0f64.to_bits()),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_whitelisted(&self, ip: &IpAddr) -> bool {
        self.whitelist.contains(ip)
    }

    /// Update the system load factor used by the adaptive scope.
    ///
    /// Values below 1.0 (and NaN) are treated as 1.0, so the adaptive limit
    /// never exceeds its base rate. Values above [`MAX_LOAD_FACTOR`] are
    /// capped.
    pub fn set_load_factor(&self, factor: f64) {
        let factor = if factor.is_nan() {
            1.0
        } else {
            factor.clamp(1.0, MAX_LOAD_FACTOR)
        };
        self.load_factor.store(factor.to_bits(), Ordering::Relaxed);
        tracing::debug!(load_factor = factor, "Adaptive load factor updated");
    }

    pub fn load_factor(&self) -> f64 {
        f64::from_bits(self.load_factor.load(Ordering::Relaxed))
    }

    /// Check and consume one unit in `scope` for `identifier`.
    ///
    /// `None` means the scope has no policy and the request is let through.
    pub fn check(&self, scope: Scope, identifier: &str) -> Option<RateLimitDecision> {
        self.check_at(scope, identifier, Instant::now())
    }

    pub fn allow(&self, scope: Scope, identifier: &str) -> bool {
        self.check(scope, identifier).map_or(true, |d| d.allowed)
    }

    /// Units left for the key without consuming any. Unconfigured scopes are
    /// unlimited and report `u64::MAX`.
    pub fn remaining(&self, scope: Scope, identifier: &str) -> u64 {
        self.peek_at(scope, identifier, Instant::now())
            .map_or(u64::MAX, |d| d.remaining)
    }

    /// Wall-clock time the key next has capacity.
    pub fn reset_time(&self, scope: Scope, identifier: &str) -> SystemTime {
        self.peek_at(scope, identifier, Instant::now())
            .map_or_else(SystemTime::now, |d| d.reset_at())
    }

    /// Path rule matching `(method, path)`; the longest prefix wins.
    pub fn match_path(&self, method: &str, path: &str) -> Option<&PathRule> {
        self.paths
            .iter()
            .filter(|rule| rule.matches(method, path))
            .max_by_key(|rule| rule.path_prefix.len())
    }

    /// Run every applicable scope for one request, in order: global, IP,
    /// user, path, API key, adaptive.
    ///
    /// Returns the most restrictive admitted decision (for response headers),
    /// or the first rejection.
    pub fn admit(&self, identity: &RequestIdentity) -> Result<Option<RateLimitDecision>, GatewayError> {
        if !self.enabled {
            return Ok(None);
        }
        let now = Instant::now();
        let mut tightest: Option<RateLimitDecision> = None;

        let mut checks: Vec<(Scope, String)> = Vec::with_capacity(6);
        checks.push((Scope::Global, "all".to_string()));
        let whitelisted = identity
            .client_ip_addr()
            .map_or(false, |ip| self.is_whitelisted(&ip));
        if whitelisted {
            tracing::trace!(client_ip = %identity.client_ip, "Whitelisted IP skips IP scope");
        } else {
            checks.push((Scope::Ip, identity.client_ip.clone()));
        }
        if let Some(user) = &identity.user_id {
            checks.push((Scope::User, user.clone()));
        }
        if let Some(rule) = self.match_path(&identity.method, &identity.path) {
            checks.push((Scope::Path, rule.key()));
        }
        if let Some(api_key) = &identity.api_key {
            checks.push((Scope::ApiKey, api_key.clone()));
        }
        if self.policies.contains_key(&Scope::Adaptive) {
            checks.push((Scope::Adaptive, identity.client_ip.clone()));
        }

        for (scope, identifier) in checks {
            // Scopes the operator did not configure are simply skipped here;
            // explicit lookups of unknown scopes go through `check` and warn.
            if scope != Scope::Path && !self.policies.contains_key(&scope) {
                continue;
            }
            let Some(decision) = self.check_at(scope, &identifier, now) else {
                continue;
            };
            if !decision.allowed {
                tracing::warn!(
                    scope = %scope,
                    identifier = %identifier,
                    limit = decision.limit,
                    retry_after_ms = decision.reset_after.as_millis() as u64,
                    "Rate limit exceeded"
                );
                return Err(decision.into_error());
            }
            let tighter = tightest
                .as_ref()
                .map_or(true, |t| decision.remaining < t.remaining);
            if tighter {
                tightest = Some(decision);
            }
        }
        Ok(tightest)
    }

    /// Clear one key.
    pub fn reset(&self, scope: Scope, identifier: &str) -> bool {
        self.lock().remove(&scope.key(identifier)).is_some()
    }

    /// Drop entries idle for at least `max_idle`. Returns how many went.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        self.sweep_idle_at(max_idle, Instant::now())
    }

    /// Sweep using the configured idle TTL.
    pub fn sweep(&self) -> usize {
        self.sweep_idle(self.idle_ttl)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn stats(&self) -> LimiterStats {
        let entries = self.lock();
        let mut per_scope: HashMap<String, usize> = HashMap::new();
        for key in entries.keys() {
            let scope = key.split_once(':').map_or(key.as_str(), |(scope, _)| scope);
            *per_scope.entry(scope.to_string()).or_default() += 1;
        }
        LimiterStats {
            enabled: self.enabled,
            entries: entries.len(),
            max_entries: self.max_entries,
            load_factor: self.load_factor(),
            per_scope,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep_idle_at(&self, max_idle: Duration, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.last_seen) < max_idle);
        before - entries.len()
    }

    fn policy_for(&self, scope: Scope, identifier: &str) -> Option<LimitPolicy> {
        match scope {
            Scope::Path => self
                .paths
                .iter()
                .find(|rule| rule.key() == identifier)
                .map(|rule| rule.policy.clone()),
            Scope::Adaptive => self
                .policies
                .get(&Scope::Adaptive)
                .map(|base| scale_policy(base, self.load_factor())),
            _ => self.policies.get(&scope).cloned(),
        }
    }

    fn check_at(&self, scope: Scope, identifier: &str, now: Instant) -> Option<RateLimitDecision> {
        let Some(policy) = self.policy_for(scope, identifier) else {
            tracing::warn!(scope = %scope, identifier = %identifier, "No rate limit policy for scope, failing open");
            return None;
        };
        let key = scope.key(identifier);

        let mut entries = self.lock();
        if !entries.contains_key(&key) {
            self.make_room(&mut entries, now);
        }
        let entry = entries.entry(key).or_insert_with(|| Entry {
            limiter: policy.build(now),
            last_seen: now,
        });
        entry.last_seen = now;
        if scope == Scope::Adaptive {
            entry.limiter.retune(&policy, now);
        }

        let allowed = entry.limiter.allow_at(now);
        Some(RateLimitDecision {
            scope,
            allowed,
            limit: entry.limiter.limit(),
            remaining: entry.limiter.remaining_at(now),
            reset_after: entry.limiter.time_until_available_at(now),
        })
    }

    fn peek_at(&self, scope: Scope, identifier: &str, now: Instant) -> Option<RateLimitDecision> {
        let policy = self.policy_for(scope, identifier)?;
        let mut entries = self.lock();
        let decision = match entries.get_mut(&scope.key(identifier)) {
            Some(entry) => RateLimitDecision {
                scope,
                allowed: true,
                limit: entry.limiter.limit(),
                remaining: entry.limiter.remaining_at(now),
                reset_after: entry.limiter.time_until_available_at(now),
            },
            None => RateLimitDecision {
                scope,
                allowed: true,
                limit: policy.limit(),
                remaining: policy.limit(),
                reset_after: Duration::ZERO,
            },
        };
        Some(decision)
    }

    fn make_room(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        if self.max_entries == 0 || entries.len() < self.max_entries {
            return;
        }
        let idle_ttl = self.idle_ttl;
        entries.retain(|_, entry| now.saturating_duration_since(entry.last_seen) < idle_ttl);
        if entries.len() < self.max_entries {
            return;
        }
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            tracing::debug!(key = %key, "Evicting least recently used rate limit entry");
            entries.remove(&key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Divide a token-bucket policy by the load factor.
fn scale_policy(base: &LimitPolicy, factor: f64) -> LimitPolicy {
    match base {
        LimitPolicy::TokenBucket {
            capacity,
            refill_per_sec,
        } => LimitPolicy::TokenBucket {
            capacity: ((*capacity as f64 / factor).ceil() as u32).max(1),
            refill_per_sec: refill_per_sec / factor,
        },
        other => other.clone(),
    }
}
