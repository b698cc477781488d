//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: downstream assumed down, requests fail fast
//! - Half-Open: a bounded number of probes test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Closed → Closed (new generation): interval elapsed without a trip
//! Open → Half-Open: now >= expiry (evaluated lazily on the next call)
//! Half-Open → Closed: consecutive_successes >= success_threshold
//! Half-Open → Open: any probe fails
//! ```
//!
//! # Design Decisions
//! - Every transition starts a new generation; results tagged with an older
//!   generation are dropped, so in-flight calls cannot corrupt fresh counts
//! - The lock is held only for bookkeeping, never across the wrapped call
//! - No timers: Open → Half-Open is computed when a request arrives

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{ExecuteError, GatewayError};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request counters for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn clear(&mut self) {
        *self = Counts::default();
    }
}

/// Breaker thresholds and timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures in Closed that trip the breaker.
    pub failure_threshold: u32,
    /// Consecutive probe successes in Half-Open that close the breaker.
    pub success_threshold: u32,
    /// Probes admitted per Half-Open generation.
    pub max_requests: u32,
    /// Closed-state count reset window. Zero disables periodic resets.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Time spent Open before probing.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            max_requests: 1,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
        }
    }
}

impl BreakerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Semantic checks; returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.failure_threshold == 0 {
            errors.push("failure_threshold must be at least 1".to_string());
        }
        if self.success_threshold == 0 {
            errors.push("success_threshold must be at least 1".to_string());
        }
        if self.max_requests == 0 {
            errors.push("max_requests must be at least 1".to_string());
        }
        if self.success_threshold > self.max_requests {
            errors.push(format!(
                "success_threshold ({}) cannot exceed max_requests ({}): half-open would never close",
                self.success_threshold, self.max_requests
            ));
        }
        if self.timeout.is_zero() {
            errors.push("timeout must be greater than zero".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Callback fired on every transition: `(name, from, to)`.
pub type StateChangeHook = Arc<dyn Fn(&str, State, State) + Send + Sync>;

/// Read-only view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: State,
    pub generation: u64,
    pub counts: Counts,
    pub settings: BreakerSettings,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: State,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

type Transition = (State, State);

/// A single-key circuit breaker.
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
    on_state_change: Option<StateChangeHook>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        let now = Instant::now();
        let mut inner = Inner {
            state: State::Closed,
            generation: 0,
            counts: Counts::default(),
            expiry: None,
        };
        inner.expiry = closed_expiry(&settings, now);
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(inner),
            on_state_change: None,
        }
    }

    /// Install the transition callback.
    pub fn with_state_change_hook(mut self, hook: StateChangeHook) -> Self {
        self.on_state_change = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Current state, applying any pending lazy transition.
    pub fn state(&self) -> State {
        let (state, transitions) = {
            let mut inner = self.lock();
            let mut transitions = Vec::new();
            let (state, _) = self.current_state(&mut inner, Instant::now(), &mut transitions);
            (state, transitions)
        };
        self.notify(transitions);
        state
    }

    /// Run `f` through the breaker.
    ///
    /// Blocks for as long as `f` runs; the breaker lock is not held meanwhile.
    pub fn execute<T, E, F>(&self, f: F) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let generation = self.before_request().map_err(ExecuteError::Rejected)?;
        match f() {
            Ok(value) => {
                self.after_request(generation, true);
                Ok(value)
            }
            Err(e) => {
                self.after_request(generation, false);
                Err(ExecuteError::Failed(e))
            }
        }
    }

    /// Async counterpart of [`CircuitBreaker::execute`].
    pub async fn call<T, E, Fut>(&self, fut: Fut) -> Result<T, ExecuteError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let ticket = self.admit().map_err(ExecuteError::Rejected)?;
        match fut.await {
            Ok(value) => {
                ticket.success();
                Ok(value)
            }
            Err(e) => {
                ticket.failure();
                Err(ExecuteError::Failed(e))
            }
        }
    }

    /// Admit one request and hand back a ticket for reporting its outcome.
    ///
    /// Used where success is decided by inspecting a response (e.g. HTTP
    /// status >= 500 counts as failure). A ticket dropped without an outcome
    /// records a failure.
    pub fn admit(&self) -> Result<BreakerTicket<'_>, GatewayError> {
        let generation = self.before_request()?;
        Ok(BreakerTicket {
            breaker: self,
            generation,
            reported: false,
        })
    }

    /// Force Closed with cleared counts.
    pub fn reset(&self) {
        self.force(State::Closed);
    }

    /// Force Open; the next probe happens after `timeout`.
    pub fn force_open(&self) {
        self.force(State::Open);
    }

    /// Force Closed.
    pub fn force_close(&self) {
        self.force(State::Closed);
    }

    pub fn status(&self) -> BreakerStatus {
        let now = Instant::now();
        let (status, transitions) = {
            let mut inner = self.lock();
            let mut transitions = Vec::new();
            let (state, generation) = self.current_state(&mut inner, now, &mut transitions);
            let open_remaining_ms = match (state, inner.expiry) {
                (State::Open, Some(expiry)) => {
                    Some(expiry.saturating_duration_since(now).as_millis() as u64)
                }
                _ => None,
            };
            let status = BreakerStatus {
                name: self.name.clone(),
                state,
                generation,
                counts: inner.counts,
                settings: self.settings.clone(),
                open_remaining_ms,
            };
            (status, transitions)
        };
        self.notify(transitions);
        status
    }

    fn before_request(&self) -> Result<u64, GatewayError> {
        self.before_request_at(Instant::now())
    }

    fn before_request_at(&self, now: Instant) -> Result<u64, GatewayError> {
        let mut transitions = Vec::new();
        let outcome = {
            let mut inner = self.lock();
            let (state, generation) = self.current_state(&mut inner, now, &mut transitions);
            match state {
                State::Open => {
                    let retry_after = inner
                        .expiry
                        .map(|expiry| expiry.saturating_duration_since(now))
                        .unwrap_or(self.settings.timeout);
                    Err(GatewayError::BreakerOpen {
                        name: self.name.clone(),
                        retry_after,
                    })
                }
                State::HalfOpen if inner.counts.requests >= self.settings.max_requests => {
                    Err(GatewayError::BreakerHalfOpenCapacityExceeded {
                        name: self.name.clone(),
                    })
                }
                _ => {
                    inner.counts.on_request();
                    Ok(generation)
                }
            }
        };
        self.notify(transitions);
        outcome
    }

    fn after_request(&self, before: u64, success: bool) {
        self.after_request_at(before, success, Instant::now());
    }

    fn after_request_at(&self, before: u64, success: bool, now: Instant) {
        let mut transitions = Vec::new();
        {
            let mut inner = self.lock();
            let (state, generation) = self.current_state(&mut inner, now, &mut transitions);
            if generation != before {
                tracing::trace!(
                    breaker = %self.name,
                    stale_generation = before,
                    generation,
                    "Discarding result from superseded generation"
                );
            } else if success {
                self.on_success(&mut inner, state, now, &mut transitions);
            } else {
                self.on_failure(&mut inner, state, now, &mut transitions);
            }
        }
        self.notify(transitions);
    }

    fn on_success(&self, inner: &mut Inner, state: State, now: Instant, out: &mut Vec<Transition>) {
        match state {
            State::Closed => inner.counts.on_success(),
            State::HalfOpen => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.settings.success_threshold {
                    self.set_state(inner, State::Closed, now, out);
                }
            }
            State::Open => {}
        }
    }

    fn on_failure(&self, inner: &mut Inner, state: State, now: Instant, out: &mut Vec<Transition>) {
        match state {
            State::Closed => {
                inner.counts.on_failure();
                if inner.counts.consecutive_failures >= self.settings.failure_threshold {
                    self.set_state(inner, State::Open, now, out);
                }
            }
            State::HalfOpen => self.set_state(inner, State::Open, now, out),
            State::Open => {}
        }
    }

    /// Applies lazy transitions and returns `(state, generation)`.
    fn current_state(&self, inner: &mut Inner, now: Instant, out: &mut Vec<Transition>) -> (State, u64) {
        match inner.state {
            State::Closed => {
                if let Some(expiry) = inner.expiry {
                    if expiry <= now {
                        self.new_generation(inner, now);
                    }
                }
            }
            State::Open => {
                if inner.expiry.map_or(true, |expiry| expiry <= now) {
                    self.set_state(inner, State::HalfOpen, now, out);
                }
            }
            State::HalfOpen => {}
        }
        (inner.state, inner.generation)
    }

    fn set_state(&self, inner: &mut Inner, to: State, now: Instant, out: &mut Vec<Transition>) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        self.new_generation(inner, now);
        out.push((from, to));
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts.clear();
        inner.expiry = match inner.state {
            State::Closed => closed_expiry(&self.settings, now),
            State::Open => Some(now + self.settings.timeout),
            State::HalfOpen => None,
        };
    }

    fn force(&self, to: State) {
        let now = Instant::now();
        let mut transitions = Vec::new();
        {
            let mut inner = self.lock();
            if inner.state == to {
                self.new_generation(&mut inner, now);
            } else {
                self.set_state(&mut inner, to, now, &mut transitions);
            }
        }
        self.notify(transitions);
    }

    fn notify(&self, transitions: Vec<Transition>) {
        if let Some(hook) = &self.on_state_change {
            for (from, to) in transitions {
                hook(&self.name, from, to);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Counters are updated field by field under the lock and stay coherent
        // even if a holder panicked.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn closed_expiry(settings: &BreakerSettings, now: Instant) -> Option<Instant> {
    if settings.interval.is_zero() {
        None
    } else {
        Some(now + settings.interval)
    }
}

/// An admitted request awaiting its outcome.
#[must_use = "report the outcome with success() or failure()"]
pub struct BreakerTicket<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    reported: bool,
}

impl BreakerTicket<'_> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn success(self) {
        self.finish(true);
    }

    pub fn failure(self) {
        self.finish(false);
    }

    /// Report `success` as computed by the caller.
    pub fn finish(mut self, success: bool) {
        self.reported = true;
        self.breaker.after_request(self.generation, success);
    }
}

impl Drop for BreakerTicket<'_> {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker.after_request(self.generation, false);
        }
    }
}
