//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast or use the fallback
//! - Half-Open: trial calls test whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold (consecutive)
//! Open → Half-Open: timeout elapsed since the circuit opened; that call is the first trial
//! Half-Open → Closed: success_count >= success_threshold
//! Half-Open → Open: any trial fails
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency kind, owned by the application state
//! - Every operation error counts; no classification
//! - Bookkeeping happens under a lock that is never held across the operation
//! - A failed trial returns its own error; the fallback only covers refusals

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::{BreakerConfig, GENERATIVE_BREAKER, UPSTREAM_BREAKER};
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Error returned by a protected call.
#[derive(Debug, Error)]
pub enum CallError<E>
where
    E: std::error::Error + 'static,
{
    /// The circuit refused the call and no fallback was supplied.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// The protected operation failed.
    #[error(transparent)]
    Operation(E),

    /// The fallback ran and failed.
    #[error("fallback failed: {0}")]
    Fallback(#[source] E),
}

impl<E> CallError<E>
where
    E: std::error::Error + 'static,
{
    /// True when the breaker refused the call.
    pub fn is_open(&self) -> bool {
        matches!(self, CallError::Open { .. })
    }
}

/// Point-in-time view of a breaker, for monitoring endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub time_in_current_state: f64,
}

/// Three-state circuit breaker around one kind of operation.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    last_state_change: Instant,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        success_threshold: u32,
        timeout: Duration,
    ) -> Self {
        let name = name.into();
        tracing::info!(
            breaker = %name,
            failure_threshold,
            success_threshold,
            timeout_secs = timeout.as_secs_f64(),
            "Circuit breaker initialized"
        );
        Self {
            name,
            failure_threshold,
            success_threshold,
            timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                last_state_change: Instant::now(),
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::new(
            name,
            config.failure_threshold,
            config.success_threshold,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.lock().success_count
    }

    /// How long the circuit stays open before a trial call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `operation` under the breaker. Refusals yield [`CallError::Open`].
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        self.execute(operation, None::<fn() -> std::future::Ready<Result<T, E>>>)
            .await
    }

    /// Run `operation` under the breaker, substituting `fallback` when the
    /// circuit refuses the call.
    pub async fn call_or_else<F, Fut, G, GFut, T, E>(
        &self,
        operation: F,
        fallback: G,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        self.execute(operation, Some(fallback)).await
    }

    async fn execute<F, Fut, G, GFut, T, E>(
        &self,
        operation: F,
        fallback: Option<G>,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        if !self.admit() {
            metrics::record_breaker_rejection(&self.name);
            return match fallback {
                Some(fallback) => {
                    tracing::info!(breaker = %self.name, "Circuit open, using fallback");
                    fallback().await.map_err(CallError::Fallback)
                }
                None => Err(CallError::Open {
                    name: self.name.clone(),
                }),
            };
        }

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(breaker = %self.name, error = %e, "Protected call failed");
                self.on_failure();
                Err(CallError::Operation(e))
            }
        }
    }

    /// Decide whether the current call may run, moving Open → Half-Open once
    /// the timeout has elapsed.
    fn admit(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let open_for = inner.last_state_change.elapsed();
                if open_for >= self.timeout {
                    tracing::info!(
                        breaker = %self.name,
                        time_in_open = open_for.as_secs_f64(),
                        "Circuit breaker half-open, sending trial call"
                    );
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    true
                } else {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        retry_in_secs = (self.timeout - open_for).as_secs_f64(),
                        "Circuit breaker open, refusing call"
                    );
                    false
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count > 0 {
                    tracing::debug!(breaker = %self.name, "Failure count reset");
                    inner.failure_count = 0;
                }
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                tracing::info!(
                    breaker = %self.name,
                    success_count = inner.success_count,
                    threshold = self.success_threshold,
                    "Trial call succeeded"
                );
                if inner.success_count >= self.success_threshold {
                    tracing::info!(breaker = %self.name, "Circuit breaker closed");
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            // Another caller reopened the circuit while this call was in flight.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    tracing::error!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        threshold = self.failure_threshold,
                        "Circuit breaker opened"
                    );
                    inner.last_failure_time = Some(Utc::now());
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(breaker = %self.name, "Trial call failed, circuit reopened");
                inner.last_failure_time = Some(Utc::now());
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        inner.state = to;
        inner.last_state_change = Instant::now();
        match to {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
            }
            CircuitState::HalfOpen | CircuitState::Open => inner.success_count = 0,
        }
        metrics::record_breaker_state(&self.name, to);
    }

    /// Diagnostic view; `time_in_current_state` is computed live.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
            time_in_current_state: inner.last_state_change.elapsed().as_secs_f64(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // Only counters and timestamps; usable after a poisoning panic.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Breakers for every protected dependency, built once at startup.
#[derive(Debug, Default)]
pub struct Breakers {
    breakers: BTreeMap<String, Arc<CircuitBreaker>>,
}

impl Breakers {
    /// Build breakers from config. The well-known upstream and generative
    /// breakers always exist, with default thresholds when not configured.
    pub fn from_config(configs: &BTreeMap<String, BreakerConfig>) -> Self {
        let mut breakers: BTreeMap<String, Arc<CircuitBreaker>> = configs
            .iter()
            .map(|(name, config)| {
                (name.clone(), Arc::new(CircuitBreaker::from_config(name.as_str(), config)))
            })
            .collect();

        for name in [UPSTREAM_BREAKER, GENERATIVE_BREAKER] {
            breakers.entry(name.to_string()).or_insert_with(|| {
                Arc::new(CircuitBreaker::from_config(name, &BreakerConfig::default()))
            });
        }

        Self { breakers }
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }

    pub fn snapshots(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.snapshot()))
            .collect()
    }
}
