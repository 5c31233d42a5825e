//! Credential failover pool.
//!
//! # Responsibilities
//! - Hand out the active credential for a quota-limited API
//! - Classify errors as quota exhaustion by keyword
//! - Rotate to the next eligible credential when the active one is exhausted
//! - Keep exhausted credentials out of rotation until their cool-down elapses
//!
//! # Design Decisions
//! - Rotation is lazy and call-triggered; quota state is only observable
//!   through real call outcomes, so there is no background prober
//! - Index rotation and the failed map change together in one critical section
//! - Non-quota errors never rotate and never retry
//! - A quota failure is charged to the credential that attempt used, not
//!   to whichever one is current when it is reported

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::config::{default_quota_keywords, CredentialsConfig};
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;

/// Errors building a pool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("credential pool requires at least one credential")]
    Empty,
}

/// Error returned by [`CredentialPool::execute_with_retry`].
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Every credential is cooling down; carries the last quota error.
    #[error("all credentials exhausted after {attempts} attempt(s)")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The operation failed with a non-quota error, or ran out of attempts.
    #[error(transparent)]
    Operation(E),
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The underlying operation error.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } => source,
            RetryError::Operation(e) => e,
        }
    }
}

/// Keyword predicate deciding whether an error means "quota exceeded".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaClassifier {
    keywords: Vec<String>,
}

impl QuotaClassifier {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Match the lower-cased description against the keyword set.
    pub fn is_quota_error(&self, description: &str) -> bool {
        let normalized = description.to_lowercase();
        self.keywords.iter().any(|k| normalized.contains(k.as_str()))
    }
}

impl Default for QuotaClassifier {
    fn default() -> Self {
        Self::new(default_quota_keywords())
    }
}

/// A credential in cool-down.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedKey {
    pub index: usize,
    pub retry_in_seconds: u64,
}

/// Operational view of a pool.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolStatus {
    pub total_keys: usize,
    pub current_key_index: usize,
    pub failed_keys: Vec<FailedKey>,
    pub available_keys: Vec<usize>,
}

/// Interchangeable credentials with quota failover.
pub struct CredentialPool<C = String> {
    credentials: Vec<C>,
    retry_delay: Duration,
    classifier: QuotaClassifier,
    pause: Backoff,
    inner: Mutex<PoolInner>,
}

#[derive(Debug, Default)]
struct PoolInner {
    current_index: usize,
    failed: HashMap<usize, Instant>,
}

impl<C: Clone> CredentialPool<C> {
    /// Create a pool starting at the first credential.
    pub fn new(credentials: Vec<C>, retry_delay: Duration) -> Result<Self, PoolError> {
        if credentials.is_empty() {
            return Err(PoolError::Empty);
        }
        tracing::info!(
            total = credentials.len(),
            retry_delay_secs = retry_delay.as_secs(),
            "Credential pool initialized"
        );
        Ok(Self {
            credentials,
            retry_delay,
            classifier: QuotaClassifier::default(),
            pause: Backoff::new(Duration::from_secs(1), Duration::from_secs(4)),
            inner: Mutex::new(PoolInner::default()),
        })
    }

    /// Build from config with an already resolved credential list.
    pub fn from_config(credentials: Vec<C>, config: &CredentialsConfig) -> Result<Self, PoolError> {
        let pause = Duration::from_millis(config.rotation_pause_ms);
        Ok(Self::new(credentials, Duration::from_secs(config.retry_delay_secs))?
            .with_classifier(QuotaClassifier::new(&config.quota_keywords))
            .with_pause(Backoff::new(pause, pause * 4)))
    }

    pub fn with_classifier(mut self, classifier: QuotaClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_pause(mut self, pause: Backoff) -> Self {
        self.pause = pause;
        self
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// The credential currently handed out.
    pub fn current(&self) -> C {
        self.current_entry().1
    }

    pub fn current_index(&self) -> usize {
        self.lock().current_index
    }

    fn current_entry(&self) -> (usize, C) {
        let index = self.lock().current_index;
        (index, self.credentials[index].clone())
    }

    /// Classify an error by its textual description.
    pub fn is_quota_error(&self, error: &dyn fmt::Display) -> bool {
        self.classifier.is_quota_error(&error.to_string())
    }

    /// Mark the current credential failed and move to the next eligible one.
    ///
    /// Returns `false`, leaving the index unchanged, when every credential is
    /// still cooling down.
    pub fn switch_to_next(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        let from = inner.current_index;
        inner.failed.insert(from, now);
        self.rotate(&mut inner, from, now)
    }

    /// Mark the credential at `index` failed.
    ///
    /// Rotates only while `index` is still current. When another caller has
    /// already moved past it, returns `true` if the new current credential is
    /// usable, so the caller retries with it.
    pub fn switch_from(&self, index: usize) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.failed.insert(index, now);

        let current = inner.current_index;
        if current != index && self.eligible(&mut inner, current, now) {
            tracing::debug!(failed = index, current, "Credential already rotated");
            return true;
        }
        self.rotate(&mut inner, current, now)
    }

    // Clears an expired cool-down as a side effect.
    fn eligible(&self, inner: &mut PoolInner, index: usize, now: Instant) -> bool {
        match inner.failed.get(&index) {
            Some(failed_at) if now.duration_since(*failed_at) < self.retry_delay => false,
            Some(_) => {
                inner.failed.remove(&index);
                true
            }
            None => true,
        }
    }

    fn rotate(&self, inner: &mut PoolInner, from: usize, now: Instant) -> bool {
        let len = self.credentials.len();
        for offset in 1..=len {
            let candidate = (from + offset) % len;
            if !self.eligible(inner, candidate, now) {
                continue;
            }

            inner.current_index = candidate;
            tracing::info!(from, to = candidate, "Switched to next credential");
            metrics::record_credential_rotation("switched");
            return true;
        }

        tracing::error!(total = len, "No credential available, all are cooling down");
        metrics::record_credential_rotation("exhausted");
        false
    }

    /// Run `operation` with the current credential, rotating on quota errors.
    /// Up to one attempt per credential.
    pub async fn execute_with_retry<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(C) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        self.execute_with_retries(self.credentials.len() as u32, operation)
            .await
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry) with an explicit attempt budget.
    pub async fn execute_with_retries<F, Fut, T, E>(
        &self,
        max_attempts: u32,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(C) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let (index, credential) = self.current_entry();
            let error = match operation(credential).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !self.is_quota_error(&error) {
                return Err(RetryError::Operation(error));
            }

            tracing::warn!(
                attempt,
                max_attempts,
                key_index = index,
                error = %error,
                "Quota exceeded on credential"
            );

            if !self.switch_from(index) {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: error,
                });
            }

            if attempt >= max_attempts {
                return Err(RetryError::Operation(error));
            }

            tokio::time::sleep(self.pause.delay(attempt)).await;
        }
    }

    /// Snapshot of the rotation state.
    pub fn status(&self) -> PoolStatus {
        let now = Instant::now();
        let inner = self.lock();
        let mut failed_keys = Vec::new();
        let mut available_keys = Vec::new();

        for index in 0..self.credentials.len() {
            match inner.failed.get(&index) {
                Some(failed_at) => failed_keys.push(FailedKey {
                    index,
                    retry_in_seconds: self
                        .retry_delay
                        .saturating_sub(now.duration_since(*failed_at))
                        .as_secs(),
                }),
                None => available_keys.push(index),
            }
        }

        PoolStatus {
            total_keys: self.credentials.len(),
            current_key_index: inner.current_index,
            failed_keys,
            available_keys,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        // Only indices and timestamps; usable after a poisoning panic.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Credentials are secrets; never print them.
impl<C> fmt::Debug for CredentialPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("total", &self.credentials.len())
            .field("retry_delay", &self.retry_delay)
            .field("classifier", &self.classifier)
            .finish()
    }
}
