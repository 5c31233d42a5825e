//! Sliding-window admission limiting per route pattern and caller identity.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{RateLimitConfig, RouteLimitConfig};
use crate::observability::metrics;
use crate::security::identity::ClientIdentity;
use crate::security::store::{build_store, StoreError, WindowRequest, WindowStore};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// A limited route pattern.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RouteRule {
    pub pattern: String,
    pub limit: u32,
    pub window_secs: u64,
}

impl From<&RouteLimitConfig> for RouteRule {
    fn from(config: &RouteLimitConfig) -> Self {
        Self {
            pattern: config.pattern.clone(),
            limit: config.limit,
            window_secs: config.window_secs,
        }
    }
}

/// Ordered route table.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct RouteRules {
    rules: Vec<RouteRule>,
}

impl RouteRules {
    pub fn from_config(routes: &[RouteLimitConfig]) -> Self {
        Self {
            rules: routes.iter().map(RouteRule::from).collect(),
        }
    }

    /// Exact match first, then the first prefix match in table order.
    pub fn resolve(&self, path: &str) -> Option<&RouteRule> {
        self.rules
            .iter()
            .find(|rule| rule.pattern == path)
            .or_else(|| self.rules.iter().find(|rule| path.starts_with(&rule.pattern)))
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

/// Result of one admission check.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub window_secs: u64,
    pub pattern: String,
}

#[derive(Serialize)]
struct RejectionBody {
    error: &'static str,
    message: String,
    remaining: u32,
    reset_at: String,
}

impl Decision {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_at.timestamp()));
    }

    /// The 429 response for a rejected request.
    pub fn rejection(&self) -> Response {
        let body = RejectionBody {
            error: "Rate limit exceeded",
            message: format!(
                "Maximum {} requests per {} seconds",
                self.limit, self.window_secs
            ),
            remaining: 0,
            reset_at: self.reset_at.to_rfc3339(),
        };

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        self.apply_headers(headers);
        headers.insert(RETRY_AFTER, HeaderValue::from(self.window_secs));
        response
    }
}

/// Admission limiter over a shared window store.
#[derive(Debug)]
pub struct RateLimiter {
    rules: ArcSwap<RouteRules>,
    store: Option<Arc<dyn WindowStore>>,
    key_margin: Duration,
}

impl RateLimiter {
    /// `store == None` disables limiting entirely.
    pub fn new(rules: RouteRules, store: Option<Arc<dyn WindowStore>>, key_margin: Duration) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
            store,
            key_margin,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self, StoreError> {
        let store = build_store(&config.store)?;
        if store.is_none() {
            tracing::warn!("Rate limiting disabled by configuration");
        }
        Ok(Self::new(
            RouteRules::from_config(&config.routes),
            store,
            Duration::from_secs(config.key_margin_secs),
        ))
    }

    pub fn is_active(&self) -> bool {
        self.store.is_some()
    }

    pub fn backend(&self) -> &'static str {
        self.store.as_ref().map_or("disabled", |s| s.backend())
    }

    pub fn key_margin(&self) -> Duration {
        self.key_margin
    }

    pub fn rules(&self) -> Arc<RouteRules> {
        self.rules.load_full()
    }

    /// Swap the route table. In-flight checks keep the table they loaded.
    pub fn update_rules(&self, routes: &[RouteLimitConfig]) {
        let rules = RouteRules::from_config(routes);
        tracing::info!(routes = rules.rules().len(), "Rate limit rules updated");
        self.rules.store(Arc::new(rules));
    }

    /// Check and record one request. `None` when the path is not limited.
    pub async fn check(&self, identity: &ClientIdentity, path: &str) -> Option<Decision> {
        self.store.as_ref()?;
        let rules = self.rules.load();
        let rule = rules.resolve(path)?;
        Some(self.check_rule_at(identity, rule, Utc::now()).await)
    }

    /// Check `rule` as of `now`.
    pub async fn check_rule_at(
        &self,
        identity: &ClientIdentity,
        rule: &RouteRule,
        now: DateTime<Utc>,
    ) -> Decision {
        let window = Duration::from_secs(rule.window_secs);
        let reset_at = i64::try_from(rule.window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|w| now.checked_add_signed(w))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let admit_all = Decision {
            allowed: true,
            limit: rule.limit,
            remaining: rule.limit,
            reset_at,
            window_secs: rule.window_secs,
            pattern: rule.pattern.clone(),
        };

        let Some(store) = &self.store else {
            return admit_all;
        };

        let key = format!("rate_limit:{}:{}", rule.pattern, identity);
        let request = WindowRequest {
            now_ms: now.timestamp_millis(),
            window_ms: millis(window),
            limit: rule.limit,
            ttl_ms: millis(window.saturating_add(self.key_margin)),
        };

        match store.record(&key, request).await {
            Ok(outcome) => {
                let used = outcome.count + u64::from(outcome.admitted);
                let remaining = u64::from(rule.limit).saturating_sub(used) as u32;
                tracing::debug!(
                    key = %key,
                    count = outcome.count,
                    limit = rule.limit,
                    remaining,
                    allowed = outcome.admitted,
                    "Rate limit check"
                );
                Decision {
                    allowed: outcome.admitted,
                    remaining,
                    ..admit_all
                }
            }
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    backend = store.backend(),
                    error = %e,
                    "Rate limit store failed, admitting request"
                );
                metrics::record_rate_limit_store_error();
                admit_all
            }
        }
    }

    /// Drop expired windows from process-local stores.
    pub fn sweep(&self) -> usize {
        self.store.as_ref().map_or(0, |s| s.sweep())
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Middleware enforcing admission limits ahead of the handlers.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = ClientIdentity::resolve(request.headers(), peer);

    let Some(decision) = limiter.check(&identity, request.uri().path()).await else {
        return next.run(request).await;
    };

    if !decision.allowed {
        tracing::warn!(
            client = %identity,
            path = %request.uri().path(),
            limit = decision.limit,
            window_secs = decision.window_secs,
            "Rate limit exceeded"
        );
        metrics::record_rate_limited(&decision.pattern);
        return decision.rejection();
    }

    let mut response = next.run(request).await;
    decision.apply_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::store::{MemoryStore, WindowCount};
    use async_trait::async_trait;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    #[derive(Debug)]
    struct FailingStore;

    #[async_trait]
    impl WindowStore for FailingStore {
        async fn record(&self, _key: &str, _request: WindowRequest) -> Result<WindowCount, StoreError> {
            Err(StoreError::Timeout(Duration::from_millis(1)))
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    fn routes() -> Vec<RouteLimitConfig> {
        vec![
            RouteLimitConfig {
                pattern: "/api/ai/adapt-prompt".into(),
                limit: 3,
                window_secs: 10,
            },
            RouteLimitConfig {
                pattern: "/api/ai/".into(),
                limit: 5,
                window_secs: 10,
            },
        ]
    }

    fn limiter(store: Option<Arc<dyn WindowStore>>) -> RateLimiter {
        RateLimiter::new(RouteRules::from_config(&routes()), store, Duration::from_secs(10))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn alice() -> ClientIdentity {
        ClientIdentity::User("alice".into())
    }

    #[test]
    fn test_route_resolution_order() {
        let rules = RouteRules::from_config(&routes());
        assert_eq!(rules.resolve("/api/ai/adapt-prompt").unwrap().limit, 3);
        assert_eq!(rules.resolve("/api/ai/generate").unwrap().limit, 5);
        // Prefix order: the adapt-prompt pattern is listed first.
        assert_eq!(rules.resolve("/api/ai/adapt-prompt/v2").unwrap().limit, 3);
        assert!(rules.resolve("/api/users").is_none());
        assert!(rules.resolve("/health").is_none());
    }

    #[tokio::test]
    async fn test_sliding_window_admission() {
        let limiter = limiter(Some(Arc::new(MemoryStore::new())));
        let rule = limiter.rules().resolve("/api/ai/adapt-prompt").cloned().unwrap();

        for (i, remaining) in [2, 1, 0].into_iter().enumerate() {
            let decision = limiter.check_rule_at(&alice(), &rule, at(i as i64)).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, remaining);
            assert_eq!(decision.reset_at, at(i as i64 + 10));
        }

        let rejected = limiter.check_rule_at(&alice(), &rule, at(5)).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);

        // The first request leaves the window at t=10; the rest are still inside.
        let resumed = limiter.check_rule_at(&alice(), &rule, at(10)).await;
        assert!(resumed.allowed);
        assert_eq!(resumed.remaining, 0);
        assert!(!limiter.check_rule_at(&alice(), &rule, at(10)).await.allowed);
    }

    #[tokio::test]
    async fn test_identities_counted_separately() {
        let limiter = limiter(Some(Arc::new(MemoryStore::new())));
        let rule = limiter.rules().resolve("/api/ai/adapt-prompt").cloned().unwrap();
        for _ in 0..3 {
            limiter.check_rule_at(&alice(), &rule, at(0)).await;
        }

        assert!(!limiter.check_rule_at(&alice(), &rule, at(1)).await.allowed);
        let bob = ClientIdentity::Ip("203.0.113.4".into());
        assert!(limiter.check_rule_at(&bob, &rule, at(1)).await.allowed);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let limiter = limiter(Some(Arc::new(FailingStore)));

        for _ in 0..10 {
            let decision = limiter.check(&alice(), "/api/ai/adapt-prompt").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 3);
        }
    }

    #[tokio::test]
    async fn test_disabled_or_unmatched_is_unlimited() {
        assert!(limiter(None).check(&alice(), "/api/ai/generate").await.is_none());

        let limiter = limiter(Some(Arc::new(MemoryStore::new())));
        assert!(limiter.check(&alice(), "/api/users/1").await.is_none());
    }

    #[tokio::test]
    async fn test_update_rules_swaps_table() {
        let limiter = limiter(Some(Arc::new(MemoryStore::new())));
        limiter.update_rules(&[RouteLimitConfig {
            pattern: "/api/chat".into(),
            limit: 1,
            window_secs: 60,
        }]);

        assert!(limiter.check(&alice(), "/api/ai/generate").await.is_none());
        assert!(limiter.check(&alice(), "/api/chat").await.unwrap().allowed);
        assert!(!limiter.check(&alice(), "/api/chat").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_middleware_headers_and_rejection() {
        let limiter = Arc::new(limiter(Some(Arc::new(MemoryStore::new()))));
        let app = Router::new()
            .route("/api/ai/adapt-prompt", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

        let request = || {
            Request::builder()
                .uri("/api/ai/adapt-prompt")
                .header("x-user-id", "alice")
                .body(Body::empty())
                .unwrap()
        };

        for remaining in ["2", "1", "0"] {
            let response = app.clone().oneshot(request()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "3");
            assert_eq!(response.headers()[X_RATELIMIT_REMAINING], remaining);
            assert!(response.headers().contains_key(X_RATELIMIT_RESET));
        }

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "10");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "0");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Rate limit exceeded");
        assert_eq!(body["remaining"], 0);
        assert!(body["reset_at"].is_string());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_never_exceed_limit() {
        let limiter = Arc::new(limiter(Some(Arc::new(MemoryStore::new()))));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter
                        .check(&alice(), "/api/ai/adapt-prompt")
                        .await
                        .unwrap()
                        .allowed
                })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
    }

    #[tokio::test]
    async fn test_oversized_window_does_not_panic() {
        let limiter = limiter(Some(Arc::new(MemoryStore::new())));
        let rule = RouteRule {
            pattern: "/api/chat".into(),
            limit: 1,
            window_secs: u64::MAX,
        };

        assert!(limiter.check_rule_at(&alice(), &rule, at(0)).await.allowed);
        assert!(!limiter.check_rule_at(&alice(), &rule, at(1)).await.allowed);
    }
}
