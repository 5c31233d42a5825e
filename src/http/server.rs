//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the resilience components from config, once, at startup
//! - Create the Axum router with handlers and admin API
//! - Wire up middleware (correlation ID, tracing, timeout, admission limits)
//! - Apply config reloads to the rate-limit route table
//! - Sweep expired windows from the in-memory store

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::clients::generative::{GenerativeClient, GenerativeError};
use crate::clients::upstream::{UpstreamClient, UpstreamError};
use crate::config::{
    resolve_credentials, AdminConfig, GatewayConfig, GENERATIVE_BREAKER, UPSTREAM_BREAKER,
};
use crate::http::handlers::{generate_handler, health, proxy_handler};
use crate::http::request::{correlation_middleware, request_span};
use crate::resilience::circuit_breaker::{Breakers, CircuitBreaker};
use crate::resilience::credentials::{CredentialPool, PoolError};
use crate::security::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::security::store::StoreError;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Failures building the server from config.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("rate limit store: {0}")]
    Store(#[from] StoreError),

    #[error("generative credentials: {0}")]
    Credentials(#[from] PoolError),

    #[error("upstream client: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("generative client: {0}")]
    Generative(#[from] GenerativeError),

    #[error("breaker '{0}' missing")]
    MissingBreaker(&'static str),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub breakers: Arc<Breakers>,
    pub upstream_breaker: Arc<CircuitBreaker>,
    pub generative_breaker: Arc<CircuitBreaker>,
    pub upstream: Option<UpstreamClient>,
    pub generative: Option<Arc<GenerativeClient>>,
    pub limiter: Arc<RateLimiter>,
    pub admin: Arc<AdminConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, StartupError> {
        let breakers = Arc::new(Breakers::from_config(&config.breakers));
        let upstream_breaker = breakers
            .get(UPSTREAM_BREAKER)
            .ok_or(StartupError::MissingBreaker(UPSTREAM_BREAKER))?;
        let generative_breaker = breakers
            .get(GENERATIVE_BREAKER)
            .ok_or(StartupError::MissingBreaker(GENERATIVE_BREAKER))?;

        let upstream = if config.upstream.enabled {
            Some(UpstreamClient::new(&config.upstream.address)?)
        } else {
            None
        };

        let generative = if config.generative.enabled {
            let credentials = config.generative.credentials.clone();
            let pool = CredentialPool::from_config(resolve_credentials(&credentials), &credentials)?;
            Some(Arc::new(GenerativeClient::new(&config.generative, Arc::new(pool))?))
        } else {
            None
        };

        Ok(Self {
            breakers,
            upstream_breaker,
            generative_breaker,
            upstream,
            generative,
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)?),
            admin: Arc::new(config.admin.clone()),
            started_at: Instant::now(),
        })
    }

    pub fn credential_pool(&self) -> Option<&Arc<CredentialPool>> {
        self.generative.as_ref().map(|client| client.pool())
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
    config: GatewayConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, StartupError> {
        let state = AppState::from_config(&config)?;
        let router = Self::build_router(&config, state.clone());
        Ok(Self {
            router,
            state,
            config,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let limited = Router::new()
            .route("/api/ai/generate", post(generate_handler))
            .fallback(proxy_handler)
            .layer(middleware::from_fn_with_state(
                state.limiter.clone(),
                rate_limit_middleware,
            ));

        let mut router = Router::new().route("/health", get(health)).merge(limited);
        if config.admin.enabled {
            router = router.merge(setup_admin_router(state.clone()));
        }

        router
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http().make_span_with(request_span))
            .layer(middleware::from_fn(correlation_middleware))
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            rate_limit_backend = self.state.limiter.backend(),
            upstream = self.config.upstream.enabled,
            generative = self.config.generative.enabled,
            "HTTP server starting"
        );

        let limiter = self.state.limiter.clone();
        let reload_task = tokio::spawn(async move {
            while let Some(new_config) = config_updates.recv().await {
                limiter.update_rules(&new_config.rate_limit.routes);
            }
        });

        let limiter = self.state.limiter.clone();
        let sweep_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = limiter.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "Swept idle rate limit windows");
                }
            }
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        reload_task.abort();
        sweep_task.abort();
        tracing::info!("HTTP server stopped");
        result
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;

    #[test]
    fn test_generative_without_credentials_fails() {
        let mut config = GatewayConfig::default();
        config.generative.enabled = true;
        config.generative.credentials.env_prefix = "CHAT_GATEWAY_TEST_UNSET_KEY".into();

        assert!(matches!(
            HttpServer::new(config),
            Err(StartupError::Credentials(PoolError::Empty))
        ));
    }

    #[test]
    fn test_default_state_has_both_breakers() {
        let mut config = GatewayConfig::default();
        config.rate_limit.store.backend = StoreBackend::Disabled;

        let server = HttpServer::new(config).unwrap();
        let state = server.state();
        assert_eq!(state.upstream_breaker.name(), UPSTREAM_BREAKER);
        assert_eq!(state.generative_breaker.name(), GENERATIVE_BREAKER);
        assert!(state.upstream.is_none());
        assert!(state.credential_pool().is_none());
        assert!(!state.limiter.is_active());
    }
}
