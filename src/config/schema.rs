//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Breaker protecting the upstream backend service.
pub const UPSTREAM_BREAKER: &str = "upstream";

/// Breaker protecting the generative AI API.
pub const GENERATIVE_BREAKER: &str = "generative";

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// The separate backend service requests are forwarded to.
    pub upstream: UpstreamConfig,

    /// Generative AI API settings, including its credential pool.
    pub generative: GenerativeConfig,

    /// Circuit breakers keyed by protected dependency name.
    pub breakers: BTreeMap<String, BreakerConfig>,

    /// Admission (rate limiting) configuration.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut breakers = BTreeMap::new();
        breakers.insert(UPSTREAM_BREAKER.to_string(), BreakerConfig::default());
        breakers.insert(GENERATIVE_BREAKER.to_string(), BreakerConfig::default());

        Self {
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            upstream: UpstreamConfig::default(),
            generative: GenerativeConfig::default(),
            breakers,
            rate_limit: RateLimitConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 120 }
    }
}

/// Upstream backend service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Forward unmatched requests to the upstream service.
    pub enabled: bool,

    /// Upstream address (e.g., "127.0.0.1:8080").
    pub address: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Generative AI API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GenerativeConfig {
    /// Enable the generation endpoint.
    pub enabled: bool,

    /// API base URL.
    pub base_url: String,

    /// Model identifier used in the request path.
    pub model: String,

    /// Per-attempt HTTP timeout in seconds.
    pub request_timeout_secs: u64,

    /// Credential pool settings.
    pub credentials: CredentialsConfig,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash".to_string(),
            request_timeout_secs: 60,
            credentials: CredentialsConfig::default(),
        }
    }
}

/// Credential failover pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Explicit credentials. When empty, credentials are read from the environment.
    pub keys: Vec<String>,

    /// Environment variable prefix (`{PREFIX}S`, `{PREFIX}_1..N`, `{PREFIX}`).
    pub env_prefix: String,

    /// Cool-down before an exhausted credential becomes eligible again.
    pub retry_delay_secs: u64,

    /// Base pause between attempts after a rotation, in milliseconds.
    pub rotation_pause_ms: u64,

    /// Lower-case substrings marking an error as quota related.
    pub quota_keywords: Vec<String>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            env_prefix: "GEMINI_API_KEY".to_string(),
            retry_delay_secs: 300,
            rotation_pause_ms: 1000,
            quota_keywords: default_quota_keywords(),
        }
    }
}

/// Default quota indicators.
pub fn default_quota_keywords() -> Vec<String> {
    [
        "429",
        "quota",
        "rate limit",
        "resource exhausted",
        "resource_exhausted",
        "too many requests",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Circuit breaker thresholds for one dependency.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,

    /// How long the circuit stays open before a trial call, in seconds.
    pub timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_secs: 60,
        }
    }
}

/// Admission limiter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Counter store backing the sliding windows.
    pub store: StoreConfig,

    /// Extra expiry applied to idle window keys, in seconds.
    pub key_margin_secs: u64,

    /// Limited route patterns, in match order.
    pub routes: Vec<RouteLimitConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            key_margin_secs: 10,
            routes: vec![
                RouteLimitConfig {
                    pattern: "/api/ai/adapt-prompt".to_string(),
                    limit: 100,
                    window_secs: 60,
                },
                RouteLimitConfig {
                    pattern: "/api/ai/".to_string(),
                    limit: 200,
                    window_secs: 60,
                },
            ],
        }
    }
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis sorted sets; counts agree across instances.
    Redis,
    /// Process-local windows.
    Memory,
    /// No limiting at all.
    Disabled,
}

/// Counter store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Redis URL (e.g., "redis://127.0.0.1:6379/0").
    pub url: Option<String>,

    /// Round-trip deadline before the limiter fails open, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: None,
            timeout_ms: 1000,
        }
    }
}

/// One limited route pattern.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteLimitConfig {
    /// Exact path or path prefix.
    pub pattern: String,

    /// Requests admitted per window.
    pub limit: u32,

    /// Window length in seconds.
    pub window_secs: u64,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
        }
    }
}
