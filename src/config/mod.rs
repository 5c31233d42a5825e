//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, resolve credentials from env)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → used once at startup to build breakers, pool and limiter
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → rate-limit route table swapped atomically
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, resolve_credentials, ConfigError};
pub use schema::{
    AdminConfig, BreakerConfig, CredentialsConfig, GatewayConfig, GenerativeConfig,
    ListenerConfig, LogFormat, ObservabilityConfig, RateLimitConfig, RouteLimitConfig,
    StoreBackend, StoreConfig, UpstreamConfig, default_quota_keywords, GENERATIVE_BREAKER,
    UPSTREAM_BREAKER,
};
