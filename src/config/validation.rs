//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds, limits and windows > 0, windows at
//!   most one day)
//! - Check addresses and URLs parse
//! - Detect duplicate rate-limit patterns
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::uri::Authority;
use thiserror::Error;

use crate::config::schema::{GatewayConfig, StoreBackend};

/// Longest accepted rate-limit window.
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field}: invalid URL '{value}'")]
    InvalidUrl { field: &'static str, value: String },

    #[error("breaker '{name}': {field} must be greater than zero")]
    ZeroBreakerSetting { name: String, field: &'static str },

    #[error("rate limit pattern '{0}' must start with '/'")]
    InvalidPattern(String),

    #[error("rate limit pattern '{0}' is configured more than once")]
    DuplicatePattern(String),

    #[error("rate limit pattern '{pattern}': {field} must be greater than zero")]
    ZeroLimitSetting { pattern: String, field: &'static str },

    #[error("rate limit pattern '{pattern}': window_secs must be at most {max}")]
    WindowTooLong { pattern: String, max: u64 },

    #[error("rate_limit.store.url is required for the redis backend")]
    MissingRedisUrl,

    #[error("admin.api_key must be set when the admin API is enabled")]
    EmptyAdminKey,

    #[error("generative.request_timeout_secs must be greater than zero")]
    ZeroGenerativeTimeout,
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.upstream.enabled {
        // Host names allowed.
        if config.upstream.address.parse::<Authority>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                field: "upstream.address",
                value: config.upstream.address.clone(),
            });
        }
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.generative.enabled {
        if url::Url::parse(&config.generative.base_url).is_err() {
            errors.push(ValidationError::InvalidUrl {
                field: "generative.base_url",
                value: config.generative.base_url.clone(),
            });
        }
        if config.generative.request_timeout_secs == 0 {
            errors.push(ValidationError::ZeroGenerativeTimeout);
        }
    }

    for (name, breaker) in &config.breakers {
        let zero_fields = [
            ("failure_threshold", breaker.failure_threshold == 0),
            ("success_threshold", breaker.success_threshold == 0),
            ("timeout_secs", breaker.timeout_secs == 0),
        ];
        for (field, is_zero) in zero_fields {
            if is_zero {
                errors.push(ValidationError::ZeroBreakerSetting {
                    name: name.clone(),
                    field,
                });
            }
        }
    }

    let store = &config.rate_limit.store;
    if store.backend == StoreBackend::Redis {
        match &store.url {
            None => errors.push(ValidationError::MissingRedisUrl),
            Some(raw) => {
                if url::Url::parse(raw).is_err() {
                    errors.push(ValidationError::InvalidUrl {
                        field: "rate_limit.store.url",
                        value: raw.clone(),
                    });
                }
            }
        }
    }

    let mut seen = HashSet::new();
    for route in &config.rate_limit.routes {
        if !route.pattern.starts_with('/') {
            errors.push(ValidationError::InvalidPattern(route.pattern.clone()));
        }
        if !seen.insert(route.pattern.as_str()) {
            errors.push(ValidationError::DuplicatePattern(route.pattern.clone()));
        }
        if route.limit == 0 {
            errors.push(ValidationError::ZeroLimitSetting {
                pattern: route.pattern.clone(),
                field: "limit",
            });
        }
        if route.window_secs == 0 {
            errors.push(ValidationError::ZeroLimitSetting {
                pattern: route.pattern.clone(),
                field: "window_secs",
            });
        } else if route.window_secs > MAX_WINDOW_SECS {
            errors.push(ValidationError::WindowTooLong {
                pattern: route.pattern.clone(),
                max: MAX_WINDOW_SECS,
            });
        }
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::EmptyAdminKey);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BreakerConfig, RouteLimitConfig};

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.breakers.insert(
            "broken".into(),
            BreakerConfig {
                failure_threshold: 0,
                success_threshold: 1,
                timeout_secs: 0,
            },
        );
        config.rate_limit.routes.push(RouteLimitConfig {
            pattern: "api".into(),
            limit: 0,
            window_secs: 60,
        });
        config.admin.enabled = true;

        let errors = validate_config(&config).unwrap_err();

        assert!(errors.contains(&ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: "not-an-address".into(),
        }));
        assert!(errors.contains(&ValidationError::ZeroBreakerSetting {
            name: "broken".into(),
            field: "failure_threshold",
        }));
        assert!(errors.contains(&ValidationError::ZeroBreakerSetting {
            name: "broken".into(),
            field: "timeout_secs",
        }));
        assert!(errors.contains(&ValidationError::InvalidPattern("api".into())));
        assert!(errors.contains(&ValidationError::EmptyAdminKey));
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let mut config = GatewayConfig::default();
        config.rate_limit.store.backend = StoreBackend::Redis;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::MissingRedisUrl])
        );

        config.rate_limit.store.url = Some("redis://127.0.0.1:6379/0".into());
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn test_upstream_accepts_host_names() {
        let mut config = GatewayConfig::default();
        config.upstream.enabled = true;
        config.upstream.address = "backend:8080".into();
        assert_eq!(validate_config(&config), Ok(()));

        config.upstream.address = "not a host".into();
        assert_eq!(validate_config(&config).unwrap_err().len(), 1);
    }

    #[test]
    fn test_duplicate_pattern_rejected() {
        let mut config = GatewayConfig::default();
        let first = config.rate_limit.routes[0].clone();
        config.rate_limit.routes.push(first.clone());

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::DuplicatePattern(first.pattern)]);
    }

    #[test]
    fn test_window_upper_bound() {
        let mut config = GatewayConfig::default();
        config.rate_limit.routes = vec![RouteLimitConfig {
            pattern: "/api/chat".into(),
            limit: 10,
            window_secs: MAX_WINDOW_SECS,
        }];
        assert_eq!(validate_config(&config), Ok(()));

        config.rate_limit.routes[0].window_secs = u64::MAX;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::WindowTooLong {
                pattern: "/api/chat".into(),
                max: MAX_WINDOW_SECS,
            }])
        );
    }
}
