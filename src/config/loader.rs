//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{CredentialsConfig, GatewayConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: GatewayConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Resolve the credential list from config, falling back to the process environment.
pub fn resolve_credentials(config: &CredentialsConfig) -> Vec<String> {
    resolve_credentials_with(config, |name| std::env::var(name).ok())
}

/// Resolve credentials using the given variable lookup.
///
/// Sources, first non-empty wins:
/// 1. `keys` in the config file
/// 2. `{PREFIX}S`, comma separated
/// 3. `{PREFIX}_1`, `{PREFIX}_2`, ... up to the first gap
/// 4. `{PREFIX}`
pub fn resolve_credentials_with<F>(config: &CredentialsConfig, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let explicit: Vec<String> = config
        .keys
        .iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if !explicit.is_empty() {
        return explicit;
    }

    let prefix = &config.env_prefix;

    if let Some(list) = lookup(&format!("{prefix}S")) {
        let keys: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();
        if !keys.is_empty() {
            return keys;
        }
    }

    let numbered: Vec<String> = (1..)
        .map_while(|i| lookup(&format!("{prefix}_{i}")).filter(|k| !k.trim().is_empty()))
        .collect();
    if !numbered.is_empty() {
        return numbered;
    }

    lookup(prefix)
        .filter(|k| !k.trim().is_empty())
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [[rate_limit.routes]]
            pattern = "/api/"
            limit = 10
            window_secs = 30
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.rate_limit.routes[0].window_secs, 30);
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listener]\nbind_address = \"nowhere\"").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("listener.bind_address"));
    }

    #[test]
    fn test_explicit_keys_win() {
        let config = CredentialsConfig {
            keys: vec!["a".into(), " ".into(), "b".into()],
            ..Default::default()
        };
        let vars = env(&[("GEMINI_API_KEYS", "x,y")]);
        let keys = resolve_credentials_with(&config, |n| vars.get(n).cloned());
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_comma_list_then_numbered_then_single() {
        let config = CredentialsConfig::default();

        let vars = env(&[("GEMINI_API_KEYS", "k1, k2,,k3"), ("GEMINI_API_KEY", "single")]);
        let keys = resolve_credentials_with(&config, |n| vars.get(n).cloned());
        assert_eq!(keys, vec!["k1", "k2", "k3"]);

        let vars = env(&[
            ("GEMINI_API_KEY_1", "n1"),
            ("GEMINI_API_KEY_2", "n2"),
            ("GEMINI_API_KEY_4", "skipped"),
        ]);
        let keys = resolve_credentials_with(&config, |n| vars.get(n).cloned());
        assert_eq!(keys, vec!["n1", "n2"]);

        let vars = env(&[("GEMINI_API_KEY", "single")]);
        let keys = resolve_credentials_with(&config, |n| vars.get(n).cloned());
        assert_eq!(keys, vec!["single"]);

        let keys = resolve_credentials_with(&config, |_| None);
        assert!(keys.is_empty());
    }
}
