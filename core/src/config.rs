use std::env;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Gateway tunables. The recognized set is closed; everything else about
/// the gateway's behavior is fixed by protocol.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Hard per-document connection cap.
    #[serde(default = "default_max_clients_per_document")]
    pub max_clients_per_document: usize,
    /// Upper bound on accepted token lifetime, in seconds.
    #[serde(default = "default_max_token_lifetime_secs")]
    pub max_token_lifetime_secs: i64,
    /// Arm the per-socket expiration timer on connect.
    #[serde(default)]
    pub token_expiry_enabled: bool,
    /// Socket layer payload ceiling, in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_clients_per_document: default_max_clients_per_document(),
            max_token_lifetime_secs: default_max_token_lifetime_secs(),
            token_expiry_enabled: false,
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl GatewayConfig {
    const MAX_CLIENTS_ENV: &'static str = "QUILLGATE_MAX_CLIENTS_PER_DOCUMENT";
    const MAX_TOKEN_LIFETIME_ENV: &'static str = "QUILLGATE_MAX_TOKEN_LIFETIME_SECS";
    const TOKEN_EXPIRY_ENV: &'static str = "QUILLGATE_TOKEN_EXPIRY_ENABLED";
    const MAX_PAYLOAD_ENV: &'static str = "QUILLGATE_MAX_PAYLOAD_BYTES";

    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(value) = env::var(Self::MAX_CLIENTS_ENV) {
            config.max_clients_per_document = value.parse().with_context(|| {
                format!(
                    "invalid {} (expected positive integer)",
                    Self::MAX_CLIENTS_ENV
                )
            })?;
        }

        if let Ok(value) = env::var(Self::MAX_TOKEN_LIFETIME_ENV) {
            config.max_token_lifetime_secs = value.parse().with_context(|| {
                format!(
                    "invalid {} (expected seconds as integer)",
                    Self::MAX_TOKEN_LIFETIME_ENV
                )
            })?;
        }

        if let Ok(value) = env::var(Self::TOKEN_EXPIRY_ENV) {
            config.token_expiry_enabled = parse_bool(&value)
                .with_context(|| format!("invalid {} (expected boolean)", Self::TOKEN_EXPIRY_ENV))?;
        }

        if let Ok(value) = env::var(Self::MAX_PAYLOAD_ENV) {
            config.max_payload_bytes = value.parse().with_context(|| {
                format!(
                    "invalid {} (expected bytes as integer)",
                    Self::MAX_PAYLOAD_ENV
                )
            })?;
        }

        Ok(config)
    }
}

fn default_max_clients_per_document() -> usize {
    1_000_000
}

fn default_max_token_lifetime_secs() -> i64 {
    3_600
}

fn default_max_payload_bytes() -> u64 {
    100_000_000
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("unsupported boolean value '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_platform_contract() {
        let config = GatewayConfig::default();
        assert_eq!(config.max_clients_per_document, 1_000_000);
        assert_eq!(config.max_token_lifetime_secs, 3_600);
        assert!(!config.token_expiry_enabled);
        assert_eq!(config.max_payload_bytes, 100_000_000);
    }

    #[test]
    fn booleans_accept_common_spellings() {
        for value in ["1", "true", "YES", "on"] {
            assert!(parse_bool(value).unwrap(), "{value} should be true");
        }
        for value in ["0", "false", "No", "off"] {
            assert!(!parse_bool(value).unwrap(), "{value} should be false");
        }
        assert!(parse_bool("sometimes").is_err());
    }

    #[test]
    fn deserializes_with_partial_overrides() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"max_clients_per_document": 2}"#).unwrap();
        assert_eq!(config.max_clients_per_document, 2);
        assert_eq!(config.max_token_lifetime_secs, 3_600);
    }
}
