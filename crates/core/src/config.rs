use serde::Deserialize;

use crate::error::{RelayError, RelayResult};

/// Root application configuration. Loaded from environment variables
/// with the prefix `CHIP_RELAY__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub compliance: ComplianceConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub typing: TypingConfig,
}

/// Message-spacing bounds and per-account rate caps.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ComplianceConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_per_hour")]
    pub max_per_hour: u32,
    #[serde(default = "default_max_per_day")]
    pub max_per_day: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_jitter_min_ms")]
    pub reconnect_jitter_min_ms: u64,
    #[serde(default = "default_reconnect_jitter_max_ms")]
    pub reconnect_jitter_max_ms: u64,
    #[serde(default = "default_ready_wait_timeout_ms")]
    pub ready_wait_timeout_ms: u64,
    #[serde(default = "default_rate_limit_jitter_min_ms")]
    pub rate_limit_jitter_min_ms: u64,
    #[serde(default = "default_rate_limit_jitter_max_ms")]
    pub rate_limit_jitter_max_ms: u64,
}

/// Human typing model: one per-character latency drawn per message,
/// multiplied by length, capped so long texts stay plausible.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TypingConfig {
    #[serde(default = "default_per_char_min_ms")]
    pub per_char_min_ms: u64,
    #[serde(default = "default_per_char_max_ms")]
    pub per_char_max_ms: u64,
    #[serde(default = "default_typing_cap_ms")]
    pub cap_ms: u64,
}

// Default functions
fn default_node_id() -> String {
    "relay-01".to_string()
}
fn default_min_delay_ms() -> u64 {
    3_000
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_max_per_hour() -> u32 {
    20
}
fn default_max_per_day() -> u32 {
    200
}
fn default_idle_timeout_ms() -> u64 {
    60_000
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_jitter_min_ms() -> u64 {
    5_000
}
fn default_reconnect_jitter_max_ms() -> u64 {
    15_000
}
fn default_ready_wait_timeout_ms() -> u64 {
    30_000
}
fn default_rate_limit_jitter_min_ms() -> u64 {
    3_000
}
fn default_rate_limit_jitter_max_ms() -> u64 {
    12_000
}
fn default_per_char_min_ms() -> u64 {
    100
}
fn default_per_char_max_ms() -> u64 {
    150
}
fn default_typing_cap_ms() -> u64 {
    15_000
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_per_hour: default_max_per_hour(),
            max_per_day: default_max_per_day(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_jitter_min_ms: default_reconnect_jitter_min_ms(),
            reconnect_jitter_max_ms: default_reconnect_jitter_max_ms(),
            ready_wait_timeout_ms: default_ready_wait_timeout_ms(),
            rate_limit_jitter_min_ms: default_rate_limit_jitter_min_ms(),
            rate_limit_jitter_max_ms: default_rate_limit_jitter_max_ms(),
        }
    }
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            per_char_min_ms: default_per_char_min_ms(),
            per_char_max_ms: default_per_char_max_ms(),
            cap_ms: default_typing_cap_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            compliance: ComplianceConfig::default(),
            connection: ConnectionConfig::default(),
            typing: TypingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> RelayResult<Self> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CHIP_RELAY")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder
            .build()
            .map_err(|e| RelayError::Config(e.to_string()))?;
        config
            .try_deserialize()
            .map_err(|e| RelayError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.compliance.min_delay_ms, 3_000);
        assert_eq!(cfg.compliance.max_delay_ms, 8_000);
        assert_eq!(cfg.connection.max_reconnect_attempts, 5);
        assert_eq!(cfg.typing.cap_ms, 15_000);
        assert!(cfg.compliance.min_delay_ms <= cfg.compliance.max_delay_ms);
        assert!(cfg.connection.reconnect_jitter_min_ms <= cfg.connection.reconnect_jitter_max_ms);
    }

    #[test]
    fn test_load_falls_back_to_defaults_without_env() {
        let cfg = AppConfig::load().unwrap();
        assert_eq!(cfg.typing.per_char_min_ms, 100);
        assert_eq!(cfg.typing.per_char_max_ms, 150);
    }
}
