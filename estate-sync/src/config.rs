//! Configuration for live collections and the `estate-watch` binary.
//!
//! [`SyncConfig`] carries defaults so that library users can start from
//! `SyncConfig::default()`. [`WatchConfig`] is loaded from a TOML file and
//! every field is required unless explicitly marked optional.

use estate_core::{AgencyId, EntityKind};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default trailing debounce window for push-triggered refetches.
pub const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 2_000;

/// Tuning for a live collection binding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Quiet period after the last push event before a refetch fires.
    pub debounce_window_ms: u64,
    /// Whether a reopened push channel schedules a refetch once connected.
    pub refetch_on_reconnect: bool,
    /// Backoff policy for reopening a push channel that closed unexpectedly.
    pub reconnect: ReconnectConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            refetch_on_reconnect: true,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debounce window.
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable the refetch after a channel reconnect.
    pub fn with_refetch_on_reconnect(mut self, enabled: bool) -> Self {
        self.refetch_on_reconnect = enabled;
        self
    }

    /// Set the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_window_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.debounce_window_ms",
                reason: "must be > 0".to_string(),
            });
        }
        self.reconnect.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: 250,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter_ms: 250,
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.initial_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.max_ms < self.initial_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_ms",
                reason: "must be >= initial_ms".to_string(),
            });
        }
        if self.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.multiplier",
                reason: "must be >= 1.0".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration of the `estate-watch` binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    pub api_base_url: String,
    pub ws_endpoint: String,
    pub agency_id: AgencyId,
    pub collection: String,
    pub auth: AuthConfig,
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub api_key: Option<String>,
    pub jwt: Option<String>,
}

impl AuthConfig {
    pub fn is_empty(&self) -> bool {
        self.api_key.is_none() && self.jwt.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or ESTATE_WATCH_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl WatchConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: WatchConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.ws_endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ws_endpoint",
                reason: "must not be empty".to_string(),
            });
        }
        if self.auth.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "auth",
                reason: "api_key or jwt must be provided".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        self.entity_kind()?;
        self.sync.validate()
    }

    pub fn entity_kind(&self) -> Result<EntityKind, ConfigError> {
        self.collection
            .parse::<EntityKind>()
            .map_err(|err| ConfigError::InvalidValue {
                field: "collection",
                reason: err.to_string(),
            })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("ESTATE_WATCH_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce_window(), Duration::from_millis(2_000));
        assert!(config.refetch_on_reconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sync_config_builder() {
        let config = SyncConfig::new()
            .with_debounce_window(Duration::from_millis(500))
            .with_refetch_on_reconnect(false)
            .with_reconnect(ReconnectConfig {
                initial_ms: 10,
                max_ms: 100,
                multiplier: 1.5,
                jitter_ms: 0,
            });
        assert_eq!(config.debounce_window_ms, 500);
        assert!(!config.refetch_on_reconnect);
        assert_eq!(config.reconnect.max_ms, 100);
    }

    #[test]
    fn test_zero_debounce_window_rejected() {
        let config = SyncConfig::new().with_debounce_window(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "sync.debounce_window_ms", .. })
        ));
    }

    #[test]
    fn test_partial_sync_table_uses_defaults() {
        let config: SyncConfig = toml::from_str("debounce_window_ms = 750").unwrap();
        assert_eq!(config.debounce_window_ms, 750);
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }
}
