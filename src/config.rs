//! Configuration
//!
//! Process-level settings, loadable from a YAML file. Values given on the
//! command line or through the environment override the file.

use crate::api::ApiServerConfig;
use crate::error::{Error, Result};
use crate::registry::{HubConfig, RegistryConfig, SweeperConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Instance store selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Snapshot file for the file-backed store; in-memory when unset
    pub path: Option<PathBuf>,
}

/// Logging output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Complete process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiServerConfig,
    pub registry: RegistryConfig,
    pub sweeper: SweeperConfig,
    pub hub: HubConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Explicit values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub api_addr: Option<SocketAddr>,
    pub metrics_addr: Option<SocketAddr>,
    pub heartbeat_ttl_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub store_path: Option<PathBuf>,
    pub subscriber_queue: Option<usize>,
    pub log_level: Option<String>,
    pub log_json: Option<bool>,
}

impl Settings {
    /// Parse settings from YAML; missing sections take their defaults
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Load settings from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Apply explicit overrides on top of these settings
    pub fn apply(mut self, overrides: SettingsOverrides) -> Self {
        if let Some(addr) = overrides.api_addr {
            self.api.rest_addr = addr;
        }
        if let Some(addr) = overrides.metrics_addr {
            self.api.metrics_addr = addr;
        }
        if let Some(ttl) = overrides.heartbeat_ttl_secs {
            self.registry.heartbeat_ttl_secs = ttl;
        }
        if let Some(interval) = overrides.sweep_interval_secs {
            self.sweeper.interval_secs = interval;
        }
        if let Some(path) = overrides.store_path {
            self.store.path = Some(path);
        }
        if let Some(capacity) = overrides.subscriber_queue {
            self.hub.queue_capacity = capacity;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = json;
        }
        self
    }

    /// Reject settings the registry cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.registry.heartbeat_ttl_secs == 0 {
            return Err(Error::Configuration("heartbeat TTL must be positive".into()));
        }
        if self.sweeper.interval_secs == 0 {
            return Err(Error::Configuration("sweep interval must be positive".into()));
        }
        if self.hub.queue_capacity == 0 {
            return Err(Error::Configuration("subscriber queue must hold at least one event".into()));
        }
        if self.hub.max_missed_deliveries == 0 {
            return Err(Error::Configuration("max missed deliveries must be positive".into()));
        }
        if self.api.rest_addr == self.api.metrics_addr {
            return Err(Error::Configuration(format!(
                "API and metrics listeners share {}",
                self.api.rest_addr
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.registry.heartbeat_ttl_secs, 30);
        assert_eq!(settings.sweeper.interval_secs, 10);
        assert_eq!(settings.hub.queue_capacity, 64);
        assert_eq!(settings.hub.max_missed_deliveries, 1);
        assert_eq!(settings.api.rest_addr.port(), 4000);
        assert!(settings.store.path.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let settings = Settings::from_yaml(
            "registry:\n  heartbeat_ttl_secs: 45\nstore:\n  path: /var/lib/registry/instances.json\n",
        )
        .unwrap();

        assert_eq!(settings.registry.heartbeat_ttl_secs, 45);
        assert_eq!(settings.sweeper.interval_secs, 10);
        assert_eq!(
            settings.store.path.as_deref(),
            Some(Path::new("/var/lib/registry/instances.json"))
        );
    }

    #[test]
    fn test_yaml_roundtrip_and_errors() {
        let yaml = Settings::default().to_yaml().unwrap();
        assert!(Settings::from_yaml(&yaml).is_ok());
        assert_matches!(Settings::from_yaml("registry: not-a-map"), Err(Error::YamlParse(_)));
    }

    #[test]
    fn test_overrides_win() {
        let settings = Settings::from_yaml("registry:\n  heartbeat_ttl_secs: 45\n")
            .unwrap()
            .apply(SettingsOverrides {
                heartbeat_ttl_secs: Some(5),
                subscriber_queue: Some(8),
                log_json: Some(true),
                ..Default::default()
            });

        assert_eq!(settings.registry.heartbeat_ttl_secs, 5);
        assert_eq!(settings.hub.queue_capacity, 8);
        assert!(settings.logging.json);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let settings = Settings::default().apply(SettingsOverrides {
            heartbeat_ttl_secs: Some(0),
            ..Default::default()
        });
        assert_matches!(settings.validate(), Err(Error::Configuration(_)));

        let settings = Settings::default().apply(SettingsOverrides {
            subscriber_queue: Some(0),
            ..Default::default()
        });
        assert_matches!(settings.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_missing_file() {
        assert_matches!(
            Settings::load(Path::new("/nonexistent/registry.yaml")),
            Err(Error::Configuration(_))
        );
    }
}
