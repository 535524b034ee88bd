/*
    config - Broker configuration

    Environment- and file-based configuration with per-section defaults
    and validation. File format is TOML; environment variables follow
    the pattern PANMESH_<SECTION>_<KEY> and override file values.
*/

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

mod error;

pub use error::ConfigError;

use crate::core_federation::router::{DEFAULT_MAX_HOPS, HARD_MAX_HOPS};

/// Top-level broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broker identity
    pub broker: BrokerConfig,

    /// Trust and federation tuning
    pub federation: FederationConfig,

    /// Persistence locations
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Identity of this broker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// DID identifying this broker on the mesh
    pub did: String,

    /// Human-readable name announced to partners
    pub display_name: String,
}

/// Trust and federation tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Instance-wide federation hop budget
    pub max_hops: u32,

    /// Wire budget per adapter attempt
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,

    /// Transport-failure retry budget for the HTTP adapter
    pub http_retries: u32,

    /// How often expired trust relationships are swept
    #[serde(with = "humantime_serde")]
    pub trust_sweep_interval: Duration,

    /// How often sync rounds are driven for shared contexts
    #[serde(with = "humantime_serde")]
    pub sync_interval: Duration,
}

/// Persistence locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the relational image and the change log
    pub data_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            federation: FederationConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            did: "did:web:localhost".to_string(),
            display_name: "panmesh broker".to_string(),
        }
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
            send_timeout: Duration::from_secs(30),
            http_retries: 3,
            trust_sweep_interval: Duration::from_secs(60),
            sync_interval: Duration::from_secs(30),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern PANMESH_<SECTION>_<KEY>, for
    /// example PANMESH_BROKER_DID=did:web:broker-a.example
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(did) = env::var("PANMESH_BROKER_DID") {
            config.broker.did = did;
        }
        if let Ok(name) = env::var("PANMESH_BROKER_DISPLAY_NAME") {
            config.broker.display_name = name;
        }

        if let Ok(max_hops) = env::var("PANMESH_FEDERATION_MAX_HOPS") {
            config.federation.max_hops = max_hops
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("invalid max_hops: {}", e)))?;
        }
        if let Ok(retries) = env::var("PANMESH_FEDERATION_HTTP_RETRIES") {
            config.federation.http_retries = retries
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("invalid http_retries: {}", e)))?;
        }

        if let Ok(data_dir) = env::var("PANMESH_STORAGE_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(level) = env::var("PANMESH_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(json) = env::var("PANMESH_LOG_JSON") {
            config.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("invalid JSON flag: {}", e)))?;
        }

        if let Ok(enabled) = env::var("PANMESH_METRICS_ENABLED") {
            config.metrics.enabled = enabled
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("invalid metrics flag: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.did.is_empty() || !self.broker.did.starts_with("did:") {
            return Err(ConfigError::Validation(format!(
                "broker.did must be a DID, got '{}'",
                self.broker.did
            )));
        }

        if self.federation.max_hops == 0 {
            return Err(ConfigError::Validation(
                "federation.max_hops must be at least 1".to_string(),
            ));
        }
        if self.federation.max_hops > HARD_MAX_HOPS {
            return Err(ConfigError::Validation(format!(
                "federation.max_hops must not exceed {}",
                HARD_MAX_HOPS
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_did_validation() {
        let mut config = Config::default();

        config.broker.did = String::new();
        assert!(config.validate().is_err());

        config.broker.did = "broker-a".to_string();
        assert!(config.validate().is_err());

        config.broker.did = "did:web:broker-a.example".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hop_budget_validation() {
        let mut config = Config::default();

        config.federation.max_hops = 0;
        assert!(config.validate().is_err());

        config.federation.max_hops = HARD_MAX_HOPS + 1;
        assert!(config.validate().is_err());

        config.federation.max_hops = HARD_MAX_HOPS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = Config::default();

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panmesh.toml");

        let mut config = Config::default();
        config.broker.did = "did:web:broker-a.example".to_string();
        config.federation.max_hops = 7;
        config.federation.send_timeout = Duration::from_secs(5);

        config.save_to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();

        assert_eq!(loaded.broker.did, "did:web:broker-a.example");
        assert_eq!(loaded.federation.max_hops, 7);
        assert_eq!(loaded.federation.send_timeout, Duration::from_secs(5));
    }
}
