//! Configuration for the usage sentinel.

use crate::core::aggregator::{AggregatorConfig, MinSamplePolicy, DEFAULT_MIN_SAMPLES, DEFAULT_TICK};
use crate::core::features::DEFAULT_EMBEDDING_DIM;
use crate::core::window::DEFAULT_CAPACITY;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const APP_DIR: &str = "usage-sentinel";

/// Main configuration for the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Period of the collection loop (one sample per tick)
    #[serde(with = "duration_serde")]
    pub collection_interval: Duration,

    /// Period of the prediction loop
    #[serde(with = "duration_serde")]
    pub prediction_interval: Duration,

    /// Number of samples in a full window
    pub window_capacity: usize,

    /// Length of the app embedding segment of the model input
    pub embedding_dim: usize,

    /// Sample count below which a window is considered sparse
    pub min_samples: usize,

    /// Treat sparse windows as empty instead of rescaling them
    pub enforce_min_samples: bool,

    /// IANA zone for time-of-day features, e.g. "Europe/Berlin"
    pub timezone: Option<String>,

    /// Linear model weights file; heuristic scoring is used when unset
    pub model_path: Option<PathBuf>,

    /// Path for the record store and transparency stats
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            collection_interval: DEFAULT_TICK,
            prediction_interval: DEFAULT_TICK,
            window_capacity: DEFAULT_CAPACITY,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            min_samples: DEFAULT_MIN_SAMPLES,
            enforce_min_samples: false,
            timezone: None,
            model_path: None,
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "collection_interval must be at least one second".to_string(),
            ));
        }
        if self.prediction_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "prediction_interval must be at least one second".to_string(),
            ));
        }
        if self.window_capacity == 0 {
            return Err(ConfigError::Invalid(
                "window_capacity must be positive".to_string(),
            ));
        }
        self.timezone()?;
        Ok(())
    }

    /// The configured zone, or `None` for the system zone.
    pub fn timezone(&self) -> Result<Option<Tz>, ConfigError> {
        self.timezone
            .as_deref()
            .map(|name| {
                name.parse::<Tz>()
                    .map_err(|_| ConfigError::UnknownTimezone(name.to_string()))
            })
            .transpose()
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_path.join("store.json")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    pub fn aggregator_config(&self) -> Result<AggregatorConfig, ConfigError> {
        Ok(AggregatorConfig {
            tick: self.collection_interval,
            min_samples: self.min_samples,
            policy: if self.enforce_min_samples {
                MinSamplePolicy::Enforce
            } else {
                MinSamplePolicy::BestEffort
            },
            timezone: self.timezone()?,
        })
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.collection_interval, Duration::from_secs(5));
        assert_eq!(config.prediction_interval, Duration::from_secs(5));
        assert_eq!(config.window_capacity, 60);
        assert!(!config.enforce_min_samples);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"collection_interval": 2, "timezone": "Asia/Tokyo"}"#)
                .unwrap();
        assert_eq!(config.collection_interval, Duration::from_secs(2));
        assert_eq!(config.embedding_dim, DEFAULT_EMBEDDING_DIM);
        assert_eq!(config.timezone().unwrap(), Some(chrono_tz::Asia::Tokyo));
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        let config = Config {
            timezone: Some("Mars/Olympus".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn test_rejects_zero_intervals() {
        let config = Config {
            collection_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_aggregator_config_policy() {
        let config = Config {
            enforce_min_samples: true,
            min_samples: 3,
            ..Config::default()
        };
        let aggregator = config.aggregator_config().unwrap();
        assert_eq!(aggregator.policy, MinSamplePolicy::Enforce);
        assert_eq!(aggregator.min_samples, 3);
        assert_eq!(aggregator.tick, Duration::from_secs(5));
    }
}
