//! # Configs Module
//!
//! `RankingSettings` is the on-disk shape of the engine's tunables. Files are
//! JSON with camelCase keys; every key is optional and falls back to the
//! built-in default, so a file only needs the values it changes.
//!
//! ```json
//! { "redisUrl": "redis://cache:6379/", "maxTopN": 50 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// # Ranking Settings
///
/// Connection targets, deadlines and broadcast sizing for one engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RankingSettings {
    pub redis_url: String,
    pub database_url: String,
    pub db_max_connections: usize,
    pub store_timeout_ms: u64,
    pub service_timeout_ms: u64,
    pub broadcast_capacity: usize,
    pub broadcast_top_n: usize,
    pub max_top_n: usize,
    pub channel_write_timeout_ms: u64,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            database_url: "postgres://postgres@127.0.0.1:5432/leaderboard".to_string(),
            db_max_connections: 8,
            store_timeout_ms: 2000,
            service_timeout_ms: 2000,
            broadcast_capacity: 32,
            broadcast_top_n: 10,
            max_top_n: 100,
            channel_write_timeout_ms: 1000,
            log_dir: PathBuf::from("./logs"),
            log_level: "info".to_string(),
        }
    }
}

impl RankingSettings {
    /// Reads a JSON settings file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let settings = Self::parse_file(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads the file if it exists, otherwise yields the defaults. The result
    /// is not validated; callers layer their overrides on top and then call
    /// `validate` once.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::parse_file(path)
        } else {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
            Ok(Self::default())
        }
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Rejects values that would make the engine unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("storeTimeoutMs", self.store_timeout_ms as usize),
            ("serviceTimeoutMs", self.service_timeout_ms as usize),
            ("broadcastCapacity", self.broadcast_capacity),
            ("broadcastTopN", self.broadcast_top_n),
            ("maxTopN", self.max_top_n),
            ("channelWriteTimeoutMs", self.channel_write_timeout_ms as usize),
            ("dbMaxConnections", self.db_max_connections),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.broadcast_top_n > self.max_top_n {
            return Err(ConfigError::Invalid {
                field: "broadcastTopN",
                reason: format!("exceeds maxTopN ({})", self.max_top_n),
            });
        }
        Ok(())
    }

    pub fn channel_write_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_write_timeout_ms)
    }
}

impl From<&RankingSettings> for EngineSettings {
    fn from(settings: &RankingSettings) -> Self {
        EngineSettings {
            store_timeout: Duration::from_millis(settings.store_timeout_ms),
            service_timeout: Duration::from_millis(settings.service_timeout_ms),
            broadcast_top_n: settings.broadcast_top_n,
            max_top_n: settings.max_top_n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_engine_defaults() {
        let engine: EngineSettings = (&RankingSettings::default()).into();
        let expected = EngineSettings::default();
        assert_eq!(engine.store_timeout, expected.store_timeout);
        assert_eq!(engine.service_timeout, expected.service_timeout);
        assert_eq!(engine.broadcast_top_n, expected.broadcast_top_n);
        assert_eq!(engine.max_top_n, expected.max_top_n);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"redisUrl": "redis://cache:6379/", "maxTopN": 50}}"#).unwrap();

        let settings = RankingSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.redis_url, "redis://cache:6379/");
        assert_eq!(settings.max_top_n, 50);
        assert_eq!(settings.store_timeout_ms, 2000);
        assert_eq!(settings.broadcast_capacity, 32);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = RankingSettings::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, RankingSettings::default());
    }

    #[test]
    fn loading_leaves_validation_to_the_caller() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"broadcastTopN": 200}}"#).unwrap();

        let loaded = RankingSettings::load_or_default(file.path()).unwrap();
        assert_eq!(loaded.broadcast_top_n, 200);
        assert!(loaded.validate().is_err());
        assert!(matches!(
            RankingSettings::from_file(file.path()),
            Err(ConfigError::Invalid { field: "broadcastTopN", .. })
        ));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            RankingSettings::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn zero_and_inconsistent_values_are_rejected() {
        let zero = RankingSettings {
            max_top_n: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(ConfigError::Invalid { field: "maxTopN", .. })
        ));

        let oversized = RankingSettings {
            broadcast_top_n: 200,
            ..Default::default()
        };
        assert!(matches!(
            oversized.validate(),
            Err(ConfigError::Invalid { field: "broadcastTopN", .. })
        ));
    }
}
