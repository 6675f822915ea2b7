//! On-disk configuration for the CLI.
//!
//! Settings live in a JSON file under the config directory
//! (`~/.config/mirador` unless `MIRADOR_CONFIG_DIR` overrides it).
//! Missing files are replaced with written-out defaults so users have a
//! file to edit after the first run.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable that overrides the config directory.
pub const CONFIG_DIR_ENV: &str = "MIRADOR_CONFIG_DIR";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the config file failed.
    #[error("config IO error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file contains invalid JSON.
    #[error("invalid config file {path}: {source}")]
    Parse {
        /// Path of the malformed file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// User-configurable settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where downloaded files are saved.
    pub download_dir: PathBuf,
    /// How many files to download in parallel.
    pub max_concurrent_downloads: usize,
    /// Request-rate ceiling for all outbound HTTP requests.
    pub requests_per_second: f64,
    /// Days before an indexed directory is considered stale.
    pub index_stale_days: i64,
    /// Root URL of the remote file-listing server.
    pub base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: home_dir_or_fallback().join("Downloads").join("mirador"),
            max_concurrent_downloads: 3,
            requests_per_second: 5.0,
            index_stale_days: 7,
            base_url: "https://myrient.erista.me/files/".to_string(),
        }
    }
}

impl Config {
    /// Reads the config from disk, writing defaults if no file exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] on read/write failures other than
    /// file-not-found, and [`ConfigError::Parse`] on malformed JSON.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path();
        match std::fs::read(&path) {
            Ok(data) => {
                let cfg: Self = serde_json::from_slice(&data).map_err(|source| {
                    ConfigError::Parse {
                        path: path.clone(),
                        source,
                    }
                })?;
                Ok(cfg)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, writing defaults");
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    /// Writes the config to disk, creating the config directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the directory or file cannot be written.
    pub fn save(&self) -> Result<(), ConfigError> {
        let dir = config_dir();
        std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = config_path();
        let data = serde_json::to_vec_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, data).map_err(|source| ConfigError::Io { path, source })
    }
}

fn home_dir_or_fallback() -> PathBuf {
    env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
}

/// Returns the directory where config and data files are stored.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(dir) = env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    home_dir_or_fallback().join(".config").join("mirador")
}

/// Returns the path to the SQLite index database.
#[must_use]
pub fn db_path() -> PathBuf {
    config_dir().join("index.db")
}

/// Returns the path to the config file.
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_concurrent_downloads, 3);
        assert!((cfg.requests_per_second - 5.0).abs() < f64::EPSILON);
        assert_eq!(cfg.index_stale_days, 7);
        assert!(cfg.base_url.ends_with('/'));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let cfg = Config {
            download_dir: PathBuf::from("/tmp/dl"),
            max_concurrent_downloads: 5,
            requests_per_second: 2.5,
            index_stale_days: 14,
            base_url: "https://mirror.example.com/files/".to_string(),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.download_dir, cfg.download_dir);
        assert_eq!(parsed.max_concurrent_downloads, 5);
        assert_eq!(parsed.index_stale_days, 14);
        assert_eq!(parsed.base_url, cfg.base_url);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config = serde_json::from_str(r#"{"index_stale_days": 30}"#).unwrap();
        assert_eq!(parsed.index_stale_days, 30);
        assert_eq!(parsed.max_concurrent_downloads, 3);
    }
}
