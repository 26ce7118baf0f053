//! dbwarden configuration
//!
//! Loaded from `$WARDEN_CONFIG` or `~/.config/dbwarden/config.yaml`. Every
//! field has a default, so a missing file is not an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "WARDEN_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub logging: LoggingConfig,
    pub bruteforce: BruteforceConfig,
    pub connection: ConnectionConfig,
    pub store: StoreConfig,
    pub nvd: NvdConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warden=info".into(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BruteforceConfig {
    /// Minimum gap between two progress reports for the same run
    pub progress_interval_ms: u64,
    /// Rows fetched per corpus page
    pub page_size: usize,
    /// Project whose harvested secrets are tried first
    pub project_id: i64,
}

impl Default for BruteforceConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 1000,
            page_size: 10_000,
            project_id: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON state file. Defaults to the platform data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NvdConfig {
    /// CVEs never reported, whatever the version
    pub ignored_cves: Vec<String>,
}

impl Default for NvdConfig {
    fn default() -> Self {
        Self {
            ignored_cves: vec!["CVE-2009-2943".into(), "CVE-2010-3781".into()],
        }
    }
}

impl WardenConfig {
    /// Location used when no explicit path is given
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dbwarden")
            .join("config.yaml")
    }

    /// Load from the default location, falling back to defaults
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_path())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: WardenConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bruteforce.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "bruteforce.page_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.connection.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "connection.timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Resolved state file path
    pub fn store_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("dbwarden")
                .join("state.json")
        })
    }
}
