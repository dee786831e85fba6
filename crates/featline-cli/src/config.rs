//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use featline_core::{RetryPolicy, ThrottleSignal};
use featline_transfer::TransferOptions;
use serde::Deserialize;

/// Global configuration for featline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub transfer: TransferConfig,
    pub export: ExportConfig,
}

/// Where the local stores live. Paths may reference `${VAR}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(deserialize_with = "deserialize_env_path")]
    pub catalog: PathBuf,
    #[serde(deserialize_with = "deserialize_env_path")]
    pub online_root: PathBuf,
    #[serde(deserialize_with = "deserialize_env_path")]
    pub offline_root: PathBuf,
    /// Default location for materialized query results
    #[serde(deserialize_with = "deserialize_env_path")]
    pub results_location: PathBuf,
    pub account_id: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            catalog: PathBuf::from("./featline-catalog.toml"),
            online_root: PathBuf::from("./featline-data/online"),
            offline_root: PathBuf::from("./featline-data/offline"),
            results_location: PathBuf::from("./featline-data/results"),
            account_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub throttle_cooldown_ms: u64,
    pub throttle_decay: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: featline_transfer::DEFAULT_BATCH_SIZE,
            max_workers: featline_transfer::DEFAULT_MAX_WORKERS,
            max_retries: featline_core::retry::DEFAULT_MAX_RETRIES,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            throttle_cooldown_ms: 500,
            throttle_decay: 10,
        }
    }
}

impl TransferConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn options(&self) -> TransferOptions {
        TransferOptions {
            batch_size: self.batch_size,
            max_workers: self.max_workers,
            retry: self.retry_policy(),
        }
    }

    pub fn throttle(&self) -> ThrottleSignal {
        ThrottleSignal::new(
            Duration::from_millis(self.throttle_cooldown_ms),
            self.throttle_decay,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub chunk_size: usize,
    pub database: String,
    pub poll_interval_ms: u64,
    pub max_wait_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            chunk_size: featline_export::DEFAULT_CHUNK_SIZE,
            database: featline_export::DEFAULT_DATABASE.to_string(),
            poll_interval_ms: 2_000,
            max_wait_secs: 300,
        }
    }
}

/// Deserialize a path that may contain environment variable references like ${VAR}
fn deserialize_env_path<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(PathBuf::from(expand_env_vars(&s)))
}

/// Expand every ${VAR} in `s`; unset variables expand to nothing.
fn expand_env_vars(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => log::warn!("Environment variable {name} is not set"),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./featline.toml (current directory)
    /// 2. ~/.config/featline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("featline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "featline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
