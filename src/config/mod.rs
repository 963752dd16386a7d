//! Application configuration stored as TOML
//!
//! Every section and field is optional in the file; anything left out takes
//! its default, so an empty file is a valid configuration.

pub mod sync;

pub use sync::{SyncConfig, SyncConfigBuilder};

use crate::channel::DEFAULT_BACKOFF_MS;
use crate::queue::DEFAULT_MAX_RETRIES;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "floor-sync";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub channel: ChannelConfig,
    pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub health_path: String,
    /// REST endpoint re-fetched while the live channel is down
    pub refresh_path: String,
    pub start_path: String,
    pub complete_path: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            request_timeout_secs: 15,
            health_path: "/api/health".to_string(),
            refresh_path: "/api/dashboard/metrics".to_string(),
            start_path: "/api/processes/start".to_string(),
            complete_path: "/api/processes/complete".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Queue database; defaults to `queue.db` in the config directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Live-update endpoint; derived from the backend URL when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub backoff_ms: Vec<u64>,
    pub poll_interval_ms: u64,
    /// Give up on a connection attempt whose upgrade gets no answer
    pub handshake_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: None,
            backoff_ms: DEFAULT_BACKOFF_MS.to_vec(),
            poll_interval_ms: 10_000,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl ChannelConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub probe_interval_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 5_000,
        }
    }
}

impl AppConfig {
    /// Per-user directory holding config, database and log
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "linux") {
            dirs::config_dir()
                .context("Failed to get XDG config directory")?
                .join(APP_DIR)
        } else {
            dirs::home_dir()
                .context("Failed to get home directory")?
                .join(format!(".{}", APP_DIR))
        };

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
            info!("Created config directory: {:?}", config_dir);
        }

        Ok(config_dir)
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn default_log_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("floor-sync.log"))
    }

    /// Load from `path`, or the default location when `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load_from(&Self::default_path()?),
        }
    }

    /// Load and validate; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from: {:?}", path);

        if !path.exists() {
            info!("Config file {:?} doesn't exist, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = Self::from_toml(&content).with_context(|| format!("Invalid config file: {:?}", path))?;

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config to TOML")
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        debug!("Saving config to: {:?}", path);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        fs::write(path, self.to_toml()?).with_context(|| format!("Failed to write config file: {:?}", path))?;

        info!("Config saved to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.backend.base_url)
            .with_context(|| format!("Invalid backend base_url '{}'", self.backend.base_url))?;
        if self.backend.request_timeout_secs == 0 {
            anyhow::bail!("backend.request_timeout_secs must be greater than zero");
        }
        if self.channel.handshake_timeout_ms == 0 {
            anyhow::bail!("channel.handshake_timeout_ms must be greater than zero");
        }
        self.sync_config().validate()
    }

    /// Seed the tuning sections from a preset, keeping backend and storage
    pub fn with_sync(mut self, sync: &SyncConfig) -> Self {
        self.queue.max_retries = sync.max_retries;
        self.channel.backoff_ms = sync.backoff.iter().map(|d| d.as_millis() as u64).collect();
        self.channel.poll_interval_ms = sync.poll_interval.as_millis() as u64;
        self.connectivity.probe_interval_ms = sync.probe_interval.as_millis() as u64;
        self
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_retries: self.queue.max_retries,
            backoff: self.channel.backoff_ms.iter().copied().map(Duration::from_millis).collect(),
            poll_interval: Duration::from_millis(self.channel.poll_interval_ms),
            probe_interval: Duration::from_millis(self.connectivity.probe_interval_ms),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("queue.db")),
        }
    }

    /// Live-update URL, `ws(s)://<backend host>/ws` unless configured
    pub fn channel_url(&self) -> String {
        if let Some(url) = &self.channel.url {
            return url.clone();
        }
        let base = self.backend.base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/ws", base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.channel.backoff_ms, vec![1000, 2000, 5000, 10000, 30000]);
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
            [backend]
            base_url = "https://mes.plant.local"

            [queue]
            max_retries = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_retries, 7);
        assert_eq!(config.backend.request_timeout_secs, 15);
        assert_eq!(config.channel_url(), "wss://mes.plant.local/ws");
        assert_eq!(config.sync_config().max_retries, 7);
    }

    #[test]
    fn test_explicit_channel_url_wins() {
        let mut config = AppConfig::default();
        assert_eq!(config.channel_url(), "ws://localhost:3000/ws");

        config.channel.url = Some("ws://10.0.0.5:9000/live".to_string());
        assert_eq!(config.channel_url(), "ws://10.0.0.5:9000/live");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_toml("[queue]\nmax_retries = 0").is_err());
        assert!(AppConfig::from_toml("[channel]\nbackoff_ms = [5000, 1000]").is_err());
        assert!(AppConfig::from_toml("[backend]\nbase_url = \"not a url\"").is_err());
        assert!(AppConfig::from_toml("[queue]\nmax_retries = \"many\"").is_err());
        assert!(AppConfig::from_toml("[channel]\nhandshake_timeout_ms = 0").is_err());
    }

    #[test]
    fn test_preset_roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = AppConfig::default().with_sync(&SyncConfig::cellular());
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.sync_config(), SyncConfig::cellular());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
