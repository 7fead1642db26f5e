//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/fernpost/config.toml)
//! 3. Environment variables (FERNPOST_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Environment variable prefix
const ENV_PREFIX: &str = "FERNPOST";

const DEFAULT_INSERTION_DELAY_SECS: u64 = 60;
const DEFAULT_INSERT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_IMAGE_SIZE: u64 = 2 * 1024 * 1024;
const DEFAULT_MAX_HTML_SIZE: u64 = 256 * 1024;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory for local state (one file per identity)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Root of the directory-backed publish store
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Quiet time after the last edit before a new edition is inserted
    #[serde(default = "default_insertion_delay_secs")]
    pub insertion_delay_secs: u64,

    /// Tick period of the insert loop
    #[serde(default = "default_insert_poll_interval_ms")]
    pub insert_poll_interval_ms: u64,

    /// Linked images larger than this are not downloaded
    #[serde(default = "default_max_image_size")]
    pub max_image_size: u64,

    /// Linked pages larger than this are not downloaded
    #[serde(default = "default_max_html_size")]
    pub max_html_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            store_dir: default_store_dir(),
            insertion_delay_secs: default_insertion_delay_secs(),
            insert_poll_interval_ms: default_insert_poll_interval_ms(),
            max_image_size: default_max_image_size(),
            max_html_size: default_max_html_size(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (FERNPOST_DATA_DIR, FERNPOST_STORE_DIR,
    ///    FERNPOST_INSERTION_DELAY)
    /// 2. Config file (~/.config/fernpost/config.toml or FERNPOST_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // FERNPOST_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // FERNPOST_STORE_DIR
        if let Ok(val) = std::env::var(format!("{}_STORE_DIR", ENV_PREFIX)) {
            self.store_dir = PathBuf::from(val);
        }

        // FERNPOST_INSERTION_DELAY, in seconds
        if let Ok(val) = std::env::var(format!("{}_INSERTION_DELAY", ENV_PREFIX)) {
            match val.trim().parse() {
                Ok(secs) => self.insertion_delay_secs = secs,
                Err(_) => warn!("Ignoring invalid {}_INSERTION_DELAY: {:?}", ENV_PREFIX, val),
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with FERNPOST_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fernpost")
            .join("config.toml")
    }

    /// Directory holding one state file per identity
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn insertion_delay(&self) -> Duration {
        Duration::from_secs(self.insertion_delay_secs)
    }

    pub fn insert_poll_interval(&self) -> Duration {
        Duration::from_millis(self.insert_poll_interval_ms)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fernpost")
}

fn default_store_dir() -> PathBuf {
    default_data_dir().join("store")
}

fn default_insertion_delay_secs() -> u64 {
    DEFAULT_INSERTION_DELAY_SECS
}

fn default_insert_poll_interval_ms() -> u64 {
    DEFAULT_INSERT_POLL_INTERVAL_MS
}

fn default_max_image_size() -> u64 {
    DEFAULT_MAX_IMAGE_SIZE
}

fn default_max_html_size() -> u64 {
    DEFAULT_MAX_HTML_SIZE
}

/// Live-reconfigurable insertion delay
///
/// Clones share the value; every receiver from [`InsertionDelay::subscribe`]
/// sees a change as soon as [`InsertionDelay::set`] returns.
#[derive(Debug, Clone)]
pub struct InsertionDelay {
    tx: Arc<watch::Sender<Duration>>,
}

impl InsertionDelay {
    pub fn new(delay: Duration) -> Self {
        let (tx, _rx) = watch::channel(delay);
        Self { tx: Arc::new(tx) }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.insertion_delay())
    }

    pub fn get(&self) -> Duration {
        *self.tx.borrow()
    }

    /// Change the delay for every observer
    pub fn set(&self, delay: Duration) {
        let previous = self.tx.send_replace(delay);
        if previous != delay {
            info!("Insertion delay changed from {:?} to {:?}", previous, delay);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Duration> {
        self.tx.subscribe()
    }
}
