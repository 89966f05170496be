//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/pitstop/config.toml)
//! 3. Environment variables (PITSTOP_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "PITSTOP";

/// Values shipped in sample configs that must never be treated as real credentials
const PLACEHOLDER_URL: &str = "https://YOUR_PROJECT.supabase.co";
const PLACEHOLDER_KEY: &str = "YOUR_ANON_KEY";

/// Which remote document store the sync client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    /// Hosted Supabase (PostgREST) table
    #[default]
    Supabase,
    /// JSON file on this device standing in for the cloud
    Local,
    /// Remote sync disabled; the app runs local-only
    None,
}

impl std::str::FromStr for RemoteBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supabase" => Ok(RemoteBackend::Supabase),
            "local" => Ok(RemoteBackend::Local),
            "none" | "" => Ok(RemoteBackend::None),
            other => anyhow::bail!(
                "Unknown remote backend '{}'. Use 'supabase', 'local' or 'none'.",
                other
            ),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (garage file, queue and image databases)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Remote document store backend
    #[serde(default)]
    pub remote_backend: RemoteBackend,

    /// Remote base URL (Supabase project URL)
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Remote API key (Supabase anon key)
    #[serde(default)]
    pub remote_key: Option<String>,

    /// Remote table holding one document per user
    #[serde(default = "default_remote_table")]
    pub remote_table: String,

    /// Size budget for the serialized garage file
    #[serde(default = "default_record_quota")]
    pub record_quota_bytes: u64,

    /// Optional size cap for the image cache database
    #[serde(default)]
    pub image_cache_quota_bytes: Option<u64>,

    /// Size budget for the local-fallback document store
    #[serde(default = "default_record_quota")]
    pub fallback_quota_bytes: u64,

    /// Delay before the first queue drain after startup
    #[serde(default = "default_startup_drain_delay")]
    pub startup_drain_delay_ms: u64,

    /// Backoff delay after the first failed replay
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Upper bound for the backoff delay
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Log file path (defaults to stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            remote_backend: RemoteBackend::default(),
            remote_url: None,
            remote_key: None,
            remote_table: default_remote_table(),
            record_quota_bytes: default_record_quota(),
            image_cache_quota_bytes: None,
            fallback_quota_bytes: default_record_quota(),
            startup_drain_delay_ms: default_startup_drain_delay(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (PITSTOP_DATA_DIR, PITSTOP_REMOTE_URL, ...)
    /// 2. Config file (~/.config/pitstop/config.toml or PITSTOP_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring an explicit path from the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
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

    /// Configuration rooted at a specific data directory, remote sync disabled
    pub fn local_only(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            remote_backend: RemoteBackend::None,
            ..Self::default()
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // PITSTOP_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // PITSTOP_REMOTE_BACKEND
        if let Ok(val) = std::env::var(format!("{}_REMOTE_BACKEND", ENV_PREFIX)) {
            match val.parse() {
                Ok(backend) => self.remote_backend = backend,
                Err(e) => tracing::warn!("Ignoring {}_REMOTE_BACKEND: {}", ENV_PREFIX, e),
            }
        }

        // PITSTOP_REMOTE_URL
        if let Ok(val) = std::env::var(format!("{}_REMOTE_URL", ENV_PREFIX)) {
            self.remote_url = if val.is_empty() { None } else { Some(val) };
        }

        // PITSTOP_REMOTE_KEY
        if let Ok(val) = std::env::var(format!("{}_REMOTE_KEY", ENV_PREFIX)) {
            self.remote_key = if val.is_empty() { None } else { Some(val) };
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

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with PITSTOP_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pitstop")
            .join("config.toml")
    }

    /// Whether remote credentials are present and not the sample placeholders
    pub fn has_remote_credentials(&self) -> bool {
        let url_ok = self
            .remote_url
            .as_deref()
            .map(str::trim)
            .is_some_and(|url| !url.is_empty() && url != PLACEHOLDER_URL);
        let key_ok = self
            .remote_key
            .as_deref()
            .map(str::trim)
            .is_some_and(|key| !key.is_empty() && key != PLACEHOLDER_KEY);
        url_ok && key_ok
    }

    /// Delay before the startup drain
    pub fn startup_drain_delay(&self) -> Duration {
        Duration::from_millis(self.startup_drain_delay_ms)
    }

    /// Path to the serialized garage (record collection)
    pub fn garage_path(&self) -> PathBuf {
        self.data_dir.join("garage.json")
    }

    /// Path to the persisted per-install user id
    pub fn user_id_path(&self) -> PathBuf {
        self.data_dir.join("user_id")
    }

    /// Path to the write queue database
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("sync_queue.db")
    }

    /// Path to the image cache database
    pub fn image_cache_path(&self) -> PathBuf {
        self.data_dir.join("images.db")
    }

    /// Path to the local-fallback document store
    pub fn fallback_store_path(&self) -> PathBuf {
        self.data_dir.join("offline_fleets.json")
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pitstop")
}

fn default_remote_table() -> String {
    "fleets".to_string()
}

fn default_record_quota() -> u64 {
    5 * 1024 * 1024
}

fn default_startup_drain_delay() -> u64 {
    3000
}

fn default_retry_base_delay() -> u64 {
    2000
}

fn default_retry_max_delay() -> u64 {
    30_000
}
