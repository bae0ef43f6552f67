//! On-disk configuration document and its persistence.
//!
//! Covers:
//! - `Config` / `SyncSettings` types with serde defaults
//! - `load_from` / `save_to` (YAML file I/O with atomic write)
//! - XDG-style path helpers (`config_path`, `config_dir`, `default_library_path`)

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::subscription::SubscriptionRepo;

// ── Serde default helpers ──────────────────────────────────────────────

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_size_bytes() -> usize {
    1_048_576
}

fn default_true() -> bool {
    true
}

/// Tuning knobs for the sync engine and job scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    /// Maximum item fetches in flight per sync job (default: 4)
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Run whole sync jobs one at a time across repositories (default: true)
    #[serde(default = "default_true")]
    pub serialize_jobs: bool,

    /// Timeout for a single HTTP request, in seconds (default: 30)
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Maximum accepted response body size in bytes (default: 1 MB)
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,

    /// Accept plain `http://` repository URLs (default: true)
    #[serde(default = "default_true")]
    pub allow_http: bool,

    /// Commit the manifest ETag on check-only runs too (default: false)
    #[serde(default)]
    pub commit_manifest_on_check: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            serialize_jobs: true,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_size_bytes: default_max_size_bytes(),
            allow_http: true,
            commit_manifest_on_check: false,
        }
    }
}

impl SyncSettings {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::Validation(
                "sync.max_concurrent_fetches must be at least 1".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "sync.fetch_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// The persisted configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Subscribed repositories, in display order
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionRepo>,

    /// Last-seen ETag per fetched resource URL
    #[serde(default)]
    pub url_to_etags: BTreeMap<String, String>,

    /// Where the preset library lives (default: next to the config file)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_path: Option<PathBuf>,

    /// Sync engine settings
    #[serde(default)]
    pub sync: SyncSettings,
}

impl Config {
    /// Load configuration from the default location, or defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, or defaults if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        log::info!("Loading config from {:?}", path);
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let config: Config =
            serde_yaml_ng::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.sync.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
        }

        let yaml = serde_yaml_ng::to_string(self).map_err(ConfigError::Serialize)?;

        // Atomic save: write to temp file then rename to prevent corruption on crash
        let temp_path = path.with_extension("yaml.tmp");
        fs::write(&temp_path, &yaml).map_err(|e| ConfigError::io(&temp_path, e))?;
        fs::rename(&temp_path, path).map_err(|e| ConfigError::io(path, e))?;

        Ok(())
    }

    /// Get the configuration directory path
    pub fn config_dir() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("waymark-sync"),
            None => PathBuf::from("."),
        }
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.yaml")
    }

    /// Resolve the preset library file, relative to `config_path`'s directory
    /// when no explicit `library_path` is configured.
    pub fn library_path_for(&self, config_path: &Path) -> PathBuf {
        match &self.library_path {
            Some(path) => path.clone(),
            None => config_path
                .parent()
                .map(|dir| dir.join("presets.json"))
                .unwrap_or_else(|| PathBuf::from("presets.json")),
        }
    }
}
