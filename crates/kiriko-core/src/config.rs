//! Application configuration.
//!
//! Loaded from `config.toml` in the platform config directory; every field has
//! a default so a missing or partial file still yields a working config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the backend.
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between refreshes of the active scan-job list.
    pub jobs_interval_secs: u64,
    /// Seconds between refreshes of the sync progress record.
    pub sync_interval_secs: u64,
    /// Seconds between polls of an in-flight trim job.
    pub trim_interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            jobs_interval_secs: 2,
            sync_interval_secs: 2,
            trim_interval_secs: 1,
        }
    }
}

impl PollingConfig {
    pub fn jobs_interval(&self) -> Duration {
        Duration::from_secs(self.jobs_interval_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn trim_interval(&self) -> Duration {
        Duration::from_secs(self.trim_interval_secs)
    }
}

impl AppConfig {
    /// Load from the platform config dir, falling back to defaults when the
    /// file does not exist yet.
    pub fn load() -> Result<Self, CoreError> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn save(&self) -> Result<(), CoreError> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf, CoreError> {
        let dirs = ProjectDirs::from("app", "kiriko", "kiriko").ok_or(CoreError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}
