use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_MAX_UNITS_PER_PACKAGE: usize = 3;
pub const DEFAULT_WORKER_COUNT: usize = 2;
pub const DEFAULT_STORE_RETRY_BACKOFF_MS: u64 = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_max_units")]
    pub max_units_per_package: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    pub output_dir: Option<String>,
    #[serde(default = "default_backoff_ms")]
    pub store_retry_backoff_ms: u64,
}

fn default_max_units() -> usize {
    DEFAULT_MAX_UNITS_PER_PACKAGE
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

fn default_backoff_ms() -> u64 {
    DEFAULT_STORE_RETRY_BACKOFF_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_units_per_package: DEFAULT_MAX_UNITS_PER_PACKAGE,
            worker_count: DEFAULT_WORKER_COUNT,
            output_dir: None,
            store_retry_backoff_ms: DEFAULT_STORE_RETRY_BACKOFF_MS,
        }
    }
}

impl Config {
    pub fn planforge_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".planforge"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::planforge_dir()?.join("planforge.toml"))
    }

    /// Root of the task store and per-task project directories.
    pub fn effective_output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => expand_tilde(dir),
            None => PathBuf::from("./output"),
        }
    }

    pub fn store_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.store_retry_backoff_ms)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            tracing::debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        tracing::debug!(
            max_units = config.max_units_per_package,
            workers = config.worker_count,
            output_dir = ?config.output_dir,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::planforge_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "config saved");
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
