//! Client configuration.
//!
//! Loaded from `<config_dir>/tmon/config.toml`. Every key is optional; a
//! missing file means defaults, a malformed one is an error for the caller
//! to surface. The `TMON_API_BASE` environment variable and CLI flags are
//! layered on top by the binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding `base_url`.
pub const API_BASE_ENV: &str = "TMON_API_BASE";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8082/api";
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 20;

/// Settings shared by the gateway, synchronizer and history engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// API base, e.g. `http://localhost:8082/api`.
    pub base_url: String,
    /// Transport timeout for a single request.
    pub timeout_ms: u64,
    /// Live tree refresh interval.
    pub poll_interval_ms: u64,
    /// Default history page size.
    pub history_page_size: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
        }
    }
}

impl MonitorConfig {
    /// `<config_dir>/tmon/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tmon").join("config.toml"))
    }

    /// Loads the default config file, falling back to defaults when the
    /// platform has no config dir or the file does not exist.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `TMON_API_BASE` when set and non-empty.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_env_lookup(|key| std::env::var(key).ok())
    }

    #[must_use]
    pub fn with_env_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(base) = lookup(API_BASE_ENV).filter(|v| !v.trim().is_empty()) {
            self.base_url = base;
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            anyhow::bail!("base_url must not be empty");
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("timeout_ms must be greater than zero");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
