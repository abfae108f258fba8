//! Runtime configuration.
//!
//! Layers, later wins: built-in defaults, an optional JSON file, `QUEUECTL_*`
//! environment variables, then whatever the CLI sets on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};
use crate::queue::BackoffPolicy;

pub const ENV_QUEUE_FILE: &str = "QUEUECTL_QUEUE_FILE";
pub const ENV_MAX_RETRIES: &str = "QUEUECTL_MAX_RETRIES";
pub const ENV_BACKOFF_BASE: &str = "QUEUECTL_BACKOFF_BASE";
pub const ENV_BACKOFF_UNIT_MS: &str = "QUEUECTL_BACKOFF_UNIT_MS";
pub const ENV_WORKERS: &str = "QUEUECTL_WORKERS";

/// Config file picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub queue_file: PathBuf,
    pub default_max_retries: u32,
    pub default_backoff_base: u32,
    pub backoff_unit_ms: u64,
    pub workers: usize,
    pub command_timeout_secs: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_file: PathBuf::from("queue.json"),
            default_max_retries: 3,
            default_backoff_base: BackoffPolicy::DEFAULT_BASE,
            backoff_unit_ms: 1000,
            workers: 1,
            command_timeout_secs: None,
        }
    }
}

impl QueueConfig {
    /// Read a JSON config file. Keys left out keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| QueueError::Config(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| QueueError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Defaults, then `path` (or `config.json` if it exists), then the
    /// process environment. Not yet validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `lookup`, which maps a variable name to its value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(file) = lookup(ENV_QUEUE_FILE) {
            self.queue_file = PathBuf::from(file);
        }
        if let Some(v) = lookup(ENV_MAX_RETRIES) {
            self.default_max_retries = parse_var(ENV_MAX_RETRIES, &v)?;
        }
        if let Some(v) = lookup(ENV_BACKOFF_BASE) {
            self.default_backoff_base = parse_var(ENV_BACKOFF_BASE, &v)?;
        }
        if let Some(v) = lookup(ENV_BACKOFF_UNIT_MS) {
            self.backoff_unit_ms = parse_var(ENV_BACKOFF_UNIT_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_WORKERS) {
            self.workers = parse_var(ENV_WORKERS, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(QueueError::Config("workers must be at least 1".to_string()));
        }
        if self.queue_file.as_os_str().is_empty() {
            return Err(QueueError::Config("queue_file must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.default_backoff_base,
            Duration::from_millis(self.backoff_unit_ms),
        )
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| QueueError::Config(format!("{key}={value:?}: {e}")))
}
