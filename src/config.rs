//! Configuration file and environment support.
//!
//! Worker settings load from `.tasque.toml` (or an explicit path) with
//! environment-variable overrides.
//!
//! ## Resolution order
//!
//! 1. Environment variables (`TASQUE_WORKER_INTERVAL`,
//!    `TASQUE_WORKER_MAX_RUN_TIME`, `TASQUE_WORKER_PRIORITY`)
//! 2. Config file
//! 3. Built-in defaults

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::models::Priority;
use crate::worker::{WorkerConfig, DEFAULT_INTERVAL};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".tasque.toml";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TasqueConfig {
    /// Worker-specific settings.
    #[serde(default)]
    pub worker: WorkerSection,
}

/// Worker settings section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct WorkerSection {
    /// Sleep interval between polls, in seconds.
    pub interval_secs: Option<u64>,
    /// Total worker lifetime, in seconds.
    pub max_run_time_secs: Option<u64>,
    /// Priority filter ("test", "low", "normal", "high").
    pub priority: Option<String>,
}

/// Configuration loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The priority string is not a recognized level.
    #[error("unknown priority {0:?}, expected one of test, low, normal, high")]
    InvalidPriority(String),
}

/// Loads configuration from a file (or the default location) and applies
/// environment overrides.
///
/// With no explicit path, a missing `.tasque.toml` is not an error -
/// defaults apply. Environment values that fail to parse are ignored.
///
/// # Errors
///
/// Returns `ConfigError` if an explicitly given file cannot be read or
/// parsed.
pub fn load_config(path: Option<&Path>) -> Result<TasqueConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_file(path)?,
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                parse_file(default)?
            } else {
                TasqueConfig::default()
            }
        }
    };

    if let Some(secs) = env_u64("TASQUE_WORKER_INTERVAL") {
        config.worker.interval_secs = Some(secs);
    }
    if let Some(secs) = env_u64("TASQUE_WORKER_MAX_RUN_TIME") {
        config.worker.max_run_time_secs = Some(secs);
    }
    if let Ok(priority) = env::var("TASQUE_WORKER_PRIORITY") {
        if !priority.is_empty() {
            config.worker.priority = Some(priority);
        }
    }

    Ok(config)
}

fn parse_file(path: &Path) -> Result<TasqueConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

impl TasqueConfig {
    /// Converts the worker section into a [`WorkerConfig`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPriority` if the priority string is
    /// not a recognized level.
    pub fn worker_config(&self) -> Result<WorkerConfig, ConfigError> {
        let priority = match &self.worker.priority {
            Some(value) => Some(
                value
                    .parse::<Priority>()
                    .map_err(|()| ConfigError::InvalidPriority(value.clone()))?,
            ),
            None => None,
        };

        Ok(WorkerConfig {
            interval: self
                .worker
                .interval_secs
                .map_or(DEFAULT_INTERVAL, Duration::from_secs),
            max_run_time: self.worker.max_run_time_secs.map(Duration::from_secs),
            priority,
        })
    }
}
