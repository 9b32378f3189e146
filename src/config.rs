// src/config.rs

//! TOML configuration.
//!
//! Everything has a sensible default; a missing `Qrun.toml` is fine. CLI
//! flags override whatever the file says.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::errors::{QrunError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "Qrun.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub runner: RunnerSection,
    #[serde(default)]
    pub store: StoreSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSection {
    /// Most children allowed in flight at once.
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    /// Per-task wall-clock limit in seconds; 0 disables it.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Grace period between SIGTERM and SIGKILL, in seconds.
    #[serde(default = "default_kill_timeout_secs")]
    pub kill_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    /// Path of the durable tasks file.
    #[serde(default = "default_store_file")]
    pub file: String,
}

fn default_max_tasks() -> usize {
    64
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_kill_timeout_secs() -> u64 {
    2
}

fn default_store_file() -> String {
    "tasks.csv".to_string()
}

impl Default for RunnerSection {
    fn default() -> Self {
        RunnerSection {
            max_tasks: default_max_tasks(),
            timeout_secs: default_timeout_secs(),
            kill_timeout_secs: default_kill_timeout_secs(),
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        StoreSection {
            file: default_store_file(),
        }
    }
}

/// Load and validate a config file that must exist.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading config file at {path:?}"))?;
    let config: ConfigFile = toml::from_str(&contents)?;
    validate(&config)?;
    Ok(config)
}

/// Load `Qrun.toml` from the working directory when present, otherwise fall
/// back to the built-in defaults.
pub fn load_default() -> Result<ConfigFile> {
    if Path::new(DEFAULT_CONFIG_FILE).exists() {
        load_from_path(DEFAULT_CONFIG_FILE)
    } else {
        Ok(ConfigFile::default())
    }
}

fn validate(config: &ConfigFile) -> Result<()> {
    if config.runner.max_tasks < 1 {
        return Err(QrunError::Config("runner.max_tasks must be at least 1".into()));
    }
    Ok(())
}
