//! Configuration management for the updater.
//!
//! Loads configuration from a TOML file. Relative paths are resolved against
//! the build directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::downloader::{DEFAULT_MAX_RETRIES, DEFAULT_VERIFY_QUEUE_CAPACITY};
use crate::utils::{Result, UpdateError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub updater: UpdaterConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Root of the installed build
    pub build_path: PathBuf,

    /// Staging directory, relative to the build path
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// INI file holding the `[UpdateMirrors]` section
    #[serde(default = "default_mirrors_file")]
    pub mirrors_file: PathBuf,

    /// Second-stage executable launched after a completed download
    #[serde(default = "default_second_stage_path")]
    pub second_stage_path: PathBuf,

    /// Configuration handed to the second stage, written next to it
    #[serde(default = "default_second_stage_config")]
    pub second_stage_config: PathBuf,

    /// Failures tolerated per file before the update fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Downloaded files allowed to wait for verification
    #[serde(default = "default_verify_queue_capacity")]
    pub verify_queue_capacity: usize,

    /// Name of the lock the primary holds while running
    #[serde(default)]
    pub instance_guid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_staging_dir() -> PathBuf {
    PathBuf::from("Updater")
}

fn default_mirrors_file() -> PathBuf {
    PathBuf::from("UpdateMirrors.ini")
}

fn default_second_stage_path() -> PathBuf {
    PathBuf::from(if cfg!(windows) {
        "SecondStageUpdater.exe"
    } else {
        "second-stage"
    })
}

fn default_second_stage_config() -> PathBuf {
    PathBuf::from("SecondStageConfig.toml")
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_verify_queue_capacity() -> usize {
    DEFAULT_VERIFY_QUEUE_CAPACITY
}

pub(crate) fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| UpdateError::filesystem(path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| UpdateError::Config(e.to_string()))
    }

    /// Create a default configuration for a build directory
    pub fn for_build(build_path: impl Into<PathBuf>) -> Self {
        Config {
            updater: UpdaterConfig {
                build_path: build_path.into(),
                staging_dir: default_staging_dir(),
                mirrors_file: default_mirrors_file(),
                second_stage_path: default_second_stage_path(),
                second_stage_config: default_second_stage_config(),
                max_retries: default_max_retries(),
                verify_queue_capacity: default_verify_queue_capacity(),
                instance_guid: None,
            },
            log: LogConfig::default(),
        }
    }
}

impl UpdaterConfig {
    pub fn staging_path(&self) -> PathBuf {
        self.build_path.join(&self.staging_dir)
    }

    pub fn mirrors_path(&self) -> PathBuf {
        self.build_path.join(&self.mirrors_file)
    }

    pub fn second_stage_executable(&self) -> PathBuf {
        self.build_path.join(&self.second_stage_path)
    }

    /// Where the second-stage configuration lives, next to its executable
    pub fn second_stage_config_path(&self) -> PathBuf {
        let exe = self.second_stage_executable();
        match exe.parent() {
            Some(dir) => dir.join(&self.second_stage_config),
            None => self.build_path.join(&self.second_stage_config),
        }
    }
}
