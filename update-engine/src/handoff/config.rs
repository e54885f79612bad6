//! Configuration handed from the primary to the second stage.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{default_log_level, LogConfig};
use crate::utils::{Result, UpdateError};

/// How the second stage waits for the primary to exit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Acquire the primary's instance lock
    Mutex { guid: String },

    /// Poll the process table until no process has this name
    ProcessName { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondStageConfig {
    /// Root of the installed build
    pub build_path: PathBuf,

    /// Executable relaunched once the update is applied, relative to the build path
    pub product_executable: PathBuf,

    /// Seconds to wait after the primary has exited
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,

    /// Staging directory, relative to the build path
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Files that belong to the second stage itself; refreshed by the primary
    #[serde(default)]
    pub related_files: Vec<PathBuf>,

    pub wait: WaitStrategy,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_settle_delay_secs() -> u64 {
    3
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("Updater")
}

impl SecondStageConfig {
    pub fn new(
        build_path: impl Into<PathBuf>,
        product_executable: impl Into<PathBuf>,
        wait: WaitStrategy,
    ) -> Self {
        Self {
            build_path: build_path.into(),
            product_executable: product_executable.into(),
            settle_delay_secs: default_settle_delay_secs(),
            staging_dir: default_staging_dir(),
            related_files: Vec::new(),
            wait,
            log: LogConfig {
                level: default_log_level(),
            },
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| UpdateError::filesystem(path, e))?;
        toml::from_str(&content).map_err(|e| UpdateError::Config(e.to_string()))
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| UpdateError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| UpdateError::filesystem(parent, e))?;
        }
        std::fs::write(path, content).map_err(|e| UpdateError::filesystem(path, e))
    }

    pub fn staging_path(&self) -> PathBuf {
        self.build_path.join(&self.staging_dir)
    }

    pub fn product_path(&self) -> PathBuf {
        self.build_path.join(&self.product_executable)
    }
}
