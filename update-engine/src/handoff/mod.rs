//! Second-stage handoff: replaces the installed build with the staged
//! payload once the primary application has exited.
//!
//! The sequence is wait → settle → read the installed version → move →
//! migrate → remove the staging directory. Relaunching the product is left
//! to the caller.

pub mod config;
pub mod migration;
pub mod mover;
pub mod wait;

pub use config::{SecondStageConfig, WaitStrategy};
pub use migration::{Migration, MigrationAction, MigrationSet, MIGRATIONS_FILE};
pub use mover::{MoveEvent, OperatorDecision};

use std::path::Path;
use std::process::{Child, Command};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::manifest::{LocalManifest, LOCAL_MANIFEST_FILE};
use crate::utils::{Result, UpdateError};

/// Summary of a finished handoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffReport {
    /// Version installed before the move (0 when unknown)
    pub previous_version: i32,
    pub files_moved: usize,
    pub migrations_run: usize,
}

/// Version number of the installed build, 0 when it cannot be determined.
pub fn installed_version(build_path: &Path) -> i32 {
    let path = build_path.join(LOCAL_MANIFEST_FILE);
    if !path.exists() {
        return 0;
    }
    match LocalManifest::parse(&path) {
        Ok(manifest) => manifest.version.number,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unable to read installed version");
            0
        }
    }
}

pub struct Handoff {
    config: SecondStageConfig,
    cancel: CancellationToken,
}

impl Handoff {
    pub fn new(config: SecondStageConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SecondStageConfig {
        &self.config
    }

    /// Token that aborts the handoff when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the handoff. `events` receives move progress; `decisions`
    /// answers [`MoveEvent::Paused`].
    pub async fn run(
        &self,
        events: mpsc::UnboundedSender<MoveEvent>,
        mut decisions: mpsc::Receiver<OperatorDecision>,
    ) -> Result<HandoffReport> {
        let staging_dir = self.config.staging_path();
        let build_path = &self.config.build_path;

        if !staging_dir.is_dir() {
            return Err(UpdateError::Config(format!(
                "{} is not a valid staging directory",
                staging_dir.display()
            )));
        }

        wait::wait_for_primary(&self.config.wait, &self.cancel).await?;

        let settle = Duration::from_secs(self.config.settle_delay_secs);
        tokio::select! {
            _ = tokio::time::sleep(settle) => {}
            _ = self.cancel.cancelled() => return Err(UpdateError::Cancelled),
        }

        let previous_version = installed_version(build_path);
        info!(previous_version, "Installing update");

        let migrations = MigrationSet::load(&staging_dir)?;

        let files_moved =
            mover::move_files(&staging_dir, build_path, &events, &mut decisions, &self.cancel)
                .await?;

        let migrations_run = migrations.perform(build_path, previous_version);

        if let Err(e) = tokio::fs::remove_dir_all(&staging_dir).await {
            warn!(path = %staging_dir.display(), error = %e, "Unable to remove staging directory");
        }

        info!(files_moved, migrations_run, "Update installed");
        Ok(HandoffReport {
            previous_version,
            files_moved,
            migrations_run,
        })
    }

    /// Start the product executable from the build directory.
    pub fn relaunch(&self) -> Result<Child> {
        let executable = self.config.product_path();
        info!(path = %executable.display(), "Launching application");
        Command::new(&executable)
            .current_dir(&self.config.build_path)
            .spawn()
            .map_err(|e| UpdateError::filesystem(executable, e))
    }
}
