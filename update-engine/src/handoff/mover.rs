//! Copying the staged payload over the installed build.

use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::migration::MIGRATIONS_FILE;
use crate::fs::walker::{walk_directory, FileInfo, WalkOptions};
use crate::manifest::{COMPRESSED_SUFFIX, REMOTE_MANIFEST_FILE};
use crate::utils::{Result, UpdateError};

/// Progress of the move, for the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveEvent {
    Moved { relative_path: String },

    /// Copying `path` failed; the move waits for an [`OperatorDecision`]
    Paused { path: PathBuf, error: String },

    Finished { moved: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorDecision {
    /// Try the failed file again and continue from there
    Retry,
    Abort,
}

/// Files in the staging directory that belong in the installed build
pub fn files_to_move(staging_dir: &Path) -> Result<Vec<FileInfo>> {
    let options = WalkOptions::default()
        .excluding_suffix(COMPRESSED_SUFFIX)
        .excluding_name(MIGRATIONS_FILE)
        .excluding_name(REMOTE_MANIFEST_FILE);
    walk_directory(staging_dir, &options).map_err(|e| UpdateError::filesystem(staging_dir, e))
}

/// Copy every staged file over its installed counterpart.
///
/// A failed copy pauses on that file until the operator decides. A closed
/// decision channel counts as [`OperatorDecision::Abort`].
pub async fn move_files(
    staging_dir: &Path,
    build_path: &Path,
    events: &mpsc::UnboundedSender<MoveEvent>,
    decisions: &mut mpsc::Receiver<OperatorDecision>,
    cancel: &CancellationToken,
) -> Result<usize> {
    let files = files_to_move(staging_dir)?;
    info!(count = files.len(), "Moving files");

    let mut index = 0;
    while index < files.len() {
        let file = &files[index];
        let target = build_path.join(&file.relative_path);

        match copy_file(&file.path, &target).await {
            Ok(()) => {
                info!(file = %file.relative_path, "Moved");
                let _ = events.send(MoveEvent::Moved {
                    relative_path: file.relative_path.clone(),
                });
                index += 1;
            }
            Err(e) => {
                warn!(file = %file.relative_path, error = %e, "Unable to replace file");
                let _ = events.send(MoveEvent::Paused {
                    path: target.clone(),
                    error: e.to_string(),
                });

                let decision = tokio::select! {
                    decision = decisions.recv() => decision.unwrap_or(OperatorDecision::Abort),
                    _ = cancel.cancelled() => OperatorDecision::Abort,
                };

                match decision {
                    OperatorDecision::Retry => info!(file = %file.relative_path, "Retrying"),
                    OperatorDecision::Abort => {
                        warn!("Update aborted by the operator");
                        return Err(UpdateError::Cancelled);
                    }
                }
            }
        }
    }

    let _ = events.send(MoveEvent::Finished { moved: files.len() });
    Ok(files.len())
}

async fn copy_file(source: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(source, target).await?;
    Ok(())
}
