//! Working out which files an update has to download.
//!
//! Every file listed in the remote manifest falls into one of three buckets:
//! already installed with the right content, already staged by an earlier
//! (interrupted) run, or queued for download. Before anything is queued the
//! installed tree is searched for a file with the same content under another
//! name; such files are copied into the staging directory instead of being
//! downloaded again.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::fs::walker::{walk_directory, walk_directory_with_callback, WalkOptions};
use crate::manifest::{RemoteFileRecord, RemoteManifest};
use crate::utils::hash::file_matches;
use crate::utils::{FileHash, Result, UpdateError};

/// A file that has to be fetched from a mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlanEntry {
    /// Position of the file in the remote manifest
    pub slot: usize,
    pub record: RemoteFileRecord,
}

/// Outcome of comparing the installed build against a remote manifest.
#[derive(Debug, Clone, Default)]
pub struct DownloadPlan {
    /// Files to download, in manifest order
    pub entries: Vec<DownloadPlanEntry>,

    /// Number of files in the remote manifest
    pub slot_count: usize,

    /// Relative paths that are already present and verified in staging
    pub staged: Vec<String>,
}

impl DownloadPlan {
    /// Sum of the download sizes of all queued files
    pub fn total_download_size(&self) -> u64 {
        self.entries.iter().map(|e| e.record.download_size()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compare the installed build against `remote` and decide what to download.
///
/// `on_progress` is called with `(files_examined, total_files)` after each
/// manifest entry.
pub fn plan_downloads<F>(
    remote: &RemoteManifest,
    build_path: &Path,
    staging_dir: &Path,
    mut on_progress: F,
) -> Result<DownloadPlan>
where
    F: FnMut(usize, usize),
{
    let total = remote.files.len();
    let mut plan = DownloadPlan {
        slot_count: total,
        ..Default::default()
    };

    for (slot, record) in remote.files.iter().enumerate() {
        let installed = build_path.join(&record.relative_path);
        let staged = staging_dir.join(&record.relative_path);

        match FileHash::of_file_if_exists(&installed) {
            Ok(Some(hash)) if hash == record.uncompressed_hash => {
                debug!(file = %record.relative_path, "Up to date");
            }
            Ok(Some(_)) => {
                plan.entries.push(DownloadPlanEntry {
                    slot,
                    record: record.clone(),
                });
            }
            Ok(None) if matches!(file_matches(&staged, &record.uncompressed_hash), Ok(true)) => {
                debug!(file = %record.relative_path, "Already staged");
                plan.staged.push(record.relative_path.clone());
            }
            Ok(None) => {
                plan.entries.push(DownloadPlanEntry {
                    slot,
                    record: record.clone(),
                });
            }
            Err(e) => {
                warn!(file = %record.relative_path, error = %e, "Unable to hash installed file");
                plan.entries.push(DownloadPlanEntry {
                    slot,
                    record: record.clone(),
                });
            }
        }

        on_progress(slot + 1, total);
    }

    if !plan.entries.is_empty() {
        reuse_installed_copies(&mut plan, build_path, staging_dir)?;
    }

    info!(
        queued = plan.entries.len(),
        staged = plan.staged.len(),
        total,
        "Download plan ready"
    );

    Ok(plan)
}

/// Copy installed files whose content matches a queued file into staging.
fn reuse_installed_copies(
    plan: &mut DownloadPlan,
    build_path: &Path,
    staging_dir: &Path,
) -> Result<()> {
    let index = index_installed_tree(build_path, staging_dir)?;
    if index.is_empty() {
        return Ok(());
    }

    let mut remaining = Vec::with_capacity(plan.entries.len());
    for entry in plan.entries.drain(..) {
        let Some(source) = index.get(&entry.record.uncompressed_hash) else {
            remaining.push(entry);
            continue;
        };

        let target = staging_dir.join(&entry.record.relative_path);
        match copy_into_staging(source, &target) {
            Ok(()) => {
                info!(
                    file = %entry.record.relative_path,
                    source = %source.display(),
                    "Reusing installed copy"
                );
                plan.staged.push(entry.record.relative_path.clone());
            }
            Err(e) => {
                warn!(file = %entry.record.relative_path, error = %e, "Unable to reuse installed copy");
                remaining.push(entry);
            }
        }
    }

    plan.entries = remaining;
    Ok(())
}

/// Hash every installed file outside the staging directory.
///
/// The first file seen for a given hash wins.
fn index_installed_tree(build_path: &Path, staging_dir: &Path) -> Result<HashMap<FileHash, PathBuf>> {
    let options = WalkOptions::default().excluding_dir(staging_dir);
    let mut index = HashMap::new();
    let mut failures = Vec::new();

    walk_directory_with_callback(build_path, &options, |file| match FileHash::of_file(&file.path) {
        Ok(hash) => {
            index.entry(hash).or_insert_with(|| file.path.clone());
        }
        Err(e) => failures.push((file.path.clone(), e)),
    })
    .map_err(|e| UpdateError::filesystem(build_path, e))?;

    for (path, error) in failures {
        debug!(path = %path.display(), %error, "Skipping unreadable file while indexing");
    }

    Ok(index)
}

fn copy_into_staging(source: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, target)?;
    Ok(())
}

/// Delete everything in `staging_dir` that the plan does not account for.
///
/// Kept are the download targets of queued files, every staged file and the
/// relative paths listed in `keep`. Returns the number of files removed.
pub fn sweep_staging(staging_dir: &Path, plan: &DownloadPlan, keep: &[&str]) -> Result<usize> {
    let keep: HashSet<String> = plan
        .entries
        .iter()
        .map(|e| e.record.download_file_name())
        .chain(plan.staged.iter().cloned())
        .chain(keep.iter().map(|name| name.to_string()))
        .collect();

    let files = walk_directory(staging_dir, &WalkOptions::default())
        .map_err(|e| UpdateError::filesystem(staging_dir, e))?;

    let mut removed = 0;
    for file in files {
        if keep.contains(&file.relative_path) {
            continue;
        }
        fs::remove_file(&file.path).map_err(|e| UpdateError::filesystem(&file.path, e))?;
        debug!(file = %file.relative_path, "Removed stale staging file");
        removed += 1;
    }

    if removed > 0 {
        info!(removed, "Swept staging directory");
    }
    Ok(removed)
}
