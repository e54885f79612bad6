//! Single-instance lock held by the running application.
//!
//! The lock is an exclusive OS file lock on `<temp>/<guid>.lock`. The second
//! stage waits for the primary to exit by probing the same lock; if the
//! primary dies the OS releases it.

use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::utils::{Result, UpdateError};

/// Path of the lock file for an instance GUID
pub fn lock_path(guid: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}.lock", guid))
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| UpdateError::filesystem(path, e))
}

/// Held for the lifetime of the primary process.
pub struct InstanceGuard {
    file: File,
    path: PathBuf,
}

impl InstanceGuard {
    /// Take the instance lock, failing if another process holds it.
    pub fn acquire(guid: &str) -> Result<Self> {
        let path = lock_path(guid);
        let file = open_lock_file(&path)?;

        let locked = FileExt::try_lock_exclusive(&file).map_err(|e| UpdateError::filesystem(&path, e))?;
        if !locked {
            return Err(UpdateError::InvalidOperation(format!(
                "another instance holds {}",
                path.display()
            )));
        }

        debug!(path = %path.display(), "Instance lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release instance lock");
        }
    }
}

/// Whether some process currently holds the instance lock for `guid`.
pub fn is_held(guid: &str) -> Result<bool> {
    let path = lock_path(guid);
    let file = open_lock_file(&path)?;

    let acquired = FileExt::try_lock_exclusive(&file).map_err(|e| UpdateError::filesystem(&path, e))?;
    if acquired {
        FileExt::unlock(&file).map_err(|e| UpdateError::filesystem(&path, e))?;
    }
    Ok(!acquired)
}
