//! Publishing a build to a mirror layout.
//!
//! Produces the directory a mirror serves: every build file (optionally
//! compressed into `<path>.lzma`) plus the `ServerVersion` manifest.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::codec::Codec;
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::manifest::{
    RemoteFileRecord, RemoteManifest, VersionInfo, LOCAL_MANIFEST_FILE, REMOTE_MANIFEST_FILE,
};
use crate::utils::{FileHash, Result, UpdateError};

#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Compress files that shrink when compressed
    pub compress: bool,

    /// Files smaller than this are never compressed
    pub min_compress_size: u64,

    /// Extra file names left out of the build
    pub exclude_names: Vec<String>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            compress: true,
            min_compress_size: 4096,
            exclude_names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishReport {
    pub manifest: RemoteManifest,
    pub compressed: usize,
    pub copied: usize,
    /// Leftover files removed from the output directory
    pub removed: usize,
}

/// Publish the build in `source_dir` into `output_dir` as `version`.
pub fn publish_build(
    source_dir: &Path,
    output_dir: &Path,
    version: VersionInfo,
    options: &PublishOptions,
    codec: &dyn Codec,
) -> Result<PublishReport> {
    let mut walk = WalkOptions::default()
        .excluding_dir(output_dir)
        .excluding_name(REMOTE_MANIFEST_FILE)
        .excluding_name(LOCAL_MANIFEST_FILE);
    for name in &options.exclude_names {
        walk = walk.excluding_name(name.clone());
    }

    let files = walk_directory(source_dir, &walk).map_err(|e| UpdateError::filesystem(source_dir, e))?;
    fs::create_dir_all(output_dir).map_err(|e| UpdateError::filesystem(output_dir, e))?;

    let mut manifest = RemoteManifest::new(version);
    let mut produced = HashSet::new();
    let (mut compressed, mut copied) = (0, 0);

    for file in files {
        let data = fs::read(&file.path).map_err(|e| UpdateError::filesystem(&file.path, e))?;
        let mut record = RemoteFileRecord::new(
            file.relative_path.clone(),
            FileHash::of_bytes(&data),
            data.len() as u64,
        );

        let packed = if options.compress && file.size >= options.min_compress_size {
            let packed = codec
                .compress(&data)
                .map_err(|e| UpdateError::Codec(format!("{}: {}", file.relative_path, e)))?;
            (packed.len() < data.len()).then_some(packed)
        } else {
            None
        };

        let written = match packed {
            Some(packed) => {
                record = record.compressed(FileHash::of_bytes(&packed), packed.len() as u64);
                compressed += 1;
                debug!(file = %file.relative_path, size = data.len(), packed = packed.len(), "Compressed");
                packed
            }
            None => {
                copied += 1;
                debug!(file = %file.relative_path, "Copied");
                data
            }
        };

        let name = record.download_file_name();
        let target = output_dir.join(&name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| UpdateError::filesystem(parent, e))?;
        }
        fs::write(&target, written).map_err(|e| UpdateError::filesystem(&target, e))?;

        produced.insert(name);
        manifest.add_file(record)?;
    }

    manifest.write(&output_dir.join(REMOTE_MANIFEST_FILE))?;
    produced.insert(REMOTE_MANIFEST_FILE.to_string());

    let removed = remove_leftovers(output_dir, &produced)?;

    info!(
        version = manifest.version.number,
        files = manifest.files.len(),
        compressed,
        copied,
        removed,
        "Build published"
    );

    Ok(PublishReport {
        manifest,
        compressed,
        copied,
        removed,
    })
}

fn remove_leftovers(output_dir: &Path, produced: &HashSet<String>) -> Result<usize> {
    let existing = walk_directory(output_dir, &WalkOptions::default())
        .map_err(|e| UpdateError::filesystem(output_dir, e))?;

    let mut removed = 0;
    for file in existing {
        if !produced.contains(&file.relative_path) {
            fs::remove_file(&file.path).map_err(|e| UpdateError::filesystem(&file.path, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}
