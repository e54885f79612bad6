//! File records as listed in the `[Files]` section of a build manifest.

use std::path::{Component, Path};

use crate::utils::{FileHash, Result, UpdateError};

/// Suffix appended to the download name of compressed files on a mirror.
pub const COMPRESSED_SUFFIX: &str = ".lzma";

/// A single line of a manifest's `[Files]` section.
pub trait FileRecord: Clone + Send + Sync + 'static {
    /// Path relative to the build root, always `/`-separated.
    fn relative_path(&self) -> &str;

    /// Build a record from the comma-separated fields of a manifest line.
    fn from_fields(fields: &[&str]) -> Result<Self>;

    /// Render the record back into its comma-joined manifest form.
    fn to_line(&self) -> String;
}

/// Compression details of a remote file that is stored compressed on the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
    pub hash: FileHash,
    pub size: u64,
}

/// A file of the remote build, as published on the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileRecord {
    pub relative_path: String,
    pub uncompressed_hash: FileHash,
    pub uncompressed_size: u64,
    /// Present iff the file is stored compressed on the mirror.
    pub compression: Option<Compression>,
}

impl RemoteFileRecord {
    pub fn new(relative_path: impl Into<String>, hash: FileHash, size: u64) -> Self {
        Self {
            relative_path: normalize_path(&relative_path.into()),
            uncompressed_hash: hash,
            uncompressed_size: size,
            compression: None,
        }
    }

    pub fn compressed(mut self, hash: FileHash, size: u64) -> Self {
        self.compression = Some(Compression { hash, size });
        self
    }

    pub fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }

    /// Number of bytes transferred when downloading this file.
    pub fn download_size(&self) -> u64 {
        match &self.compression {
            Some(c) => c.size,
            None => self.uncompressed_size,
        }
    }

    /// Digest of the file exactly as it is transferred.
    pub fn download_hash(&self) -> FileHash {
        match &self.compression {
            Some(c) => c.hash,
            None => self.uncompressed_hash,
        }
    }

    /// Name of the file on the mirror and in the staging directory while
    /// it is still compressed.
    pub fn download_file_name(&self) -> String {
        if self.is_compressed() {
            format!("{}{}", self.relative_path, COMPRESSED_SUFFIX)
        } else {
            self.relative_path.clone()
        }
    }
}

impl FileRecord for RemoteFileRecord {
    fn relative_path(&self) -> &str {
        &self.relative_path
    }

    fn from_fields(fields: &[&str]) -> Result<Self> {
        if fields.len() < 4 {
            return Err(UpdateError::Parse(format!(
                "remote file record has {} fields, expected 4 or 6",
                fields.len()
            )));
        }

        let relative_path = parse_path(fields[0])?;
        let uncompressed_hash: FileHash = fields[1].parse()?;
        let uncompressed_size = parse_size(fields[2])?;
        let compressed = fields[3]
            .trim()
            .parse::<i32>()
            .map_err(|_| UpdateError::Parse(format!("invalid compression flag '{}'", fields[3])))?
            > 0;

        let expected = if compressed { 6 } else { 4 };
        if fields.len() != expected {
            return Err(UpdateError::Parse(format!(
                "remote file record for {} has {} fields, expected {}",
                relative_path,
                fields.len(),
                expected
            )));
        }

        let compression = if compressed {
            Some(Compression {
                hash: fields[4].parse()?,
                size: parse_size(fields[5])?,
            })
        } else {
            None
        };

        Ok(Self {
            relative_path,
            uncompressed_hash,
            uncompressed_size,
            compression,
        })
    }

    fn to_line(&self) -> String {
        match &self.compression {
            Some(c) => format!(
                "{},{},{},1,{},{}",
                self.relative_path, self.uncompressed_hash, self.uncompressed_size, c.hash, c.size
            ),
            None => format!(
                "{},{},{},0",
                self.relative_path, self.uncompressed_hash, self.uncompressed_size
            ),
        }
    }
}

/// A file of the installed build, in its final uncompressed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileRecord {
    pub relative_path: String,
    pub hash: FileHash,
    pub size: u64,
}

impl LocalFileRecord {
    pub fn new(relative_path: impl Into<String>, hash: FileHash, size: u64) -> Self {
        Self {
            relative_path: normalize_path(&relative_path.into()),
            hash,
            size,
        }
    }
}

impl From<&RemoteFileRecord> for LocalFileRecord {
    fn from(remote: &RemoteFileRecord) -> Self {
        Self {
            relative_path: remote.relative_path.clone(),
            hash: remote.uncompressed_hash,
            size: remote.uncompressed_size,
        }
    }
}

impl FileRecord for LocalFileRecord {
    fn relative_path(&self) -> &str {
        &self.relative_path
    }

    fn from_fields(fields: &[&str]) -> Result<Self> {
        if fields.len() != 3 {
            return Err(UpdateError::Parse(format!(
                "local file record has {} fields, expected 3",
                fields.len()
            )));
        }

        Ok(Self {
            relative_path: parse_path(fields[0])?,
            hash: fields[1].parse()?,
            size: parse_size(fields[2])?,
        })
    }

    fn to_line(&self) -> String {
        format!("{},{},{}", self.relative_path, self.hash, self.size)
    }
}

/// Convert host separators to the canonical `/`.
pub fn normalize_path(path: &str) -> String {
    path.trim().replace('\\', "/")
}

fn parse_path(field: &str) -> Result<String> {
    let path = normalize_path(field);
    if path.is_empty() {
        return Err(UpdateError::Parse("empty file path".to_string()));
    }
    // Records are joined onto the build and staging roots and must stay inside them
    let contained = Path::new(&path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !contained || path.contains(':') {
        return Err(UpdateError::Parse(format!("file path '{}' leaves the build directory", path)));
    }
    Ok(path)
}

fn parse_size(field: &str) -> Result<u64> {
    field
        .trim()
        .parse::<u64>()
        .map_err(|_| UpdateError::Parse(format!("invalid file size '{}'", field)))
}
