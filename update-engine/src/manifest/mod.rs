//! Build manifests.
//!
//! A manifest records the version of a build and every file in it with its
//! SHA-1 digest and size. The mirror publishes a remote manifest
//! (`ServerVersion`); the installed build keeps a local one (`LocalVersion`).
//!
//! ```text
//! [Version]
//! VersionNumber=12
//! DisplayString=v1.2
//!
//! [Files]
//! 0=game.exe,<sha1>,1000,1,<sha1 of game.exe.lzma>,400
//! 1=Data/a.txt,<sha1>,3,0
//! ```

pub mod record;

pub use record::{
    Compression, FileRecord, LocalFileRecord, RemoteFileRecord, COMPRESSED_SUFFIX,
};

use ini::Ini;
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

use crate::utils::{ini_file, Result, UpdateError};

/// File name of the manifest published on mirrors.
pub const REMOTE_MANIFEST_FILE: &str = "ServerVersion";

/// File name of the manifest describing the installed build.
pub const LOCAL_MANIFEST_FILE: &str = "LocalVersion";

const VERSION_SECTION: &str = "Version";
const FILES_SECTION: &str = "Files";
const VERSION_NUMBER_KEY: &str = "VersionNumber";
const DISPLAY_STRING_KEY: &str = "DisplayString";

/// Version of a build. Identity is `number`; the display string is for humans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub number: i32,
    pub display_string: String,
}

impl VersionInfo {
    pub fn new(number: i32, display_string: impl Into<String>) -> Self {
        Self {
            number,
            display_string: display_string.into(),
        }
    }
}

/// A build's version and file list, generic over the record variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildManifest<R> {
    pub version: VersionInfo,
    pub files: Vec<R>,
}

pub type RemoteManifest = BuildManifest<RemoteFileRecord>;
pub type LocalManifest = BuildManifest<LocalFileRecord>;

impl<R: FileRecord> BuildManifest<R> {
    pub fn new(version: VersionInfo) -> Self {
        Self {
            version,
            files: Vec::new(),
        }
    }

    /// Append a record. Paths must be unique within a manifest.
    pub fn add_file(&mut self, record: R) -> Result<()> {
        if self.find(record.relative_path()).is_some() {
            return Err(UpdateError::Parse(format!(
                "duplicate file path {}",
                record.relative_path()
            )));
        }
        self.files.push(record);
        Ok(())
    }

    pub fn find(&self, relative_path: &str) -> Option<&R> {
        self.files.iter().find(|f| f.relative_path() == relative_path)
    }

    /// Parse a manifest file.
    pub fn parse(path: &Path) -> Result<Self> {
        let ini = ini_file::load(path)?;
        Self::from_ini(&ini, &path.display().to_string())
    }

    /// Parse a manifest from its textual form.
    pub fn parse_str(text: &str) -> Result<Self> {
        let ini = ini_file::parse(text)?;
        Self::from_ini(&ini, "<memory>")
    }

    fn from_ini(ini: &Ini, origin: &str) -> Result<Self> {
        let version_section = ini.section(Some(VERSION_SECTION)).ok_or_else(|| {
            UpdateError::Parse(format!("[{}] section not found in {}", VERSION_SECTION, origin))
        })?;

        let number = match version_section.get(VERSION_NUMBER_KEY) {
            Some(value) => value.trim().parse::<i32>().map_err(|_| {
                UpdateError::Parse(format!("invalid {} '{}' in {}", VERSION_NUMBER_KEY, value, origin))
            })?,
            None => 0,
        };
        let display_string = version_section.get(DISPLAY_STRING_KEY).unwrap_or_default();

        let mut manifest = Self::new(VersionInfo::new(number, display_string));
        let mut seen = HashSet::new();

        if let Some(files) = ini.section(Some(FILES_SECTION)) {
            for (key, value) in files.iter() {
                let fields: Vec<&str> = value.split(',').collect();
                match R::from_fields(&fields) {
                    Ok(record) => {
                        if !seen.insert(record.relative_path().to_string()) {
                            warn!(key, path = record.relative_path(), origin, "Duplicate file record skipped");
                            continue;
                        }
                        manifest.files.push(record);
                    }
                    Err(e) => {
                        warn!(key, origin, error = %e, "Skipping malformed file record");
                    }
                }
            }
        }

        Ok(manifest)
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        ini.with_section(Some(VERSION_SECTION))
            .set(VERSION_NUMBER_KEY, self.version.number.to_string())
            .set(DISPLAY_STRING_KEY, self.version.display_string.clone());

        let mut files = ini.with_section(Some(FILES_SECTION));
        for (i, record) in self.files.iter().enumerate() {
            files.set(i.to_string(), record.to_line());
        }

        ini
    }

    /// Render the manifest into its textual form.
    pub fn to_ini_string(&self) -> Result<String> {
        ini_file::render(&self.to_ini())
    }

    /// Write the manifest to `path`, replacing any existing file.
    pub fn write(&self, path: &Path) -> Result<()> {
        ini_file::save(&self.to_ini(), path)
    }
}

impl LocalManifest {
    /// Synthesize the manifest of the build that results from installing `remote`.
    pub fn from_remote(remote: &RemoteManifest) -> Self {
        Self {
            version: remote.version.clone(),
            files: remote.files.iter().map(LocalFileRecord::from).collect(),
        }
    }
}

/// Estimate how many bytes an update will download.
///
/// Trusts the hashes recorded in the local manifest instead of re-hashing the
/// installed files, so locally modified files are not accounted for.
pub fn estimate_update_size(local: Option<&LocalManifest>, remote: &RemoteManifest) -> u64 {
    remote
        .files
        .iter()
        .filter(|remote_file| {
            match local.and_then(|l| l.find(&remote_file.relative_path)) {
                Some(local_file) => local_file.hash != remote_file.uncompressed_hash,
                None => true,
            }
        })
        .map(|f| f.download_size())
        .sum()
}
