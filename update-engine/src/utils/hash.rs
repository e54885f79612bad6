//! SHA-1 file digests as they appear in build manifests.

use sha1::{Digest, Sha1};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use super::errors::UpdateError;

/// Length of a SHA-1 digest in bytes.
pub const HASH_LEN: usize = 20;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A 20-byte SHA-1 digest. Serialized as lower-case hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHash([u8; HASH_LEN]);

impl FileHash {
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Hash an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        let digest = Sha1::digest(data);
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Hash the contents of a file, streaming it from disk.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha1::new();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&hasher.finalize());
        Ok(Self(bytes))
    }

    /// Hash a file if it exists. A missing file yields `None`.
    pub fn of_file_if_exists(path: &Path) -> io::Result<Option<Self>> {
        match Self::of_file(path) {
            Ok(hash) => Ok(Some(hash)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Check whether the file at `path` exists and hashes to `expected`.
pub fn file_matches(path: &Path, expected: &FileHash) -> io::Result<bool> {
    Ok(FileHash::of_file_if_exists(path)?.as_ref() == Some(expected))
}

impl FromStr for FileHash {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() % 2 != 0 {
            return Err(UpdateError::Parse(format!(
                "hex digest '{}' has an odd number of characters",
                s
            )));
        }

        let decoded = hex::decode(s)
            .map_err(|e| UpdateError::Parse(format!("invalid hex digest '{}': {}", s, e)))?;

        let bytes: [u8; HASH_LEN] = decoded.try_into().map_err(|v: Vec<u8>| {
            UpdateError::Parse(format!(
                "digest '{}' is {} bytes, expected {}",
                s,
                v.len(),
                HASH_LEN
            ))
        })?;

        Ok(Self(bytes))
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHash({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_known_digest() {
        // SHA-1 of "abc"
        let hash = FileHash::of_bytes(b"abc");
        assert_eq!(hash.to_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_parse_hex() {
        let hash: FileHash = "a9993e364706816aba3e25717850c26c9cd0d89d".parse().unwrap();
        assert_eq!(hash, FileHash::of_bytes(b"abc"));
    }

    #[test]
    fn test_parse_odd_length_fails() {
        let result = "abc".parse::<FileHash>();
        assert!(matches!(result, Err(UpdateError::Parse(_))));
    }

    #[test]
    fn test_parse_wrong_length_fails() {
        let result = "abcd".parse::<FileHash>();
        assert!(matches!(result, Err(UpdateError::Parse(_))));
    }

    #[test]
    fn test_parse_non_hex_fails() {
        let result = "zz993e364706816aba3e25717850c26c9cd0d89d".parse::<FileHash>();
        assert!(result.is_err());
    }

    #[test]
    fn test_file_hash_matches_buffer_hash() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("data.bin");
        let data = vec![7u8; 200_000];
        fs::write(&path, &data)?;

        assert_eq!(FileHash::of_file(&path)?, FileHash::of_bytes(&data));
        assert!(file_matches(&path, &FileHash::of_bytes(&data))?);
        Ok(())
    }

    #[test]
    fn test_missing_file() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("missing");
        assert!(FileHash::of_file_if_exists(&path)?.is_none());
        assert!(!file_matches(&path, &FileHash::of_bytes(b""))?);
        Ok(())
    }
}
