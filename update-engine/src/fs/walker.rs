//! Directory traversal over build trees and staging directories.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Directories that are skipped together with everything below them
    pub exclude_dirs: Vec<PathBuf>,

    /// File names that are skipped wherever they appear
    pub exclude_names: Vec<String>,

    /// File name suffixes that are skipped (e.g. ".lzma")
    pub exclude_suffixes: Vec<String>,
}

impl WalkOptions {
    pub fn excluding_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exclude_dirs.push(dir.into());
        self
    }

    pub fn excluding_name(mut self, name: impl Into<String>) -> Self {
        self.exclude_names.push(name.into());
        self
    }

    pub fn excluding_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.exclude_suffixes.push(suffix.into());
        self
    }
}

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the walk root, `/`-separated
    pub relative_path: String,

    /// File size in bytes
    pub size: u64,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = relative_to(&path, root);

        Ok(Self {
            path,
            relative_path,
            size: metadata.len(),
        })
    }
}

/// Express `path` relative to `root` with `/` separators.
pub fn relative_to(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk a directory tree and collect all regular files.
///
/// A missing root yields an empty list.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    walk_directory_with_callback(root, options, |file| files.push(file.clone()))?;
    Ok(files)
}

/// Walk a directory tree with a callback for each file
pub fn walk_directory_with_callback<F>(
    root: &Path,
    options: &WalkOptions,
    mut callback: F,
) -> std::io::Result<()>
where
    F: FnMut(&FileInfo),
{
    if !root.exists() {
        return Ok(());
    }

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded_dir(entry, options));

    for entry in walker {
        let entry = entry?;

        if !entry.file_type().is_file() {
            continue;
        }

        if should_exclude(&entry, options) {
            continue;
        }

        callback(&FileInfo::from_entry(&entry, root)?);
    }

    Ok(())
}

fn is_excluded_dir(entry: &DirEntry, options: &WalkOptions) -> bool {
    entry.file_type().is_dir() && options.exclude_dirs.iter().any(|dir| entry.path() == dir)
}

/// Check if a file should be excluded based on name or suffix
fn should_exclude(entry: &DirEntry, options: &WalkOptions) -> bool {
    let file_name = entry.file_name().to_string_lossy();

    if options.exclude_names.iter().any(|name| *name == file_name) {
        return true;
    }

    options
        .exclude_suffixes
        .iter()
        .any(|suffix| file_name.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_missing_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(&temp_dir.path().join("nope"), &WalkOptions::default())?;
        assert!(files.is_empty());
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content22")?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["file1.txt", "subdir/file2.txt"]);
        assert_eq!(files[1].size, 9);

        Ok(())
    }

    #[test]
    fn test_excluded_directory_is_pruned() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let staging = temp_dir.path().join("Updater");

        fs::create_dir(&staging)?;
        fs::write(staging.join("staged.bin"), b"x")?;
        fs::write(temp_dir.path().join("installed.bin"), b"y")?;

        let options = WalkOptions::default().excluding_dir(&staging);
        let files = walk_directory(temp_dir.path(), &options)?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "installed.bin");

        Ok(())
    }

    #[test]
    fn test_exclude_names_and_suffixes() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("file.txt"), b"keep")?;
        fs::write(temp_dir.path().join("file.txt.LZMA"), b"skip")?;
        fs::write(temp_dir.path().join("Migrations.ini"), b"skip")?;

        let options = WalkOptions::default()
            .excluding_name("Migrations.ini")
            .excluding_suffix(".lzma");
        let files = walk_directory(temp_dir.path(), &options)?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "file.txt");

        Ok(())
    }
}
