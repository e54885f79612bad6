//! Post-install migrations.
//!
//! `Migrations.ini` ships with an update and holds one section per
//! migration:
//!
//! ```text
//! [RemoveOldMaps]
//! Name=Remove obsolete maps
//! MinimumVersion=0
//! MaximumVersion=5
//! 0=DeleteFile:Maps/old.map
//! 1=DeleteDirectoryIfEmpty:Maps
//! ```
//!
//! A migration runs when the previously installed version lies in
//! `[MinimumVersion, MaximumVersion)`. Actions are read from keys `0`, `1`,
//! ... until the first missing key.

use ini::{Ini, Properties};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::manifest::record::normalize_path;
use crate::utils::{ini_file, Result};

pub const MIGRATIONS_FILE: &str = "Migrations.ini";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationAction {
    DeleteFile(String),
    DeleteDirectoryIfEmpty(String),
}

impl MigrationAction {
    /// Parse `"<Verb>:<param>"`; unknown verbs and lines without `:` yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let (verb, param) = value.split_once(':')?;
        let param = normalize_path(param.trim());
        match verb.trim() {
            "DeleteFile" => Some(Self::DeleteFile(param)),
            "DeleteDirectoryIfEmpty" => Some(Self::DeleteDirectoryIfEmpty(param)),
            other => {
                debug!(verb = other, "Ignoring unknown migration action");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub name: String,
    pub minimum_version: i32,
    pub maximum_version: i32,
    pub actions: Vec<MigrationAction>,
}

impl Migration {
    fn from_section(section_name: &str, section: &Properties) -> Self {
        let name = section
            .get("Name")
            .map(str::to_string)
            .unwrap_or_else(|| section_name.to_string());
        let minimum_version = int_value(section, "MinimumVersion", 0);
        let maximum_version = int_value(section, "MaximumVersion", i32::MAX);

        let actions = (0..)
            .map_while(|id: u32| section.get(id.to_string().as_str()))
            .filter_map(MigrationAction::parse)
            .collect();

        Self {
            name,
            minimum_version,
            maximum_version,
            actions,
        }
    }

    pub fn applies_to(&self, version: i32) -> bool {
        self.minimum_version <= version && version < self.maximum_version
    }

    /// Run every action against `build_path`. Failures are logged, not fatal.
    pub fn perform(&self, build_path: &Path) {
        info!(migration = %self.name, "Performing migration");

        for action in &self.actions {
            match action {
                MigrationAction::DeleteFile(param) => {
                    let Some(target) = resolve(build_path, param) else {
                        continue;
                    };
                    info!(path = %target.display(), "Deleting file");
                    match std::fs::remove_file(&target) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {
                            info!(path = %target.display(), "File not found, skipping deletion");
                        }
                        Err(e) => warn!(path = %target.display(), error = %e, "Unable to delete file"),
                    }
                }
                MigrationAction::DeleteDirectoryIfEmpty(param) => {
                    let Some(target) = resolve(build_path, param) else {
                        continue;
                    };
                    info!(path = %target.display(), "Deleting directory if empty");
                    if let Err(e) = std::fs::remove_dir(&target) {
                        info!(path = %target.display(), error = %e, "Directory not deleted");
                    }
                }
            }
        }
    }
}

fn int_value(section: &Properties, key: &str, default: i32) -> i32 {
    match section.get(key) {
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!(key, value, "Invalid integer in migration, using default");
            default
        }),
        None => default,
    }
}

/// Join a migration parameter onto the build path, refusing to leave it.
fn resolve(build_path: &Path, param: &str) -> Option<PathBuf> {
    let relative = Path::new(param);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if param.is_empty() || escapes {
        warn!(param, "Ignoring migration target outside the build directory");
        return None;
    }
    Some(build_path.join(relative))
}

/// Ordered list of migrations from a descriptor.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Read `Migrations.ini` from `staging_dir`; a missing file means no migrations.
    pub fn load(staging_dir: &Path) -> Result<Self> {
        let path = staging_dir.join(MIGRATIONS_FILE);
        if !path.exists() {
            info!(path = %path.display(), "No migrations to perform");
            return Ok(Self::default());
        }
        Ok(Self::from_ini(&ini_file::load(&path)?))
    }

    pub fn parse_str(text: &str) -> Result<Self> {
        Ok(Self::from_ini(&ini_file::parse(text)?))
    }

    fn from_ini(ini: &Ini) -> Self {
        let migrations = ini
            .iter()
            .filter_map(|(name, section)| name.map(|n| Migration::from_section(n, section)))
            .collect();
        Self { migrations }
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Migrations whose range contains `version`, in declaration order
    pub fn applicable(&self, version: i32) -> impl Iterator<Item = &Migration> {
        self.migrations.iter().filter(move |m| m.applies_to(version))
    }

    /// Run every applicable migration. Returns how many ran.
    pub fn perform(&self, build_path: &Path, version: i32) -> usize {
        let mut count = 0;
        for migration in self.applicable(version) {
            migration.perform(build_path);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const DESCRIPTOR: &str = "\
[First]
Name=Old range
MinimumVersion=0
MaximumVersion=5
0=DeleteFile:old.txt
1=DeleteDirectoryIfEmpty:Maps

[Second]
MinimumVersion=5
MaximumVersion=100
0=DeleteFile:newer.txt
";

    #[test]
    fn test_parse_descriptor() {
        let set = MigrationSet::parse_str(DESCRIPTOR).unwrap();
        let migrations = set.migrations();

        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].name, "Old range");
        assert_eq!(migrations[1].name, "Second");
        assert_eq!(
            migrations[0].actions,
            vec![
                MigrationAction::DeleteFile("old.txt".into()),
                MigrationAction::DeleteDirectoryIfEmpty("Maps".into()),
            ]
        );
    }

    #[test]
    fn test_only_matching_range_runs() {
        let set = MigrationSet::parse_str(DESCRIPTOR).unwrap();
        let names: Vec<&str> = set.applicable(3).map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Old range"]);

        // Half-open: the upper bound is exclusive, the lower inclusive
        let names: Vec<&str> = set.applicable(5).map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Second"]);
    }

    #[test]
    fn test_defaults_cover_everything() {
        let set = MigrationSet::parse_str("[Any]\n0=DeleteFile:x\n").unwrap();
        assert!(set.applicable(0).count() == 1);
        assert!(set.applicable(i32::MAX - 1).count() == 1);
    }

    #[test]
    fn test_actions_stop_at_first_gap() {
        let set = MigrationSet::parse_str("[M]\n0=DeleteFile:a\n1=Bogus\n3=DeleteFile:c\n").unwrap();
        assert_eq!(
            set.migrations()[0].actions,
            vec![MigrationAction::DeleteFile("a".into())]
        );
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(
            MigrationAction::parse(" DeleteFile : Dir\\file.txt "),
            Some(MigrationAction::DeleteFile("Dir/file.txt".into()))
        );
        assert_eq!(MigrationAction::parse("Rename:a"), None);
        assert_eq!(MigrationAction::parse("no colon"), None);
    }

    #[test]
    fn test_perform_deletes_targets() {
        let temp = TempDir::new().unwrap();
        let build = temp.path();
        fs::write(build.join("old.txt"), b"x").unwrap();
        fs::write(build.join("newer.txt"), b"y").unwrap();
        fs::create_dir(build.join("Maps")).unwrap();

        let set = MigrationSet::parse_str(DESCRIPTOR).unwrap();
        assert_eq!(set.perform(build, 3), 1);

        assert!(!build.join("old.txt").exists());
        assert!(!build.join("Maps").exists());
        assert!(build.join("newer.txt").exists());
    }

    #[test]
    fn test_perform_tolerates_missing_and_nonempty_targets() {
        let temp = TempDir::new().unwrap();
        let build = temp.path();
        fs::create_dir(build.join("Maps")).unwrap();
        fs::write(build.join("Maps/keep.map"), b"m").unwrap();

        let set = MigrationSet::parse_str(DESCRIPTOR).unwrap();
        set.perform(build, 0);

        assert!(build.join("Maps/keep.map").exists());
    }

    #[test]
    fn test_targets_outside_build_are_ignored() {
        let temp = TempDir::new().unwrap();
        let build = temp.path().join("build");
        fs::create_dir(&build).unwrap();
        fs::write(temp.path().join("outside.txt"), b"x").unwrap();

        let set = MigrationSet::parse_str("[M]\n0=DeleteFile:../outside.txt\n").unwrap();
        set.perform(&build, 0);

        assert!(temp.path().join("outside.txt").exists());
    }

    #[test]
    fn test_missing_descriptor() {
        let temp = TempDir::new().unwrap();
        let set = MigrationSet::load(temp.path()).unwrap();
        assert!(set.migrations().is_empty());
    }
}
