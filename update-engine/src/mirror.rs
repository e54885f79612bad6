//! Update mirrors: alternative download locations for the same build.
//!
//! Mirrors are configured in the `[UpdateMirrors]` section of an INI file,
//! one `"<url>,<display name>"` entry per key.

use ini::Properties;
use std::path::Path;
use std::str::FromStr;

use crate::utils::{ini_file, Result, UpdateError};

/// Name of the INI section listing the mirrors.
pub const MIRRORS_SECTION: &str = "UpdateMirrors";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    /// Base URL, always ending in `/`.
    pub url: String,
    pub ui_name: String,
    /// Preference rating, lower is preferred.
    pub rating: i32,
}

impl Mirror {
    pub fn new(url: impl Into<String>, ui_name: impl Into<String>) -> Self {
        let mut url = url.into().trim().to_string();
        if !url.ends_with('/') {
            url.push('/');
        }

        Self {
            url,
            ui_name: ui_name.into().trim().to_string(),
            rating: 0,
        }
    }

    /// Full URL of a build file on this mirror.
    pub fn file_url(&self, relative_path: &str) -> String {
        format!("{}{}", self.url, relative_path.replace('\\', "/"))
    }
}

impl FromStr for Mirror {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 2 {
            return Err(UpdateError::Parse(format!(
                "update mirror \"{}\" does not match the expected format \"URL,display name\"",
                s
            )));
        }
        Ok(Mirror::new(parts[0], parts[1]))
    }
}

/// Ordered list of mirrors.
#[derive(Debug, Clone, Default)]
pub struct MirrorRegistry {
    mirrors: Vec<Mirror>,
}

impl MirrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, url: &str, ui_name: &str) {
        self.mirrors.push(Mirror::new(url, ui_name));
    }

    /// Append every `"url,name"` entry of an INI section.
    pub fn load_from_section(&mut self, section: &Properties) -> Result<()> {
        for (_, value) in section.iter() {
            self.mirrors.push(value.parse()?);
        }
        Ok(())
    }

    /// Load the `[UpdateMirrors]` section of an INI file.
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        let ini = ini_file::load(path)?;
        let section = ini.section(Some(MIRRORS_SECTION)).ok_or_else(|| {
            UpdateError::Parse(format!(
                "[{}] section not found in {}",
                MIRRORS_SECTION,
                path.display()
            ))
        })?;
        self.load_from_section(section)
    }

    pub fn set_rating(&mut self, index: usize, rating: i32) {
        if let Some(mirror) = self.mirrors.get_mut(index) {
            mirror.rating = rating;
        }
    }

    /// Mirrors sorted by rating. Equal ratings keep their configured order.
    pub fn ordered_by_rating(&self) -> Vec<Mirror> {
        let mut ordered = self.mirrors.clone();
        ordered.sort_by_key(|m| m.rating);
        ordered
    }

    pub fn get(&self, index: usize) -> Option<&Mirror> {
        self.mirrors.get(index)
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }
}
