//! Loading and saving the INI documents used for manifests, mirror lists
//! and migration descriptors.
//!
//! Escape and quote processing are disabled in both directions: values are
//! comma-joined paths and hex digests and must round-trip byte for byte.

use ini::{EscapePolicy, Ini, ParseOption, WriteOption};
use std::path::Path;

use super::errors::{Result, UpdateError};

fn parse_options() -> ParseOption {
    ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..Default::default()
    }
}

fn write_options() -> WriteOption {
    WriteOption {
        escape_policy: EscapePolicy::Nothing,
        ..Default::default()
    }
}

/// Parse an INI document from a string.
pub fn parse(text: &str) -> Result<Ini> {
    Ini::load_from_str_opt(text, parse_options()).map_err(|e| UpdateError::Parse(e.to_string()))
}

/// Load an INI document from disk.
pub fn load(path: &Path) -> Result<Ini> {
    let text = std::fs::read_to_string(path).map_err(|e| UpdateError::filesystem(path, e))?;
    parse(&text)
}

/// Render an INI document to a string.
pub fn render(ini: &Ini) -> Result<String> {
    let mut buffer = Vec::new();
    ini.write_to_opt(&mut buffer, write_options())?;
    String::from_utf8(buffer).map_err(|e| UpdateError::Parse(e.to_string()))
}

/// Write an INI document to disk, replacing any existing file.
pub fn save(ini: &Ini, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| UpdateError::filesystem(parent, e))?;
        }
    }
    let text = render(ini)?;
    std::fs::write(path, text).map_err(|e| UpdateError::filesystem(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_are_not_unescaped() {
        let ini = parse("[Files]\n0=dir\\tool.exe,ab\n").unwrap();
        let files = ini.section(Some("Files")).unwrap();
        assert_eq!(files.get("0"), Some("dir\\tool.exe,ab"));
    }

    #[test]
    fn test_render_preserves_order() {
        let mut ini = Ini::new();
        ini.with_section(Some("B")).set("1", "x");
        ini.with_section(Some("A")).set("0", "y");
        let text = render(&ini).unwrap();
        assert!(text.find("[B]").unwrap() < text.find("[A]").unwrap());
    }
}
