//! Configuration and state directories for groupmigrate
//!
//! Provides utilities for locating and reading configuration files and for
//! writing JSON state (tokens, checkpoints, reports) durably.
//!
//! Layout:
//! ```text
//! ~/.config/groupmigrate/         config_dir()
//!   tokens/                       OAuth token caches
//! ~/.local/share/groupmigrate/    data_dir()
//!   checkpoints/                  per-account migration progress
//!   reports/                      JSON migration reports
//! ```
//!
//! Call [`init`] at application startup to bootstrap the directories.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "groupmigrate";

/// Initialize the config and data directories.
///
/// Creates them if they don't exist and returns the config directory.
pub fn init() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    ensure_dir(&dir)?;
    ensure_dir(&token_dir().context("Could not determine token directory")?)?;
    if let Some(data) = data_dir() {
        ensure_dir(&data)?;
    }
    Ok(dir)
}

/// Get the config directory (~/.config/groupmigrate/)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Get the path to a file within the config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Directory holding cached OAuth tokens
pub fn token_dir() -> Option<PathBuf> {
    config_dir().map(|p| p.join("tokens"))
}

/// Get the data directory (~/.local/share/groupmigrate/)
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join(APP_DIR))
}

/// Default directory for per-account checkpoints
pub fn checkpoint_dir() -> Option<PathBuf> {
    data_dir().map(|p| p.join("checkpoints"))
}

/// Default directory for migration reports
pub fn report_dir() -> Option<PathBuf> {
    data_dir().map(|p| p.join("reports"))
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse JSON file: {}", path.display()))
}

/// Load and parse a YAML file from an arbitrary path
pub fn load_yaml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Ensure a directory exists
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}

/// Write a value as pretty JSON, atomically.
///
/// The content goes to a sibling temp file which is synced and then renamed
/// over `path`, so readers see either the previous file or the new one,
/// never a partial write.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        ensure_dir(parent)?;
    }

    let content = serde_json::to_vec_pretty(value)?;

    let temp_path = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
        file.write_all(&content)?;
        file.sync_all()
            .with_context(|| format!("Failed to sync temp file: {}", temp_path.display()))?;
    }
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to replace file: {}", path.display()))?;
    Ok(())
}

/// Turn an account address into a string safe for use as a file name
///
/// `alice.smith@example.com` becomes `alice.smith_at_example.com`.
pub fn file_stem_for(account: &str) -> String {
    account
        .trim()
        .to_lowercase()
        .replace('@', "_at_")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_config_dir() {
        let dir = config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("groupmigrate"));
    }

    #[test]
    fn test_token_dir_is_inside_config_dir() {
        let tokens = token_dir().unwrap();
        assert!(tokens.ends_with("groupmigrate/tokens"));
    }

    #[test]
    fn test_write_then_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/sample.json");
        let value = Sample {
            name: "alice".to_string(),
            count: 3,
        };

        write_json_file(&path, &value).unwrap();

        let loaded: Sample = load_json_file(&path).unwrap();
        assert_eq!(loaded, value);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_write_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.json");
        write_json_file(&path, &Sample { name: "a".into(), count: 1 }).unwrap();
        write_json_file(&path, &Sample { name: "b".into(), count: 2 }).unwrap();

        let loaded: Sample = load_json_file(&path).unwrap();
        assert_eq!(loaded.count, 2);
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "name: bob\ncount: 7\n").unwrap();

        let loaded: Sample = load_yaml_file(&path).unwrap();
        assert_eq!(loaded.name, "bob");
        assert_eq!(loaded.count, 7);
    }

    #[test]
    fn test_load_missing_file_mentions_path() {
        let err = load_yaml_file::<Sample>(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/config.yaml"));
    }

    #[test]
    fn test_file_stem_for() {
        assert_eq!(file_stem_for("Alice.Smith@Example.com"), "alice.smith_at_example.com");
        assert_eq!(file_stem_for("we ird+tag@x.org"), "we_ird_tag_at_x.org");
    }
}
