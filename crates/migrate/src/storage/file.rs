//! File-based checkpoint storage
//!
//! Directory structure:
//! ```text
//! checkpoints/
//!   alice_at_example.com_migration_progress.json
//!   bob_at_example.com_migration_progress.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use super::CheckpointStore;
use crate::models::CheckpointRecord;

/// One pretty-printed JSON file per account, replaced atomically on save
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context("Failed to create checkpoint directory")?;
        Ok(Self { root })
    }

    /// Store under the default data directory
    pub fn open_default() -> Result<Self> {
        let root = config::checkpoint_dir().context("Could not determine data directory")?;
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the file path for an account's checkpoint
    pub fn path_for(&self, account: &str) -> PathBuf {
        self.root.join(format!(
            "{}_migration_progress.json",
            config::file_stem_for(account)
        ))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, account: &str) -> Result<CheckpointRecord> {
        let path = self.path_for(account);
        if !path.exists() {
            return Ok(CheckpointRecord::empty(account));
        }

        let record: CheckpointRecord = config::load_json_file(&path)?;
        if !record.account.eq_ignore_ascii_case(account) {
            bail!(
                "Checkpoint {} belongs to {}, not {}",
                path.display(),
                record.account,
                account
            );
        }
        Ok(record)
    }

    fn save(&self, account: &str, record: &CheckpointRecord) -> Result<()> {
        let path = self.path_for(account);
        config::write_json_file(&path, record)
            .with_context(|| format!("Failed to save checkpoint for {}", account))
    }

    fn remove(&self, account: &str) -> Result<()> {
        let path = self.path_for(account);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;
    use crate::models::MessageId;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_returns_empty() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();

        let record = store.load("alice@example.com").unwrap();
        assert!(record.is_empty());
        assert_eq!(record.account, "alice@example.com");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();

        let mut record = CheckpointRecord::empty("alice@example.com");
        record.record_success(MessageId::new("m1"));
        record.record_failure(MessageId::new("m2"), "denied", FailureClass::Permanent);
        store.save("alice@example.com", &record).unwrap();

        let loaded = store.load("alice@example.com").unwrap();
        assert_eq!(loaded, record);
        assert!(store.path_for("alice@example.com").exists());
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        fs::write(store.path_for("alice@example.com"), "{\"account\": \"alice@").unwrap();

        assert!(store.load("alice@example.com").is_err());
    }

    #[test]
    fn test_leftover_temp_file_is_ignored() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();

        let mut record = CheckpointRecord::empty("alice@example.com");
        record.record_success(MessageId::new("m1"));
        store.save("alice@example.com", &record).unwrap();

        // A crash mid-write leaves only a partial temp file behind
        let temp = store.path_for("alice@example.com").with_extension("json.tmp");
        fs::write(&temp, "{\"account\": ").unwrap();

        let loaded = store.load("alice@example.com").unwrap();
        assert!(loaded.contains(&MessageId::new("m1")));
    }

    #[test]
    fn test_mismatched_account_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let record = CheckpointRecord::empty("bob@example.com");
        config::write_json_file(&store.path_for("alice@example.com"), &record).unwrap();

        assert!(store.load("alice@example.com").is_err());
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let record = CheckpointRecord::empty("alice@example.com");
        store.save("alice@example.com", &record).unwrap();

        store.remove("alice@example.com").unwrap();
        assert!(!store.path_for("alice@example.com").exists());
        // Removing again is fine
        store.remove("alice@example.com").unwrap();
    }
}
