//! In-memory checkpoint storage
//!
//! Used for testing. Saves can be made to fail after a number of successful
//! writes to exercise checkpoint I/O error handling.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};

use super::CheckpointStore;
use crate::models::CheckpointRecord;

pub struct InMemoryCheckpointStore {
    records: RwLock<HashMap<String, CheckpointRecord>>,
    saves: AtomicUsize,
    fail_after: Option<usize>,
}

impl InMemoryCheckpointStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            saves: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    /// Create a store whose saves fail once `successful` saves have happened
    pub fn failing_after(successful: usize) -> Self {
        Self {
            fail_after: Some(successful),
            ..Self::new()
        }
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The stored record for an account, if any
    pub fn get(&self, account: &str) -> Option<CheckpointRecord> {
        self.records.read().unwrap().get(account).cloned()
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, account: &str) -> Result<CheckpointRecord> {
        Ok(self
            .get(account)
            .unwrap_or_else(|| CheckpointRecord::empty(account)))
    }

    fn save(&self, account: &str, record: &CheckpointRecord) -> Result<()> {
        if let Some(limit) = self.fail_after
            && self.saves.load(Ordering::SeqCst) >= limit
        {
            bail!("disk full while saving checkpoint for {}", account);
        }
        self.records
            .write()
            .unwrap()
            .insert(account.to_string(), record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, account: &str) -> Result<()> {
        self.records.write().unwrap().remove(account);
        Ok(())
    }
}
