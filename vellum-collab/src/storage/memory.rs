//! In-memory snapshot store.
//!
//! Holds the same encoded bytes the file store writes, so the codec path
//! is exercised even in tests. A failure toggle lets tests verify that
//! the coordinator never commits an operation whose snapshot did not
//! persist.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

use vellum_core::Delta;

use super::{decode_snapshot, encode_snapshot, DocumentStore, StoreError, StoredDocument};

pub struct MemoryStore {
    snapshots: RwLock<HashMap<Uuid, Vec<u8>>>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Make every subsequent save fail with `StoreError::SimulatedFailure`.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot_count(&self) -> usize {
        match self.snapshots.read() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self, doc_id: &Uuid) -> Result<Option<StoredDocument>, StoreError> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        match snapshots.get(doc_id) {
            Some(bytes) => Ok(Some(decode_snapshot(bytes)?)),
            None => Ok(None),
        }
    }

    fn save(
        &self,
        doc_id: Uuid,
        content: &Delta,
        version: u64,
        updated_at_ms: u64,
    ) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::SimulatedFailure);
        }
        let bytes = encode_snapshot(doc_id, content, version, updated_at_ms)?;
        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        snapshots.insert(doc_id, bytes);
        Ok(())
    }

    fn list_documents(&self) -> Result<Vec<Uuid>, StoreError> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(snapshots.keys().cloned().collect())
    }
}
