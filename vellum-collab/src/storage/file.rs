//! File-backed snapshot store.
//!
//! One compressed snapshot file per document, named `<doc_id>.snap`.
//! Writes go to a temp file first and are renamed into place, so a
//! crashed write never leaves a truncated snapshot behind.

use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use vellum_core::Delta;

use super::{decode_snapshot, encode_snapshot, DocumentStore, StoreError, StoredDocument};

const SNAPSHOT_EXT: &str = "snap";

/// File store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one snapshot file per document
    pub path: PathBuf,
    /// fsync after every write
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./vellum-data"),
            sync_writes: true,
        }
    }
}

impl StoreConfig {
    /// Config for tests: no fsync.
    pub fn for_testing(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sync_writes: false,
        }
    }
}

pub struct FileStore {
    config: StoreConfig,
}

impl FileStore {
    /// Open a store, creating the directory if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.path).map_err(|e| StoreError::Io(e.to_string()))?;
        log::info!("snapshot store opened at {}", config.path.display());
        Ok(Self { config })
    }

    fn snapshot_path(&self, doc_id: &Uuid) -> PathBuf {
        self.config.path.join(format!("{doc_id}.{SNAPSHOT_EXT}"))
    }
}

impl DocumentStore for FileStore {
    fn load(&self, doc_id: &Uuid) -> Result<Option<StoredDocument>, StoreError> {
        let path = self.snapshot_path(doc_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        Ok(Some(decode_snapshot(&bytes)?))
    }

    fn save(
        &self,
        doc_id: Uuid,
        content: &Delta,
        version: u64,
        updated_at_ms: u64,
    ) -> Result<(), StoreError> {
        let bytes = encode_snapshot(doc_id, content, version, updated_at_ms)?;
        let final_path = self.snapshot_path(&doc_id);
        let tmp_path = final_path.with_extension("tmp");

        fs::write(&tmp_path, &bytes).map_err(|e| StoreError::Io(e.to_string()))?;
        if self.config.sync_writes {
            let file = fs::File::open(&tmp_path).map_err(|e| StoreError::Io(e.to_string()))?;
            file.sync_all().map_err(|e| StoreError::Io(e.to_string()))?;
        }
        fs::rename(&tmp_path, &final_path).map_err(|e| StoreError::Io(e.to_string()))?;

        log::debug!(
            "saved snapshot doc={doc_id} version={version} ({} bytes)",
            bytes.len()
        );
        Ok(())
    }

    fn list_documents(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut docs = Vec::new();
        let entries =
            fs::read_dir(&self.config.path).map_err(|e| StoreError::Io(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(doc_id) = Uuid::parse_str(stem) {
                    docs.push(doc_id);
                }
            }
        }
        Ok(docs)
    }
}
