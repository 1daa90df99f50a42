//! Persistent storage for coordinated documents.
//!
//! Architecture:
//! ```text
//! ┌─────────────────┐   snapshot      ┌──────────────────┐
//! │ CollaborationHub│ ──────────────► │ DocumentStore    │
//! │ (in-memory)     │                 │ (trait)          │
//! └──────┬──────────┘                 └────────┬─────────┘
//!        │                                     │
//!        │ on open                     ┌───────┴────────┐
//!        ▼                             ▼                ▼
//! ┌─────────────────┐        ┌──────────────┐  ┌──────────────┐
//! │ DocumentState   │        │ MemoryStore  │  │ FileStore    │
//! │ (restored)      │        │ (tests)      │  │ (LZ4 files)  │
//! └─────────────────┘        └──────────────┘  └──────────────┘
//! ```
//!
//! Snapshots are bincode envelopes holding a serde_json-encoded document
//! delta, LZ4-compressed on the way to disk. The coordinator persists a
//! snapshot BEFORE committing an operation, so a storage failure leaves
//! the in-memory document untouched.

pub mod file;
pub mod memory;

pub use file::{FileStore, StoreConfig};
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vellum_core::Delta;

/// A persisted document snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub doc_id: Uuid,
    pub version: u64,
    pub updated_at_ms: u64,
    pub content: Delta,
}

/// Pluggable snapshot store.
///
/// Implementations must be safe to call from concurrent tasks.
pub trait DocumentStore: Send + Sync {
    /// Load the latest snapshot, or `None` for an unknown document.
    fn load(&self, doc_id: &Uuid) -> Result<Option<StoredDocument>, StoreError>;

    /// Persist a snapshot, replacing any previous one.
    fn save(
        &self,
        doc_id: Uuid,
        content: &Delta,
        version: u64,
        updated_at_ms: u64,
    ) -> Result<(), StoreError>;

    /// All document IDs with a stored snapshot.
    fn list_documents(&self) -> Result<Vec<Uuid>, StoreError>;
}

/// On-disk / in-memory envelope. The delta itself is serde_json inside
/// the bincode frame: attribute maps carry arbitrary JSON values, which
/// need a self-describing format.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    doc_id: Uuid,
    version: u64,
    updated_at_ms: u64,
    payload: Vec<u8>,
}

/// Encode a snapshot to its compressed binary form.
pub(crate) fn encode_snapshot(
    doc_id: Uuid,
    content: &Delta,
    version: u64,
    updated_at_ms: u64,
) -> Result<Vec<u8>, StoreError> {
    let payload =
        serde_json::to_vec(content).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let envelope = SnapshotEnvelope {
        doc_id,
        version,
        updated_at_ms,
        payload,
    };
    let framed = bincode::serde::encode_to_vec(&envelope, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&framed))
}

/// Decode a snapshot from its compressed binary form.
pub(crate) fn decode_snapshot(bytes: &[u8]) -> Result<StoredDocument, StoreError> {
    let framed = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::Compression(e.to_string()))?;
    let (envelope, _): (SnapshotEnvelope, _) =
        bincode::serde::decode_from_slice(&framed, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    let content = serde_json::from_slice(&envelope.payload)
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(StoredDocument {
        doc_id: envelope.doc_id,
        version: envelope.version,
        updated_at_ms: envelope.updated_at_ms,
        content,
    })
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    Serialization(String),
    Deserialization(String),
    Compression(String),
    Io(String),
    /// Injected failure for atomicity tests
    SimulatedFailure,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            Self::Compression(e) => write!(f, "Compression error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::SimulatedFailure => write!(f, "Simulated storage failure"),
        }
    }
}

impl std::error::Error for StoreError {}
