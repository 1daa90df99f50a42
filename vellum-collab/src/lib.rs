//! # vellum-collab — Realtime coordination for delta documents
//!
//! Serializes concurrent edits against one authoritative copy per
//! document, rebases stale submissions, persists snapshots before
//! committing, and fans out change events to subscribers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   submit(delta)    ┌──────────────────┐
//! │ Author      │ ─────────────────► │ CollaborationHub │
//! │ (per user)  │ ◄───────────────── │ (authority)      │
//! └──────┬──────┘   events           └──────┬───────────┘
//!        │                                  │
//!        ▼                                  ▼
//! ┌─────────────┐                    ┌──────────────┐
//! │ Offline     │                    │ DocumentStore│
//! │ queue       │                    │ (snapshots)  │
//! └─────────────┘                    └──────┬───────┘
//!                                           │
//!                                   ┌───────┴───────┐
//!                                   │ BroadcastGroup│
//!                                   │ (fan-out)     │
//!                                   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`] — Versioned commit pipeline, undo, offline queues
//! - [`event`] — Binary event format (bincode-encoded EventMessage)
//! - [`broadcast`] — Per-document fan-out with backpressure
//! - [`presence`] — Active participant tracking
//! - [`storage`] — Snapshot persistence (memory and file backends)

pub mod broadcast;
pub mod coordinator;
pub mod event;
pub mod presence;
pub mod storage;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager};
pub use coordinator::{
    CollabError, CollaborationHub, CommittedOperation, CoordinatorConfig, DrainReport, HubStats,
    Snapshot, SubmitOutcome,
};
pub use event::{EventError, EventMessage, EventType};
pub use presence::{ParticipantInfo, PresenceRegistry};
pub use storage::{
    DocumentStore, FileStore, MemoryStore, StoreConfig, StoreError, StoredDocument,
};
