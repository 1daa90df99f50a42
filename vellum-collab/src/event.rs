//! Binary event format for document change notifications.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌────────────┬───────────┬───────────┬──────────┬──────────┐
//! │ event_type │ doc_id    │ author_id │ version  │ payload  │
//! │ 1 byte     │ 16 bytes  │ 16 bytes  │ 8 bytes  │ variable │
//! └────────────┴───────────┴───────────┴──────────┴──────────┘
//! ```
//!
//! Delta payloads are serde_json inside the bincode envelope: attribute
//! maps hold arbitrary JSON values, which need a self-describing format.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vellum_core::Delta;

/// Event types emitted by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    /// An operation was accepted and committed to the document
    OperationCommitted = 1,
    /// A snapshot of the document state was taken
    SnapshotTaken = 2,
    /// A participant joined the document session
    ParticipantJoined = 3,
    /// A participant left the document session
    ParticipantLeft = 4,
}

/// Top-level event message.
///
/// Serialized with bincode for minimal overhead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub event_type: EventType,
    pub doc_id: Uuid,
    pub author_id: Uuid,
    /// Document version after the event
    pub version: u64,
    /// Event payload (varies by event_type)
    pub payload: Vec<u8>,
}

impl EventMessage {
    /// Create a committed-operation event carrying the applied delta.
    pub fn operation_committed(
        doc_id: Uuid,
        author_id: Uuid,
        version: u64,
        delta: &Delta,
    ) -> Result<Self, EventError> {
        let payload = serde_json::to_vec(delta)
            .map_err(|e| EventError::Serialization(e.to_string()))?;
        Ok(Self {
            event_type: EventType::OperationCommitted,
            doc_id,
            author_id,
            version,
            payload,
        })
    }

    /// Create a snapshot-taken notification.
    pub fn snapshot_taken(doc_id: Uuid, author_id: Uuid, version: u64) -> Self {
        Self {
            event_type: EventType::SnapshotTaken,
            doc_id,
            author_id,
            version,
            payload: Vec::new(),
        }
    }

    /// Create a participant-joined notification.
    pub fn participant_joined(doc_id: Uuid, author_id: Uuid, name: &str) -> Self {
        Self {
            event_type: EventType::ParticipantJoined,
            doc_id,
            author_id,
            version: 0,
            payload: name.as_bytes().to_vec(),
        }
    }

    /// Create a participant-left notification.
    pub fn participant_left(doc_id: Uuid, author_id: Uuid) -> Self {
        Self {
            event_type: EventType::ParticipantLeft,
            doc_id,
            author_id,
            version: 0,
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| EventError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    /// Parse the delta payload of a committed-operation event.
    pub fn delta(&self) -> Result<Delta, EventError> {
        if self.event_type != EventType::OperationCommitted {
            return Err(EventError::InvalidEventType);
        }
        serde_json::from_slice(&self.payload)
            .map_err(|e| EventError::Deserialization(e.to_string()))
    }

    /// Parse the participant name of a joined notification.
    pub fn participant_name(&self) -> Result<String, EventError> {
        if self.event_type != EventType::ParticipantJoined {
            return Err(EventError::InvalidEventType);
        }
        String::from_utf8(self.payload.clone())
            .map_err(|e| EventError::Deserialization(e.to_string()))
    }
}

/// Event encoding errors.
#[derive(Debug, Clone)]
pub enum EventError {
    Serialization(String),
    Deserialization(String),
    InvalidEventType,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidEventType => write!(f, "Invalid event type"),
        }
    }
}

impl std::error::Error for EventError {}
