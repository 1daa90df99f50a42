//! Fan-out of committed events to document subscribers.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each subscriber gets an independent receiver that buffers up to
//! `capacity` messages; lagging receivers drop the oldest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::event::{EventError, EventMessage};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub events_sent: u64,
    pub active_rooms: usize,
}

/// Atomic counters so publish() never acquires a lock.
struct AtomicBroadcastStats {
    events_sent: AtomicU64,
}

/// A broadcast group for a single document.
///
/// All subscribers of the same document share one broadcast channel.
/// Events are pre-encoded once and fanned out as shared byte buffers.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    capacity: usize,
    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` is the per-subscriber buffer before lagging subscribers
    /// start dropping events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            atomic_stats: Arc::new(AtomicBroadcastStats {
                events_sent: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to this document's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }

    /// Encode an event once and fan it out to all subscribers.
    ///
    /// Returns the number of receivers that got the event. Zero
    /// subscribers is not an error.
    pub fn publish(&self, event: &EventMessage) -> Result<usize, EventError> {
        let encoded = Arc::new(event.encode()?);
        Ok(self.publish_raw(encoded))
    }

    /// Fan out pre-encoded bytes directly (zero-copy fast path).
    pub fn publish_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.atomic_stats.events_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Current number of attached receivers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn events_sent(&self) -> u64 {
        self.atomic_stats.events_sent.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Room manager: maps document IDs to broadcast groups.
///
/// Each document gets its own group so events are isolated between
/// documents.
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<Uuid, Arc<BroadcastGroup>>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            default_capacity,
        }
    }

    /// Get or create the room for the given document.
    pub async fn get_or_create(&self, doc_id: Uuid) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&doc_id) {
                return room.clone();
            }
        }

        // Slow path: write lock to create
        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(&doc_id) {
            return room.clone();
        }

        log::debug!("creating broadcast room for document {doc_id}");
        let room = Arc::new(BroadcastGroup::new(self.default_capacity));
        rooms.insert(doc_id, room.clone());
        room
    }

    /// Remove a room with no attached receivers.
    pub async fn remove_if_idle(&self, doc_id: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(doc_id) {
            if room.subscriber_count() == 0 {
                rooms.remove(doc_id);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_documents(&self) -> Vec<Uuid> {
        self.rooms.read().await.keys().cloned().collect()
    }

    pub async fn stats(&self) -> BroadcastStats {
        let rooms = self.rooms.read().await;
        BroadcastStats {
            events_sent: rooms.values().map(|r| r.events_sent()).sum(),
            active_rooms: rooms.len(),
        }
    }
}
