//! Central coordination for concurrent document editing.
//!
//! One authoritative copy per document. Operations arrive tagged with the
//! version they were authored against; stale operations are rebased over
//! the committed tail before applying. Every accepted operation bumps the
//! version by exactly one and is fanned out to subscribers.
//!
//! ```text
//! submit(base_version, delta)
//!        │
//!        ▼
//! ┌──────────────┐  stale?   ┌──────────────┐
//! │ validate     │ ────────► │ rebase over  │──► RetryRequired
//! │              │           │ committed ops│    (on overlap)
//! └──────┬───────┘           └──────┬───────┘
//!        ▼                          │
//! ┌──────────────┐                  │
//! │ apply        │ ◄────────────────┘
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐  failure  ┌──────────────┐
//! │ persist      │ ────────► │ reject, no   │
//! │ snapshot     │           │ state change │
//! └──────┬───────┘           └──────────────┘
//!        ▼
//!  commit + broadcast
//! ```
//!
//! Persistence happens before the in-memory commit: a storage failure
//! rejects the operation and leaves the document at its prior version.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use vellum_core::{Delta, DeltaError};

use crate::broadcast::RoomManager;
use crate::event::EventMessage;
use crate::presence::{ParticipantInfo, PresenceRegistry};
use crate::storage::{DocumentStore, StoreError};

/// Coordinator errors.
#[derive(Debug, Clone)]
pub enum CollabError {
    /// Malformed operation or impossible base version
    Validation(String),
    /// Rebase failed on overlapping edits; resync and resubmit
    RetryRequired { current_version: u64 },
    /// Operation touched protected content
    Conflict(String),
    /// Snapshot persistence failed; nothing was committed
    Persistence(String),
    /// No undoable operation, or the last one cannot be inverted
    UndoUnavailable(String),
    /// Requested history tail predates what is held in memory; refetch
    /// the full document instead
    HistoryUnavailable { current_version: u64 },
    /// Document has no in-memory or stored state
    UnknownDocument(Uuid),
    /// Offline queue is at capacity
    QueueFull { limit: usize },
}

impl std::fmt::Display for CollabError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "Validation failed: {e}"),
            Self::RetryRequired { current_version } => {
                write!(f, "Retry required: rebase blocked, document is at version {current_version}")
            }
            Self::Conflict(e) => write!(f, "Conflict: {e}"),
            Self::Persistence(e) => write!(f, "Persistence failed: {e}"),
            Self::UndoUnavailable(e) => write!(f, "Undo unavailable: {e}"),
            Self::HistoryUnavailable { current_version } => {
                write!(f, "History unavailable that far back; refetch the document at version {current_version}")
            }
            Self::UnknownDocument(id) => write!(f, "Unknown document: {id}"),
            Self::QueueFull { limit } => write!(f, "Offline queue full (limit {limit})"),
        }
    }
}

impl std::error::Error for CollabError {}

impl From<DeltaError> for CollabError {
    fn from(e: DeltaError) -> Self {
        match e {
            DeltaError::ProtectedObject { position } => {
                Self::Conflict(format!("protected object at unit {position}"))
            }
            DeltaError::NotInvertible(reason) => Self::UndoUnavailable(reason),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<StoreError> for CollabError {
    fn from(e: StoreError) -> Self {
        Self::Persistence(e.to_string())
    }
}

/// An operation accepted into a document's history.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedOperation {
    pub operation_id: Uuid,
    pub doc_id: Uuid,
    pub author_id: Uuid,
    /// The delta as applied (post-rebase if the submission was stale)
    pub delta: Delta,
    /// Content the delta removed, for inversion
    pub removed: Delta,
    /// Document version after this operation
    pub version: u64,
    pub timestamp_ms: u64,
}

/// A point-in-time copy of document state.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub version: u64,
    pub taken_at_ms: u64,
    pub content: Delta,
}

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    /// Version assigned to the operation
    pub version: u64,
    /// The rebased delta, when the submission was against a stale version
    pub transformed: Option<Delta>,
}

/// Result of draining an author's offline queue.
#[derive(Debug, Clone)]
pub struct DrainReport {
    /// Operations committed before the drain stopped
    pub applied: usize,
    /// Operations still queued (head is the one that failed)
    pub remaining: usize,
    pub error: Option<CollabError>,
}

/// Coordinator tuning knobs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Snapshots retained per document, oldest evicted first
    pub snapshot_limit: usize,
    /// Queued operations allowed per author per document
    pub queue_limit: usize,
    /// Per-subscriber event buffer
    pub broadcast_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            snapshot_limit: 10,
            queue_limit: 256,
            broadcast_capacity: 64,
        }
    }
}

impl CoordinatorConfig {
    /// Small limits so eviction and backpressure paths are reachable in
    /// tests.
    pub fn for_testing() -> Self {
        Self {
            snapshot_limit: 10,
            queue_limit: 8,
            broadcast_capacity: 16,
        }
    }
}

#[derive(Debug, Clone)]
struct QueuedOperation {
    base_version: u64,
    delta: Delta,
}

struct UndoEntry {
    operation_id: Uuid,
    delta: Delta,
    removed: Delta,
    /// Version the operation committed at
    version: u64,
}

struct DocumentState {
    version: u64,
    content: Delta,
    history: Vec<CommittedOperation>,
    snapshots: VecDeque<Snapshot>,
    /// Per-author offline queues
    queues: HashMap<Uuid, VecDeque<QueuedOperation>>,
    /// Per-author undo stacks
    undo_stacks: HashMap<Uuid, Vec<UndoEntry>>,
}

impl DocumentState {
    fn empty() -> Self {
        Self {
            version: 0,
            content: Delta::new(),
            history: Vec::new(),
            snapshots: VecDeque::new(),
            queues: HashMap::new(),
            undo_stacks: HashMap::new(),
        }
    }
}

/// Coordinator statistics.
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub operations_committed: u64,
    pub operations_rejected: u64,
    pub open_documents: usize,
}

struct AtomicHubStats {
    operations_committed: AtomicU64,
    operations_rejected: AtomicU64,
}

/// The collaboration coordinator.
///
/// Cheap to clone via the contained `Arc`s; one instance serves all
/// documents.
pub struct CollaborationHub {
    docs: Arc<RwLock<HashMap<Uuid, Arc<Mutex<DocumentState>>>>>,
    store: Arc<dyn DocumentStore>,
    rooms: RoomManager,
    presence: PresenceRegistry,
    config: CoordinatorConfig,
    stats: Arc<AtomicHubStats>,
}

impl CollaborationHub {
    pub fn new(store: Arc<dyn DocumentStore>, config: CoordinatorConfig) -> Self {
        let broadcast_capacity = config.broadcast_capacity;
        Self {
            docs: Arc::new(RwLock::new(HashMap::new())),
            store,
            rooms: RoomManager::new(broadcast_capacity),
            presence: PresenceRegistry::new(),
            config,
            stats: Arc::new(AtomicHubStats {
                operations_committed: AtomicU64::new(0),
                operations_rejected: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to a document's event stream.
    pub async fn subscribe(&self, doc_id: Uuid) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.rooms.get_or_create(doc_id).await.subscribe()
    }

    /// Register a participant and announce the join.
    pub async fn join(&self, doc_id: Uuid, author_id: Uuid, name: &str) {
        self.presence.join(doc_id, author_id, name, now_ms()).await;
        let event = EventMessage::participant_joined(doc_id, author_id, name);
        self.publish(doc_id, &event).await;
    }

    /// Remove a participant and announce the leave.
    pub async fn leave(&self, doc_id: Uuid, author_id: Uuid) {
        if self.presence.leave(&doc_id, &author_id).await.is_some() {
            let event = EventMessage::participant_left(doc_id, author_id);
            self.publish(doc_id, &event).await;
        }
    }

    pub async fn participants(&self, doc_id: &Uuid) -> Vec<ParticipantInfo> {
        self.presence.active_participants(doc_id).await
    }

    /// Submit an operation authored against `base_version`.
    ///
    /// Stale submissions are rebased over the operations committed since
    /// `base_version`; the rebased delta comes back in the outcome so the
    /// author can reconcile their local copy.
    pub async fn submit(
        &self,
        doc_id: Uuid,
        author_id: Uuid,
        base_version: u64,
        delta: Delta,
    ) -> Result<SubmitOutcome, CollabError> {
        delta.validate()?;
        let state = self.open(doc_id).await?;
        let mut guard = state.lock().await;
        let result = self.submit_locked(&mut guard, doc_id, author_id, base_version, delta, true);
        drop(guard);

        match result {
            Ok((outcome, event)) => {
                self.presence.touch(&doc_id, &author_id, now_ms()).await;
                self.publish(doc_id, &event).await;
                self.stats.operations_committed.fetch_add(1, Ordering::Relaxed);
                Ok(outcome)
            }
            Err(e) => {
                self.stats.operations_rejected.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Undo the author's most recent operation.
    ///
    /// The inverse is committed as a fresh operation at the head version;
    /// intervening edits by other authors are rebased over. If the
    /// inverse cannot be built or committed, the undo entry stays on the
    /// stack.
    pub async fn undo(&self, doc_id: Uuid, author_id: Uuid) -> Result<SubmitOutcome, CollabError> {
        let state = self.open(doc_id).await?;
        let mut guard = state.lock().await;

        let entry = guard
            .undo_stacks
            .get_mut(&author_id)
            .and_then(Vec::pop)
            .ok_or_else(|| CollabError::UndoUnavailable("nothing to undo".into()))?;

        let inverse = match Delta::invert(&entry.delta, &entry.removed) {
            Ok(inverse) => inverse,
            Err(e) => {
                guard.undo_stacks.entry(author_id).or_default().push(entry);
                return Err(CollabError::from(e));
            }
        };

        let base_version = entry.version;
        let result =
            self.submit_locked(&mut guard, doc_id, author_id, base_version, inverse, false);
        match result {
            Ok((outcome, event)) => {
                drop(guard);
                self.presence.touch(&doc_id, &author_id, now_ms()).await;
                self.publish(doc_id, &event).await;
                self.stats.operations_committed.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "undo of {} committed as version {}",
                    entry.operation_id,
                    outcome.version
                );
                Ok(outcome)
            }
            Err(e) => {
                guard.undo_stacks.entry(author_id).or_default().push(entry);
                self.stats.operations_rejected.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Queue an operation while an author is offline.
    pub async fn enqueue_offline(
        &self,
        doc_id: Uuid,
        author_id: Uuid,
        base_version: u64,
        delta: Delta,
    ) -> Result<usize, CollabError> {
        delta.validate()?;
        let state = self.open(doc_id).await?;
        let mut guard = state.lock().await;
        let queue = guard.queues.entry(author_id).or_default();
        if queue.len() >= self.config.queue_limit {
            return Err(CollabError::QueueFull {
                limit: self.config.queue_limit,
            });
        }
        queue.push_back(QueuedOperation {
            base_version,
            delta,
        });
        Ok(queue.len())
    }

    /// Replay an author's offline queue in FIFO order.
    ///
    /// Stops at the first failure; the failed operation stays at the head
    /// of the queue so a later drain retries it.
    pub async fn drain_queue(&self, doc_id: Uuid, author_id: Uuid) -> Result<DrainReport, CollabError> {
        let state = self.open(doc_id).await?;
        let mut guard = state.lock().await;

        let mut events = Vec::new();
        let mut applied = 0usize;
        let mut error = None;

        loop {
            let op = match guard.queues.get_mut(&author_id).and_then(VecDeque::pop_front) {
                Some(op) => op,
                None => break,
            };
            match self.submit_locked(
                &mut guard,
                doc_id,
                author_id,
                op.base_version,
                op.delta.clone(),
                true,
            ) {
                Ok((_, event)) => {
                    applied += 1;
                    events.push(event);
                }
                Err(e) => {
                    guard.queues.entry(author_id).or_default().push_front(op);
                    error = Some(e);
                    break;
                }
            }
        }

        let remaining = guard.queues.get(&author_id).map_or(0, VecDeque::len);
        drop(guard);

        if applied > 0 {
            self.presence.touch(&doc_id, &author_id, now_ms()).await;
        }
        for event in &events {
            self.publish(doc_id, event).await;
        }
        self.stats
            .operations_committed
            .fetch_add(applied as u64, Ordering::Relaxed);
        if error.is_some() {
            self.stats.operations_rejected.fetch_add(1, Ordering::Relaxed);
        }

        log::info!(
            "drained queue doc={doc_id} author={author_id}: {applied} applied, {remaining} remaining"
        );
        Ok(DrainReport {
            applied,
            remaining,
            error,
        })
    }

    /// Record a snapshot of the current document state.
    ///
    /// At most `snapshot_limit` snapshots are kept; the oldest is evicted.
    pub async fn take_snapshot(&self, doc_id: Uuid, author_id: Uuid) -> Result<Snapshot, CollabError> {
        let state = self.open(doc_id).await?;
        let mut guard = state.lock().await;

        let snapshot = Snapshot {
            version: guard.version,
            taken_at_ms: now_ms(),
            content: guard.content.clone(),
        };
        guard.snapshots.push_back(snapshot.clone());
        while guard.snapshots.len() > self.config.snapshot_limit {
            guard.snapshots.pop_front();
        }
        let version = guard.version;
        drop(guard);

        let event = EventMessage::snapshot_taken(doc_id, author_id, version);
        self.publish(doc_id, &event).await;
        Ok(snapshot)
    }

    pub async fn snapshots(&self, doc_id: Uuid) -> Result<Vec<Snapshot>, CollabError> {
        let state = self.open(doc_id).await?;
        let guard = state.lock().await;
        Ok(guard.snapshots.iter().cloned().collect())
    }

    /// Operations committed after `since_version`, oldest first.
    ///
    /// In-memory history starts at the version a document was restored at
    /// (zero for documents created on this hub). A tail request reaching
    /// further back cannot be distinguished from "already current" by an
    /// empty vector, so it is [`CollabError::HistoryUnavailable`] and the
    /// caller must refetch the full document.
    pub async fn operations_since(
        &self,
        doc_id: Uuid,
        since_version: u64,
    ) -> Result<Vec<CommittedOperation>, CollabError> {
        let state = self.open(doc_id).await?;
        let guard = state.lock().await;
        // History is contiguous and ends at the current version.
        let earliest_base = guard.version - guard.history.len() as u64;
        if since_version < earliest_base {
            return Err(CollabError::HistoryUnavailable {
                current_version: guard.version,
            });
        }
        Ok(guard
            .history
            .iter()
            .filter(|op| op.version > since_version)
            .cloned()
            .collect())
    }

    /// Current authoritative content.
    pub async fn document(&self, doc_id: Uuid) -> Result<Delta, CollabError> {
        let state = self.lookup(doc_id).await?;
        let guard = state.lock().await;
        Ok(guard.content.clone())
    }

    /// Current version.
    pub async fn version(&self, doc_id: Uuid) -> Result<u64, CollabError> {
        let state = self.lookup(doc_id).await?;
        let guard = state.lock().await;
        Ok(guard.version)
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            operations_committed: self.stats.operations_committed.load(Ordering::Relaxed),
            operations_rejected: self.stats.operations_rejected.load(Ordering::Relaxed),
            open_documents: self.docs.read().await.len(),
        }
    }

    /// Validate, rebase if stale, apply, persist, then commit. Called
    /// with the document lock held; returns the event to publish after
    /// the lock is released.
    fn submit_locked(
        &self,
        state: &mut DocumentState,
        doc_id: Uuid,
        author_id: Uuid,
        base_version: u64,
        delta: Delta,
        record_undo: bool,
    ) -> Result<(SubmitOutcome, EventMessage), CollabError> {
        if base_version > state.version {
            return Err(CollabError::Validation(format!(
                "base version {base_version} is ahead of document version {}",
                state.version
            )));
        }

        let mut effective = delta;
        let mut transformed = None;
        if base_version < state.version {
            for committed in state.history.iter().filter(|op| op.version > base_version) {
                effective = Delta::rebase_onto(&effective, &committed.delta).map_err(|blocked| {
                    log::debug!(
                        "rebase blocked at unit {} for doc {doc_id}",
                        blocked.position
                    );
                    CollabError::RetryRequired {
                        current_version: state.version,
                    }
                })?;
            }
            transformed = Some(effective.clone());
        }

        let applied = state.content.apply(&effective)?;
        let new_version = state.version + 1;
        let timestamp_ms = now_ms();

        // Build the event first so no fallible step remains between the
        // store write and the in-memory commit.
        let event = EventMessage::operation_committed(doc_id, author_id, new_version, &effective)
            .map_err(|e| CollabError::Validation(e.to_string()))?;

        // Persist before touching in-memory state.
        self.store
            .save(doc_id, &applied.document, new_version, timestamp_ms)?;

        let operation = CommittedOperation {
            operation_id: Uuid::new_v4(),
            doc_id,
            author_id,
            delta: effective,
            removed: applied.removed,
            version: new_version,
            timestamp_ms,
        };

        state.version = new_version;
        state.content = applied.document;
        if record_undo {
            state.undo_stacks.entry(author_id).or_default().push(UndoEntry {
                operation_id: operation.operation_id,
                delta: operation.delta.clone(),
                removed: operation.removed.clone(),
                version: new_version,
            });
        }
        state.history.push(operation);

        Ok((
            SubmitOutcome {
                version: new_version,
                transformed,
            },
            event,
        ))
    }

    /// Get or create in-memory state, seeding from storage when a
    /// snapshot exists.
    async fn open(&self, doc_id: Uuid) -> Result<Arc<Mutex<DocumentState>>, CollabError> {
        {
            let docs = self.docs.read().await;
            if let Some(state) = docs.get(&doc_id) {
                return Ok(state.clone());
            }
        }

        let mut docs = self.docs.write().await;
        if let Some(state) = docs.get(&doc_id) {
            return Ok(state.clone());
        }

        let mut state = DocumentState::empty();
        if let Some(stored) = self.store.load(&doc_id)? {
            log::info!(
                "restored document {doc_id} at version {} from storage",
                stored.version
            );
            state.version = stored.version;
            state.content = stored.content;
        }
        let state = Arc::new(Mutex::new(state));
        docs.insert(doc_id, state.clone());
        Ok(state)
    }

    /// Like `open`, but unknown documents are an error.
    async fn lookup(&self, doc_id: Uuid) -> Result<Arc<Mutex<DocumentState>>, CollabError> {
        {
            let docs = self.docs.read().await;
            if let Some(state) = docs.get(&doc_id) {
                return Ok(state.clone());
            }
        }
        if self.store.load(&doc_id)?.is_some() {
            return self.open(doc_id).await;
        }
        Err(CollabError::UnknownDocument(doc_id))
    }

    async fn publish(&self, doc_id: Uuid, event: &EventMessage) {
        let room = self.rooms.get_or_create(doc_id).await;
        if let Err(e) = room.publish(event) {
            log::warn!("failed to publish event for doc {doc_id}: {e}");
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn hub() -> (CollaborationHub, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let hub = CollaborationHub::new(store.clone(), CoordinatorConfig::for_testing());
        (hub, store)
    }

    #[tokio::test]
    async fn test_submit_assigns_sequential_versions() {
        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        let first = hub
            .submit(doc, author, 0, Delta::new().insert("a"))
            .await
            .unwrap();
        assert_eq!(first.version, 1);
        assert!(first.transformed.is_none());

        let second = hub
            .submit(doc, author, 1, Delta::new().retain(1).insert("b"))
            .await
            .unwrap();
        assert_eq!(second.version, 2);

        assert_eq!(hub.version(doc).await.unwrap(), 2);
        assert_eq!(hub.document(doc).await.unwrap(), Delta::new().insert("ab"));
    }

    #[tokio::test]
    async fn test_submit_future_base_version_rejected() {
        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        let err = hub
            .submit(doc, author, 5, Delta::new().insert("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::Validation(_)));
        assert_eq!(hub.stats().await.operations_rejected, 1);
    }

    #[tokio::test]
    async fn test_stale_submission_is_rebased() {
        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        hub.submit(doc, alice, 0, Delta::new().insert("world"))
            .await
            .unwrap();
        // Alice prepends at version 1.
        hub.submit(doc, alice, 1, Delta::new().insert("hello "))
            .await
            .unwrap();
        // Bob appends "!" but authored against version 1.
        let outcome = hub
            .submit(doc, bob, 1, Delta::new().retain(5).insert("!"))
            .await
            .unwrap();

        assert_eq!(outcome.version, 3);
        assert!(outcome.transformed.is_some());
        assert_eq!(
            hub.document(doc).await.unwrap(),
            Delta::new().insert("hello world!")
        );
    }

    #[tokio::test]
    async fn test_blocked_rebase_requires_retry() {
        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        hub.submit(doc, alice, 0, Delta::new().insert("abcdef"))
            .await
            .unwrap();
        hub.submit(doc, alice, 1, Delta::new().retain(1).delete(3))
            .await
            .unwrap();
        // Bob deletes an overlapping range against the stale version.
        let err = hub
            .submit(doc, bob, 1, Delta::new().retain(2).delete(3))
            .await
            .unwrap_err();

        match err {
            CollabError::RetryRequired { current_version } => assert_eq!(current_version, 2),
            other => panic!("expected RetryRequired, got {other:?}"),
        }
        // Document unchanged by the rejected op.
        assert_eq!(hub.version(doc).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_rolls_back() {
        let (hub, store) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        hub.submit(doc, author, 0, Delta::new().insert("safe"))
            .await
            .unwrap();

        store.set_fail_saves(true);
        let err = hub
            .submit(doc, author, 1, Delta::new().retain(4).insert("!"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::Persistence(_)));

        // Version and content untouched.
        assert_eq!(hub.version(doc).await.unwrap(), 1);
        assert_eq!(hub.document(doc).await.unwrap(), Delta::new().insert("safe"));

        store.set_fail_saves(false);
        let outcome = hub
            .submit(doc, author, 1, Delta::new().retain(4).insert("!"))
            .await
            .unwrap();
        assert_eq!(outcome.version, 2);
    }

    #[tokio::test]
    async fn test_undo_restores_content() {
        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        hub.submit(doc, author, 0, Delta::new().insert("keep this"))
            .await
            .unwrap();
        hub.submit(doc, author, 1, Delta::new().retain(4).delete(5))
            .await
            .unwrap();
        assert_eq!(hub.document(doc).await.unwrap(), Delta::new().insert("keep"));

        let outcome = hub.undo(doc, author).await.unwrap();
        assert_eq!(outcome.version, 3);
        assert_eq!(
            hub.document(doc).await.unwrap(),
            Delta::new().insert("keep this")
        );
    }

    #[tokio::test]
    async fn test_undo_empty_stack() {
        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        hub.submit(doc, author, 0, Delta::new().insert("x"))
            .await
            .unwrap();
        let err = hub.undo(doc, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CollabError::UndoUnavailable(_)));
    }

    #[tokio::test]
    async fn test_undo_twice_unwinds_in_order() {
        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        hub.submit(doc, author, 0, Delta::new().insert("a"))
            .await
            .unwrap();
        hub.submit(doc, author, 1, Delta::new().retain(1).insert("b"))
            .await
            .unwrap();

        hub.undo(doc, author).await.unwrap();
        assert_eq!(hub.document(doc).await.unwrap(), Delta::new().insert("a"));

        hub.undo(doc, author).await.unwrap();
        assert!(hub.document(doc).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_queue_drain() {
        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        hub.enqueue_offline(doc, author, 0, Delta::new().insert("one "))
            .await
            .unwrap();
        hub.enqueue_offline(doc, author, 1, Delta::new().retain(4).insert("two"))
            .await
            .unwrap();

        let report = hub.drain_queue(doc, author).await.unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(report.remaining, 0);
        assert!(report.error.is_none());
        assert_eq!(
            hub.document(doc).await.unwrap(),
            Delta::new().insert("one two")
        );
    }

    #[tokio::test]
    async fn test_drain_stops_at_failure() {
        let (hub, store) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        hub.submit(doc, author, 0, Delta::new().insert("base"))
            .await
            .unwrap();
        hub.enqueue_offline(doc, author, 1, Delta::new().retain(4).insert("!"))
            .await
            .unwrap();
        hub.enqueue_offline(doc, author, 2, Delta::new().retain(5).insert("?"))
            .await
            .unwrap();

        store.set_fail_saves(true);
        let report = hub.drain_queue(doc, author).await.unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.remaining, 2);
        assert!(matches!(report.error, Some(CollabError::Persistence(_))));

        // Failed op stayed at the head; retry succeeds in order.
        store.set_fail_saves(false);
        let report = hub.drain_queue(doc, author).await.unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(
            hub.document(doc).await.unwrap(),
            Delta::new().insert("base!?")
        );
    }

    #[tokio::test]
    async fn test_queue_limit() {
        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        for i in 0..8 {
            hub.enqueue_offline(doc, author, i, Delta::new().insert("x"))
                .await
                .unwrap();
        }
        let err = hub
            .enqueue_offline(doc, author, 8, Delta::new().insert("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::QueueFull { limit: 8 }));
    }

    #[tokio::test]
    async fn test_snapshot_ring_eviction() {
        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        for i in 0..12u64 {
            let delta = if i == 0 {
                Delta::new().insert("x")
            } else {
                Delta::new().retain(i as usize).insert("x")
            };
            hub.submit(doc, author, i, delta).await.unwrap();
            hub.take_snapshot(doc, author).await.unwrap();
        }

        let snapshots = hub.snapshots(doc).await.unwrap();
        assert_eq!(snapshots.len(), 10);
        // Oldest two evicted.
        assert_eq!(snapshots[0].version, 3);
        assert_eq!(snapshots[9].version, 12);
    }

    #[tokio::test]
    async fn test_operations_since() {
        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        for i in 0..5u64 {
            let delta = if i == 0 {
                Delta::new().insert("x")
            } else {
                Delta::new().retain(i as usize).insert("x")
            };
            hub.submit(doc, author, i, delta).await.unwrap();
        }

        let tail = hub.operations_since(doc, 3).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].version, 4);
        assert_eq!(tail[1].version, 5);
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let (hub, _) = hub();
        let err = hub.document(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CollabError::UnknownDocument(_)));
    }

    #[tokio::test]
    async fn test_restore_from_storage() {
        let store = Arc::new(MemoryStore::new());
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        {
            let hub = CollaborationHub::new(store.clone(), CoordinatorConfig::for_testing());
            hub.submit(doc, author, 0, Delta::new().insert("durable"))
                .await
                .unwrap();
        }

        // Fresh hub over the same store resumes at the stored version.
        let hub = CollaborationHub::new(store, CoordinatorConfig::for_testing());
        assert_eq!(hub.version(doc).await.unwrap(), 1);
        assert_eq!(
            hub.document(doc).await.unwrap(),
            Delta::new().insert("durable")
        );

        let outcome = hub
            .submit(doc, author, 1, Delta::new().retain(7).insert("!"))
            .await
            .unwrap();
        assert_eq!(outcome.version, 2);
    }

    #[tokio::test]
    async fn test_operations_since_beyond_restored_history() {
        let store = Arc::new(MemoryStore::new());
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        {
            let hub = CollaborationHub::new(store.clone(), CoordinatorConfig::for_testing());
            hub.submit(doc, author, 0, Delta::new().insert("a"))
                .await
                .unwrap();
            hub.submit(doc, author, 1, Delta::new().retain(1).insert("b"))
                .await
                .unwrap();
            hub.submit(doc, author, 2, Delta::new().retain(2).insert("c"))
                .await
                .unwrap();
        }

        // Restored state has the content but not the committed tail. A
        // client at version 1 must be told to refetch, not handed an
        // empty tail that looks like "already current".
        let hub = CollaborationHub::new(store, CoordinatorConfig::for_testing());
        assert_eq!(hub.version(doc).await.unwrap(), 3);
        let err = hub.operations_since(doc, 1).await.unwrap_err();
        match err {
            CollabError::HistoryUnavailable { current_version } => {
                assert_eq!(current_version, 3)
            }
            other => panic!("expected HistoryUnavailable, got {other:?}"),
        }

        // A client at the restored version is genuinely current.
        assert!(hub.operations_since(doc, 3).await.unwrap().is_empty());

        // New commits are retrievable from the restore point on.
        hub.submit(doc, author, 3, Delta::new().retain(3).insert("d"))
            .await
            .unwrap();
        let tail = hub.operations_since(doc, 3).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].version, 4);
    }

    #[tokio::test]
    async fn test_store_version_never_ahead_of_memory() {
        let (hub, store) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        hub.submit(doc, author, 0, Delta::new().insert("one"))
            .await
            .unwrap();
        let stored = store.load(&doc).unwrap().unwrap();
        assert_eq!(stored.version, hub.version(doc).await.unwrap());
        assert_eq!(stored.content, hub.document(doc).await.unwrap());

        // A rejected commit moves neither side.
        let _ = hub.submit(doc, author, 1, Delta::new().delete(9)).await;
        let stored = store.load(&doc).unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(hub.version(doc).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_undo_refreshes_presence() {
        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        hub.join(doc, author, "Alice").await;
        hub.submit(doc, author, 0, Delta::new().insert("draft"))
            .await
            .unwrap();
        let seen_after_submit = hub.participants(&doc).await[0].last_seen_ms;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        hub.undo(doc, author).await.unwrap();

        let seen_after_undo = hub.participants(&doc).await[0].last_seen_ms;
        assert!(seen_after_undo > seen_after_submit);
    }

    #[tokio::test]
    async fn test_presence_join_leave() {
        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        hub.join(doc, author, "Alice").await;
        assert_eq!(hub.participants(&doc).await.len(), 1);

        hub.leave(doc, author).await;
        assert!(hub.participants(&doc).await.is_empty());
    }

    #[tokio::test]
    async fn test_protected_object_submit_conflicts() {
        use serde_json::json;
        use vellum_core::EmbedKind;

        let (hub, _) = hub();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        hub.submit(
            doc,
            author,
            0,
            Delta::new().embed(EmbedKind::VersionTable, json!({"rows": 1})),
        )
        .await
        .unwrap();

        let err = hub
            .submit(doc, author, 1, Delta::new().delete(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::Conflict(_)));
        assert_eq!(hub.version(doc).await.unwrap(), 1);
    }
}
