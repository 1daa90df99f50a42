//! Participant presence per document session.
//!
//! Tracks who is currently editing each document. Activity timestamps
//! are refreshed on every accepted operation so idle participants can
//! be swept out.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A participant in a document session.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantInfo {
    pub author_id: Uuid,
    pub name: String,
    pub joined_at_ms: u64,
    pub last_seen_ms: u64,
}

/// Presence registry: document -> active participants.
pub struct PresenceRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, HashMap<Uuid, ParticipantInfo>>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a participant. Re-joining refreshes the name and
    /// activity timestamp but keeps the original join time.
    pub async fn join(&self, doc_id: Uuid, author_id: Uuid, name: &str, now_ms: u64) {
        let mut sessions = self.sessions.write().await;
        let participants = sessions.entry(doc_id).or_default();
        match participants.get_mut(&author_id) {
            Some(existing) => {
                existing.name = name.to_string();
                existing.last_seen_ms = now_ms;
            }
            None => {
                participants.insert(
                    author_id,
                    ParticipantInfo {
                        author_id,
                        name: name.to_string(),
                        joined_at_ms: now_ms,
                        last_seen_ms: now_ms,
                    },
                );
            }
        }
    }

    /// Remove a participant. Returns the removed entry, if any.
    pub async fn leave(&self, doc_id: &Uuid, author_id: &Uuid) -> Option<ParticipantInfo> {
        let mut sessions = self.sessions.write().await;
        let participants = sessions.get_mut(doc_id)?;
        let removed = participants.remove(author_id);
        if participants.is_empty() {
            sessions.remove(doc_id);
        }
        removed
    }

    /// Refresh a participant's activity timestamp.
    pub async fn touch(&self, doc_id: &Uuid, author_id: &Uuid, now_ms: u64) {
        let mut sessions = self.sessions.write().await;
        if let Some(info) = sessions
            .get_mut(doc_id)
            .and_then(|p| p.get_mut(author_id))
        {
            info.last_seen_ms = now_ms;
        }
    }

    /// Active participants of a document.
    pub async fn active_participants(&self, doc_id: &Uuid) -> Vec<ParticipantInfo> {
        let sessions = self.sessions.read().await;
        sessions
            .get(doc_id)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn participant_count(&self, doc_id: &Uuid) -> usize {
        let sessions = self.sessions.read().await;
        sessions.get(doc_id).map_or(0, HashMap::len)
    }

    /// Drop participants whose last activity is older than `max_idle_ms`.
    /// Returns the number of entries removed.
    pub async fn sweep_idle(&self, now_ms: u64, max_idle_ms: u64) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut removed = 0;
        sessions.retain(|_, participants| {
            participants.retain(|_, info| {
                let idle = now_ms.saturating_sub(info.last_seen_ms) <= max_idle_ms;
                if !idle {
                    removed += 1;
                }
                idle
            });
            !participants.is_empty()
        });
        if removed > 0 {
            log::debug!("swept {removed} idle participant(s)");
        }
        removed
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_and_count() {
        let registry = PresenceRegistry::new();
        let doc = Uuid::new_v4();

        registry.join(doc, Uuid::new_v4(), "Alice", 100).await;
        registry.join(doc, Uuid::new_v4(), "Bob", 110).await;

        assert_eq!(registry.participant_count(&doc).await, 2);
    }

    #[tokio::test]
    async fn test_rejoin_keeps_join_time() {
        let registry = PresenceRegistry::new();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        registry.join(doc, author, "Alice", 100).await;
        registry.join(doc, author, "Alice G", 500).await;

        let participants = registry.active_participants(&doc).await;
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].name, "Alice G");
        assert_eq!(participants[0].joined_at_ms, 100);
        assert_eq!(participants[0].last_seen_ms, 500);
    }

    #[tokio::test]
    async fn test_leave_removes_empty_session() {
        let registry = PresenceRegistry::new();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        registry.join(doc, author, "Alice", 100).await;
        let removed = registry.leave(&doc, &author).await;

        assert_eq!(removed.unwrap().name, "Alice");
        assert_eq!(registry.participant_count(&doc).await, 0);
        assert!(registry.active_participants(&doc).await.is_empty());
    }

    #[tokio::test]
    async fn test_touch_updates_last_seen() {
        let registry = PresenceRegistry::new();
        let doc = Uuid::new_v4();
        let author = Uuid::new_v4();

        registry.join(doc, author, "Alice", 100).await;
        registry.touch(&doc, &author, 900).await;

        let participants = registry.active_participants(&doc).await;
        assert_eq!(participants[0].last_seen_ms, 900);
    }

    #[tokio::test]
    async fn test_sweep_idle() {
        let registry = PresenceRegistry::new();
        let doc = Uuid::new_v4();
        let idle = Uuid::new_v4();
        let active = Uuid::new_v4();

        registry.join(doc, idle, "Idle", 100).await;
        registry.join(doc, active, "Active", 100).await;
        registry.touch(&doc, &active, 5_000).await;

        let removed = registry.sweep_idle(5_000, 1_000).await;
        assert_eq!(removed, 1);

        let participants = registry.active_participants(&doc).await;
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].name, "Active");
    }
}
