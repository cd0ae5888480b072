//! Per-user translation history held in memory.

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::HistoryEntry;

/// Bounded history per uid. Entries are kept newest first; once a user
/// reaches `limit` entries the oldest one is dropped.
pub struct HistoryStore {
    limit: usize,
    entries: RwLock<HashMap<String, VecDeque<HistoryEntry>>>,
}

impl HistoryStore {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record(&self, uid: &str, entry: HistoryEntry) {
        let mut entries = self.entries.write().await;
        let list = entries.entry(uid.to_string()).or_default();
        list.push_front(entry);
        list.truncate(self.limit);
    }

    pub async fn list(&self, uid: &str) -> Vec<HistoryEntry> {
        self.entries
            .read()
            .await
            .get(uid)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns false when `uid` has no entry with `id`.
    pub async fn delete(&self, uid: &str, id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        let Some(list) = entries.get_mut(uid) else {
            return false;
        };
        let before = list.len();
        list.retain(|entry| entry.id != id);
        list.len() != before
    }

    /// Removes all entries of `uid` and returns how many there were.
    pub async fn clear(&self, uid: &str) -> usize {
        self.entries
            .write()
            .await
            .remove(uid)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}
