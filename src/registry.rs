//! Status Registry (spec §4.2).
//!
//! A process-wide, mutex-guarded map from task id to its current
//! [`StatusEntry`]. Entries are rendered in insertion order when two tasks
//! tie on every other sort key, so each entry carries a monotonic sequence
//! number assigned at insertion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::types::{StatusEntry, TaskId};

/// Shared handle; clone freely, all clones see the same map.
#[derive(Clone)]
pub struct StatusRegistry {
    inner: Arc<Mutex<HashMap<TaskId, StatusEntry>>>,
    sequence: Arc<AtomicU64>,
}

impl StatusRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Insert or replace a task's status entry. The `sequence` field is
    /// stamped here, overriding whatever the caller set, so callers don't
    /// need to coordinate ordering themselves.
    pub async fn put(&self, mut entry: StatusEntry) {
        entry.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().await.insert(entry.id.clone(), entry);
    }

    /// Look up a single task's current entry.
    pub async fn get(&self, id: &TaskId) -> Option<StatusEntry> {
        self.inner.lock().await.get(id).cloned()
    }

    /// Drop a task from the registry, e.g. once it is finalized and no
    /// longer needs status rendering.
    pub async fn remove(&self, id: &TaskId) -> Option<StatusEntry> {
        self.inner.lock().await.remove(id)
    }

    /// All current entries, ordered by insertion sequence (ties on any
    /// later sort broken the same way, per spec §4.2).
    pub async fn snapshot(&self) -> Vec<StatusEntry> {
        let map = self.inner.lock().await;
        let mut entries: Vec<StatusEntry> = map.values().cloned().collect();
        entries.sort_by_key(|e| e.sequence);
        entries
    }

    /// Number of tasks currently tracked.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether the registry currently tracks nothing.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}
