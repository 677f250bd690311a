//! Bounded tick history per server.
//!
//! Only a server's own loop appends; handlers read concurrently. Oldest
//! entries fall off once the ring is full, and a server's ring is dropped
//! when its monitoring stops.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;

use common::models::MonitorTick;

#[derive(Default)]
pub struct SnapshotHistory {
    rings: RwLock<HashMap<String, VecDeque<Arc<MonitorTick>>>>,
}

impl SnapshotHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a tick, trimming the ring to `capacity`.
    pub async fn push(&self, key: &str, tick: Arc<MonitorTick>, capacity: usize) {
        let capacity = capacity.max(1);
        let mut rings = self.rings.write().await;
        let ring = rings.entry(key.to_string()).or_default();
        ring.push_back(tick);
        while ring.len() > capacity {
            ring.pop_front();
        }
    }

    pub async fn latest(&self, key: &str) -> Option<Arc<MonitorTick>> {
        self.rings.read().await.get(key)?.back().cloned()
    }

    /// Forgets every tick kept for `key`.
    pub async fn remove(&self, key: &str) -> bool {
        self.rings.write().await.remove(key).is_some()
    }

    /// Ticks oldest first.
    pub async fn list(&self, key: &str) -> Vec<Arc<MonitorTick>> {
        self.rings
            .read()
            .await
            .get(key)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }
}
