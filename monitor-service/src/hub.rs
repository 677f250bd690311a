//! Per-server publish/subscribe groups.
//!
//! Each server key owns a broadcast channel. Publishing to a key nobody
//! subscribes to is a no-op, and channels whose last receiver went away are
//! dropped on the next publish.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use common::models::MonitorEvent;

pub type EventReceiver = broadcast::Receiver<Arc<MonitorEvent>>;

pub struct MetricsHub {
    groups: RwLock<HashMap<String, broadcast::Sender<Arc<MonitorEvent>>>>,
    capacity: usize,
}

impl MetricsHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Joins the group for `key`, creating it if needed.
    pub async fn subscribe(&self, key: &str) -> EventReceiver {
        let mut groups = self.groups.write().await;
        groups
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Sends `event` to every subscriber of `key`; returns how many
    /// received it.
    pub async fn publish(&self, key: &str, event: MonitorEvent) -> usize {
        let sent = {
            let groups = self.groups.read().await;
            match groups.get(key) {
                Some(tx) => tx.send(Arc::new(event)).ok(),
                None => return 0,
            }
        };

        match sent {
            Some(n) => n,
            None => {
                let mut groups = self.groups.write().await;
                if groups.get(key).is_some_and(|tx| tx.receiver_count() == 0) {
                    groups.remove(key);
                    debug!(group = key, "Dropped idle group");
                }
                0
            }
        }
    }

    pub async fn subscriber_count(&self, key: &str) -> usize {
        self.groups
            .read()
            .await
            .get(key)
            .map_or(0, |tx| tx.receiver_count())
    }
}
