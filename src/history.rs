//! Per-recipient notification history.
//!
//! Every dispatch archives one [`NotificationHistoryEntry`] per recipient.
//! The log is bounded: at most [`MAX_HISTORY_PER_RECIPIENT`] entries per
//! recipient, oldest evicted first, so an alert storm cannot grow memory
//! without limit.
//!
//! The in-memory store keeps one queue per recipient behind a shared map.
//! The map lock is held only long enough to fetch a queue handle; appends
//! serialize per recipient on that queue's own lock, and appends to
//! different recipients never contend.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use crate::model::{DeliveryStats, HistoryFilter, NotificationHistoryEntry};

/// Hard cap on archived entries per recipient.
pub const MAX_HISTORY_PER_RECIPIENT: usize = 1000;

/// Archived dispatch outcomes per recipient.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one entry, evicting the oldest past the cap.
    async fn append(&self, user_id: &str, entry: NotificationHistoryEntry) -> anyhow::Result<()>;

    /// Entries newest first, after applying the filter.
    async fn recent(
        &self,
        user_id: &str,
        filter: &HistoryFilter,
    ) -> anyhow::Result<Vec<NotificationHistoryEntry>>;

    /// Delivery statistics over the recipient's archived entries.
    async fn stats(&self, user_id: &str) -> anyhow::Result<DeliveryStats>;
}

type EntryQueue = Arc<Mutex<VecDeque<NotificationHistoryEntry>>>;

/// In-memory history store.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    logs: RwLock<HashMap<String, EntryQueue>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, user_id: &str) -> anyhow::Result<EntryQueue> {
        {
            let logs = self
                .logs
                .read()
                .map_err(|_| anyhow::anyhow!("history map lock poisoned"))?;
            if let Some(queue) = logs.get(user_id) {
                return Ok(queue.clone());
            }
        }

        let mut logs = self
            .logs
            .write()
            .map_err(|_| anyhow::anyhow!("history map lock poisoned"))?;
        Ok(logs.entry(user_id.to_string()).or_default().clone())
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, user_id: &str, entry: NotificationHistoryEntry) -> anyhow::Result<()> {
        let queue = self.queue(user_id)?;
        let mut queue = queue
            .lock()
            .map_err(|_| anyhow::anyhow!("history queue lock poisoned"))?;

        queue.push_back(entry);
        while queue.len() > MAX_HISTORY_PER_RECIPIENT {
            queue.pop_front();
        }
        Ok(())
    }

    async fn recent(
        &self,
        user_id: &str,
        filter: &HistoryFilter,
    ) -> anyhow::Result<Vec<NotificationHistoryEntry>> {
        let queue = self.queue(user_id)?;
        let queue = queue
            .lock()
            .map_err(|_| anyhow::anyhow!("history queue lock poisoned"))?;

        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(queue
            .iter()
            .rev()
            .filter(|entry| filter.matches(entry))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stats(&self, user_id: &str) -> anyhow::Result<DeliveryStats> {
        let queue = self.queue(user_id)?;
        let queue = queue
            .lock()
            .map_err(|_| anyhow::anyhow!("history queue lock poisoned"))?;

        let entries: Vec<NotificationHistoryEntry> = queue.iter().cloned().collect();
        Ok(DeliveryStats::from_entries(&entries))
    }
}
