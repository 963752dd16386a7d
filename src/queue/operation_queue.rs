//! Durable, ordered store of pending operator actions

use super::id::{Clock, IdGenerator, SystemClock, TimeRandomIdGenerator};
use super::models::{DEFAULT_MAX_RETRIES, QueueItem, QueuedAction};
use crate::storage::{KeyValueStore, StorageError};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Namespace for queue entries in the key-value store
pub const QUEUE_KEY_PREFIX: &str = "offline_queue:";

const MAX_ID_ATTEMPTS: usize = 8;

fn item_key(id: &str) -> String {
    format!("{}{}", QUEUE_KEY_PREFIX, id)
}

/// Persistent queue of actions that could not reach the backend
///
/// Items are stored one per key so that a single corrupt entry cannot take
/// the rest of the queue down with it. The only field ever rewritten after
/// enqueue is `retry_count`.
pub struct OperationQueue {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    max_retries: u32,
    last_created: Mutex<Option<DateTime<Utc>>>,
}

impl OperationQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            ids: Arc::new(TimeRandomIdGenerator),
            max_retries: DEFAULT_MAX_RETRIES,
            last_created: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Retry ceiling stamped onto newly enqueued items (at least 1)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Strictly increasing timestamp, also across restarts
    ///
    /// The first call on a fresh instance seeds from the newest stored item,
    /// so a clock that stepped backwards between runs cannot reorder a later
    /// action ahead of an earlier one.
    async fn next_created_at(&self) -> Result<DateTime<Utc>, StorageError> {
        let seeded = self.lock_last_created().is_some();
        let newest_stored = if seeded {
            None
        } else {
            self.list_pending().await?.last().map(|item| item.created_at)
        };

        let now = self.clock.now();
        let mut last = self.lock_last_created();
        let floor = (*last).max(newest_stored);
        let created_at = match floor {
            Some(previous) if now <= previous => previous + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(created_at);
        Ok(created_at)
    }

    fn lock_last_created(&self) -> std::sync::MutexGuard<'_, Option<DateTime<Utc>>> {
        self.last_created
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn fresh_id(&self, created_at: DateTime<Utc>) -> Result<String, StorageError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.ids.generate(created_at);
            if self.store.get(&item_key(&id)).await?.is_none() {
                return Ok(id);
            }
            debug!("Queue id collision on '{}', regenerating", id);
        }
        Err(StorageError::Unavailable(format!(
            "could not generate a unique queue id after {} attempts",
            MAX_ID_ATTEMPTS
        )))
    }

    /// Persist a new action and return its id
    pub async fn enqueue(&self, action: QueuedAction) -> Result<String, StorageError> {
        let created_at = self.next_created_at().await?;
        let id = self.fresh_id(created_at).await?;

        let item = QueueItem {
            id: id.clone(),
            action,
            created_at,
            retry_count: 0,
            max_retries: self.max_retries,
        };

        self.write(&item).await?;
        info!(
            "Queued {} action for WIP '{}' as {}",
            item.operation_type(),
            item.action.wip_id(),
            id
        );
        Ok(id)
    }

    async fn write(&self, item: &QueueItem) -> Result<(), StorageError> {
        let json = serde_json::to_string(item)?;
        self.store.set(&item_key(&item.id), &json).await
    }

    /// Read one item, `None` if it is absent
    pub async fn get(&self, id: &str) -> Result<Option<QueueItem>, StorageError> {
        match self.store.get(&item_key(id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Every pending item, oldest first
    ///
    /// Entries that no longer deserialize are skipped with a warning rather
    /// than failing the whole listing.
    pub async fn list_pending(&self) -> Result<Vec<QueueItem>, StorageError> {
        let keys = self.store.keys_with_prefix(QUEUE_KEY_PREFIX).await?;

        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(json) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<QueueItem>(&json) {
                Ok(item) => items.push(item),
                Err(e) => warn!("Skipping unreadable queue entry '{}': {}", key, e),
            }
        }

        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    /// Delete an item. Removing an absent id is a no-op.
    pub async fn remove(&self, id: &str) -> Result<(), StorageError> {
        self.store.delete(&item_key(id)).await
    }

    /// Record a failed attempt
    ///
    /// Returns `true` if the item may be retried later, `false` if it was
    /// dropped for reaching its retry ceiling or no longer exists.
    pub async fn increment_retry(&self, id: &str) -> Result<bool, StorageError> {
        let Some(mut item) = self.get(id).await? else {
            return Ok(false);
        };

        item.retry_count += 1;
        if item.retry_count >= item.max_retries {
            self.remove(id).await?;
            warn!(
                "{}",
                json!({
                    "event": "queue_item_dropped",
                    "id": id,
                    "type": item.operation_type().as_str(),
                    "wip_id": item.action.wip_id(),
                    "attempts": item.retry_count,
                    "timestamp": Utc::now().to_rfc3339(),
                })
            );
            return Ok(false);
        }

        self.write(&item).await?;
        debug!("Queue item {} retry count now {}/{}", id, item.retry_count, item.max_retries);
        Ok(true)
    }

    /// Number of pending items
    pub async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.list_pending().await?.len())
    }

    /// Remove every queued item, returning how many keys were deleted
    pub async fn clear(&self) -> Result<usize, StorageError> {
        let keys = self.store.keys_with_prefix(QUEUE_KEY_PREFIX).await?;
        for key in &keys {
            self.store.delete(key).await?;
        }
        info!("Cleared {} queued actions", keys.len());
        Ok(keys.len())
    }
}
