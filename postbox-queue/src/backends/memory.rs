use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postbox_common::{
    BlacklistEntry, LogEntry, Message, MessageId, NewMessage, Priority, QueueEntry, QueuedMessage,
};

use crate::{StoreError, store::QueueStore};

#[derive(Debug, Default)]
struct Tables {
    messages: HashMap<MessageId, Message>,
    queue: HashMap<MessageId, QueuedMessage>,
    blacklist: Vec<BlacklistEntry>,
    log: Vec<LogEntry>,
}

/// In-memory queue store
///
/// Tables are `HashMap`s behind a single `RwLock`, so every operation is
/// atomic with respect to every other. Intended for tests and for transient
/// queues that do not need to survive a restart.
///
/// Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed queue entry, for tests that need precise
    /// control over priorities and timestamps
    ///
    /// # Errors
    /// [`StoreError::AlreadyQueued`] if the message already has an entry
    pub fn insert(&self, message: Message, queued: QueuedMessage) -> crate::Result<()> {
        let mut tables = self.tables.write()?;
        if tables.queue.contains_key(&queued.message_id) {
            return Err(StoreError::AlreadyQueued(queued.message_id));
        }

        tables.messages.insert(message.id, message);
        tables.queue.insert(queued.message_id, queued);
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(
        &self,
        message: NewMessage,
        priority: Priority,
    ) -> crate::Result<QueuedMessage> {
        let message = Message::from_new(message);
        let queued = QueuedMessage::new(message.id, priority);

        self.insert(message, queued.clone())?;
        Ok(queued)
    }

    async fn message(&self, id: &MessageId) -> crate::Result<Message> {
        self.tables
            .read()?
            .messages
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(*id))
    }

    async fn queued(&self, id: &MessageId) -> crate::Result<Option<QueuedMessage>> {
        Ok(self.tables.read()?.queue.get(id).cloned())
    }

    async fn next_block(
        &self,
        limit: Option<usize>,
        exclude: &HashSet<MessageId>,
    ) -> crate::Result<Vec<QueueEntry>> {
        let tables = self.tables.read()?;
        let queued = crate::store::select_block(
            tables.queue.values().cloned().collect(),
            limit,
            exclude,
        );

        queued
            .into_iter()
            .map(|queued| {
                let id = queued.message_id;
                tables
                    .messages
                    .get(&id)
                    .cloned()
                    .map(|message| QueueEntry { queued, message })
                    .ok_or(StoreError::NotFound(id))
            })
            .collect()
    }

    async fn delete_queued(&self, id: &MessageId) -> crate::Result<()> {
        self.tables
            .write()?
            .queue
            .remove(id)
            .ok_or(StoreError::NotFound(*id))?;
        Ok(())
    }

    async fn defer(&self, id: &MessageId, at: DateTime<Utc>) -> crate::Result<()> {
        self.tables
            .write()?
            .queue
            .get_mut(id)
            .ok_or(StoreError::NotFound(*id))?
            .defer(at);
        Ok(())
    }

    async fn retry_deferred(&self, max_retries: Option<u32>) -> crate::Result<usize> {
        let mut tables = self.tables.write()?;
        let mut retried = 0;

        for queued in tables.queue.values_mut() {
            if queued.is_deferred() && max_retries.is_none_or(|max| queued.retries < max) {
                queued.deferred_at = None;
                queued.retries += 1;
                retried += 1;
            }
        }

        Ok(retried)
    }

    async fn count_queued(&self) -> crate::Result<usize> {
        Ok(self.tables.read()?.queue.len())
    }

    async fn count_eligible(&self) -> crate::Result<usize> {
        Ok(self
            .tables
            .read()?
            .queue
            .values()
            .filter(|entry| !entry.is_deferred())
            .count())
    }

    async fn blacklist(&self) -> crate::Result<Vec<BlacklistEntry>> {
        Ok(self.tables.read()?.blacklist.clone())
    }

    async fn add_to_blacklist(&self, address: &str) -> crate::Result<BlacklistEntry> {
        let entry = BlacklistEntry::new(address);
        self.tables.write()?.blacklist.push(entry.clone());
        Ok(entry)
    }

    async fn append_log(&self, entry: &LogEntry) -> crate::Result<()> {
        self.tables.write()?.log.push(entry.clone());
        Ok(())
    }

    async fn logs(&self, message: Option<&MessageId>) -> crate::Result<Vec<LogEntry>> {
        Ok(self
            .tables
            .read()?
            .log
            .iter()
            .filter(|entry| message.is_none_or(|id| entry.message_id == *id))
            .cloned()
            .collect())
    }
}
