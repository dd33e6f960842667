use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postbox_common::{
    BlacklistEntry, LogEntry, Message, MessageId, NewMessage, Priority, QueueEntry, QueuedMessage,
};

/// Persistent storage for messages, their queue entries, the blacklist and
/// the delivery log
///
/// Every method is a single, self-contained operation. Implementations must
/// make `delete_queued` and `defer` atomic per entry, since other processes
/// (the enqueue path, administrative tooling) share the same store.
#[async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// Store a new message and queue it for delivery
    ///
    /// # Errors
    /// If the message or its queue entry could not be persisted
    async fn enqueue(&self, message: NewMessage, priority: Priority)
    -> crate::Result<QueuedMessage>;

    /// Fetch a stored message, queued or not
    ///
    /// # Errors
    /// [`crate::StoreError::NotFound`] if no such message exists
    async fn message(&self, id: &MessageId) -> crate::Result<Message>;

    /// Fetch the queue entry for a message, if it is still queued
    ///
    /// # Errors
    /// If the store could not be read
    async fn queued(&self, id: &MessageId) -> crate::Result<Option<QueuedMessage>>;

    /// Fetch up to `limit` eligible entries in delivery order
    ///
    /// Eligible means not deferred and not in `exclude`. Delivery order is
    /// priority, then enqueue time, then ID. `None` fetches everything.
    ///
    /// # Errors
    /// If the store could not be read
    async fn next_block(
        &self,
        limit: Option<usize>,
        exclude: &HashSet<MessageId>,
    ) -> crate::Result<Vec<QueueEntry>>;

    /// Remove a queue entry, keeping the message itself
    ///
    /// # Errors
    /// [`crate::StoreError::NotFound`] if the message is not queued
    async fn delete_queued(&self, id: &MessageId) -> crate::Result<()>;

    /// Mark a queue entry as deferred at `at`
    ///
    /// # Errors
    /// [`crate::StoreError::NotFound`] if the message is not queued
    async fn defer(&self, id: &MessageId, at: DateTime<Utc>) -> crate::Result<()>;

    /// Make deferred entries eligible again
    ///
    /// Clears the deferral and increments `retries` on every deferred entry
    /// whose `retries` is below `max_retries` (all of them for `None`).
    /// Returns how many entries were made eligible. Run it under the same
    /// process lock as delivery, so that no pass is working on the queue
    /// at the same time.
    ///
    /// # Errors
    /// If the store could not be read or written
    async fn retry_deferred(&self, max_retries: Option<u32>) -> crate::Result<usize>;

    /// Number of queue entries, deferred or not
    ///
    /// # Errors
    /// If the store could not be read
    async fn count_queued(&self) -> crate::Result<usize>;

    /// Number of queue entries that are not deferred
    ///
    /// # Errors
    /// If the store could not be read
    async fn count_eligible(&self) -> crate::Result<usize>;

    /// All blacklist entries
    ///
    /// # Errors
    /// If the store could not be read
    async fn blacklist(&self) -> crate::Result<Vec<BlacklistEntry>>;

    /// Check a single address against the blacklist as it is right now
    ///
    /// # Errors
    /// If the store could not be read
    async fn is_blacklisted(&self, address: &str) -> crate::Result<bool> {
        let address = postbox_common::normalize_address(address);
        Ok(self
            .blacklist()
            .await?
            .iter()
            .any(|entry| postbox_common::normalize_address(&entry.email) == address))
    }

    /// Bar an address from delivery
    ///
    /// # Errors
    /// If the entry could not be persisted
    async fn add_to_blacklist(&self, address: &str) -> crate::Result<BlacklistEntry>;

    /// Append a record to the delivery log
    ///
    /// # Errors
    /// If the record could not be persisted
    async fn append_log(&self, entry: &LogEntry) -> crate::Result<()>;

    /// Delivery log records in append order, optionally for one message only
    ///
    /// # Errors
    /// If the store could not be read
    async fn logs(&self, message: Option<&MessageId>) -> crate::Result<Vec<LogEntry>>;
}

/// Select and order eligible entries, for backends that hold every row in memory
pub(crate) fn select_block(
    mut queued: Vec<QueuedMessage>,
    limit: Option<usize>,
    exclude: &HashSet<MessageId>,
) -> Vec<QueuedMessage> {
    queued.retain(|entry| !entry.is_deferred() && !exclude.contains(&entry.message_id));
    queued.sort_by(QueuedMessage::delivery_order);

    if let Some(limit) = limit {
        queued.truncate(limit);
    }

    queued
}
