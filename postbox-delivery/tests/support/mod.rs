#![allow(dead_code)]

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postbox_common::{
    BlacklistEntry, LogEntry, LogResult, Message, MessageId, NewMessage, Priority, QueueEntry,
    QueuedMessage,
};
use postbox_delivery::{DeliveryConfig, DeliveryEngine, MemoryLock, Scheduler};
use postbox_queue::{MemoryQueueStore, QueueStore, StoreError};
use postbox_transport::MemoryTransport;

/// A memory store, transport and lock wired to one configuration
pub struct Harness {
    pub config: DeliveryConfig,
    pub store: MemoryQueueStore,
    pub transport: MemoryTransport,
    pub lock: MemoryLock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DeliveryConfig::default())
    }

    pub fn with_config(config: DeliveryConfig) -> Self {
        Self {
            config,
            store: MemoryQueueStore::new(),
            transport: MemoryTransport::new(),
            lock: MemoryLock::new(),
        }
    }

    pub fn engine(&self) -> DeliveryEngine<'_> {
        self.engine_with_store(Arc::new(self.store.clone()))
    }

    pub fn engine_with_store(&self, store: Arc<dyn QueueStore>) -> DeliveryEngine<'_> {
        DeliveryEngine::new(
            &self.config,
            store,
            Arc::new(self.transport.clone()),
            Arc::new(self.lock.clone()),
        )
    }

    pub fn scheduler(&self) -> Scheduler<'_> {
        Scheduler::new(self.engine())
    }

    pub async fn enqueue(&self, to: &str, priority: Priority) -> MessageId {
        self.store
            .enqueue(message(to, "Subject"), priority)
            .await
            .unwrap()
            .message_id
    }

    pub async fn results(&self, id: &MessageId) -> Vec<LogResult> {
        self.store
            .logs(Some(id))
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.result)
            .collect()
    }
}

pub fn message(to: &str, subject: &str) -> NewMessage {
    NewMessage::new("sender@example.com", to, subject, "Body")
}

/// Wraps a memory store and fails every `delete_queued`
#[derive(Debug, Clone)]
pub struct FailingDeleteStore {
    pub inner: MemoryQueueStore,
}

#[async_trait]
impl QueueStore for FailingDeleteStore {
    async fn enqueue(
        &self,
        message: NewMessage,
        priority: Priority,
    ) -> postbox_queue::Result<QueuedMessage> {
        self.inner.enqueue(message, priority).await
    }

    async fn message(&self, id: &MessageId) -> postbox_queue::Result<Message> {
        self.inner.message(id).await
    }

    async fn queued(&self, id: &MessageId) -> postbox_queue::Result<Option<QueuedMessage>> {
        self.inner.queued(id).await
    }

    async fn next_block(
        &self,
        limit: Option<usize>,
        exclude: &HashSet<MessageId>,
    ) -> postbox_queue::Result<Vec<QueueEntry>> {
        self.inner.next_block(limit, exclude).await
    }

    async fn delete_queued(&self, _id: &MessageId) -> postbox_queue::Result<()> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }

    async fn defer(&self, id: &MessageId, at: DateTime<Utc>) -> postbox_queue::Result<()> {
        self.inner.defer(id, at).await
    }

    async fn retry_deferred(&self, max_retries: Option<u32>) -> postbox_queue::Result<usize> {
        self.inner.retry_deferred(max_retries).await
    }

    async fn count_queued(&self) -> postbox_queue::Result<usize> {
        self.inner.count_queued().await
    }

    async fn count_eligible(&self) -> postbox_queue::Result<usize> {
        self.inner.count_eligible().await
    }

    async fn blacklist(&self) -> postbox_queue::Result<Vec<BlacklistEntry>> {
        self.inner.blacklist().await
    }

    async fn add_to_blacklist(&self, address: &str) -> postbox_queue::Result<BlacklistEntry> {
        self.inner.add_to_blacklist(address).await
    }

    async fn append_log(&self, entry: &LogEntry) -> postbox_queue::Result<()> {
        self.inner.append_log(entry).await
    }

    async fn logs(&self, message: Option<&MessageId>) -> postbox_queue::Result<Vec<LogEntry>> {
        self.inner.logs(message).await
    }
}
