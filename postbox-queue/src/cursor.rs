//! Block-wise reads over a live queue
//!
//! A [`BlockCursor`] fetches a bounded block of eligible entries, hands them
//! out one at a time, and fetches the next block fresh once the current one
//! is used up. Because every block is a new query, entries enqueued while a
//! pass is running (a new high-priority message, say) are seen at the next
//! block boundary.
//!
//! The cursor does not remember what it has handed out. The consumer must
//! delete or defer every entry it receives, or [`BlockCursor::exclude`] it,
//! before the current block runs out; otherwise the entry is fetched again
//! and the cursor never finishes.

use std::{
    collections::{HashSet, VecDeque},
    num::NonZeroUsize,
};

use postbox_common::{MessageId, QueueEntry, internal};

use crate::QueueStore;

#[derive(Debug)]
pub struct BlockCursor<'store> {
    store: &'store dyn QueueStore,
    block_size: Option<NonZeroUsize>,
    exclude: HashSet<MessageId>,
    block: VecDeque<QueueEntry>,
    exhausted: bool,
    blocks_fetched: usize,
}

impl<'store> BlockCursor<'store> {
    /// A cursor reading `block_size` entries at a time; `0` reads the whole
    /// queue in one block
    pub fn new(store: &'store dyn QueueStore, block_size: usize) -> Self {
        Self {
            store,
            block_size: NonZeroUsize::new(block_size),
            exclude: HashSet::new(),
            block: VecDeque::new(),
            exhausted: false,
            blocks_fetched: 0,
        }
    }

    /// Never yield `id` again from this cursor
    pub fn exclude(&mut self, id: MessageId) {
        self.exclude.insert(id);
    }

    #[must_use]
    pub fn excluded(&self) -> &HashSet<MessageId> {
        &self.exclude
    }

    /// Whether a fresh fetch has come back empty
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    #[must_use]
    pub const fn blocks_fetched(&self) -> usize {
        self.blocks_fetched
    }

    /// Fetch the next block fresh from the store
    ///
    /// Anything left over from the previous block is discarded. An empty
    /// result marks the cursor exhausted.
    ///
    /// # Errors
    /// If the store could not be read
    pub async fn next_block(&mut self) -> crate::Result<&[QueueEntry]> {
        let block = self
            .store
            .next_block(self.block_size.map(NonZeroUsize::get), &self.exclude)
            .await?;

        self.blocks_fetched += 1;
        self.exhausted = block.is_empty();
        internal!(
            "Fetched block {} with {} entries",
            self.blocks_fetched,
            block.len()
        );

        self.block = block.into();
        Ok(self.block.make_contiguous())
    }

    /// The next entry to deliver, or `None` once a fresh block is empty
    ///
    /// # Errors
    /// If the store could not be read
    #[allow(clippy::should_implement_trait)]
    pub async fn next(&mut self) -> crate::Result<Option<QueueEntry>> {
        if self.exhausted {
            return Ok(None);
        }

        if self.block.is_empty() {
            self.next_block().await?;
        }

        Ok(self.block.pop_front())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use postbox_common::{NewMessage, Priority};

    use super::*;
    use crate::MemoryQueueStore;

    #[tokio::test]
    async fn test_empty_store_is_exhausted_after_one_fetch() {
        let store = MemoryQueueStore::new();
        let mut cursor = BlockCursor::new(&store, 10);

        assert!(!cursor.is_exhausted());
        assert!(cursor.next().await.unwrap().is_none());
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.blocks_fetched(), 1);

        // Stays exhausted without touching the store again
        assert!(cursor.next().await.unwrap().is_none());
        assert_eq!(cursor.blocks_fetched(), 1);
    }

    #[tokio::test]
    async fn test_next_block_discards_leftovers() {
        let store = MemoryQueueStore::new();
        for n in 0..3 {
            store
                .enqueue(
                    NewMessage::new("a@example.com", "b@example.com", format!("{n}"), ""),
                    Priority::Normal,
                )
                .await
                .unwrap();
        }

        let mut cursor = BlockCursor::new(&store, 2);
        assert_eq!(cursor.next_block().await.unwrap().len(), 2);
        assert_eq!(cursor.next_block().await.unwrap().len(), 2);
        assert_eq!(cursor.blocks_fetched(), 2);
        assert!(!cursor.is_exhausted());
    }
}
