//! The delivery engine
//!
//! [`DeliveryEngine::deliver`] decides the fate of a single queue entry;
//! [`DeliveryEngine::drain`] runs one whole pass over the queue under the
//! process lock. [`DeliveryEngine::retry_deferred`] hands deferred entries
//! back to later passes.

mod deliver;
mod drain;
mod retry;

use std::{fmt, sync::Arc, time::Duration};

use postbox_queue::QueueStore;
use postbox_transport::Transport;

use crate::{DeliveryConfig, ProcessLock, RetryClassifier};

/// What happened to one queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Accepted by the transport; the queue entry is gone
    Sent,
    /// Recipient blacklisted; the queue entry is gone and nothing was sent
    Skipped,
    /// The transport failed; the entry is deferred or left eligible
    Failed { deferred: bool },
}

/// Counts for one completed pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub sent: usize,
    pub skipped: usize,
    /// Includes the deferred ones
    pub failed: usize,
    pub deferred: usize,
    pub elapsed: Duration,
}

impl DrainSummary {
    pub(crate) const fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Sent => self.sent += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed { deferred } => {
                self.failed += 1;
                if deferred {
                    self.deferred += 1;
                }
            }
        }
    }

    /// Whether anything was attempted at all
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.sent == 0 && self.skipped == 0 && self.failed == 0
    }

    /// Whether any entry left the queue
    #[must_use]
    pub const fn made_progress(&self) -> bool {
        self.sent > 0 || self.skipped > 0
    }
}

impl fmt::Display for DrainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sent, {} failed ({} deferred), {} skipped.",
            self.sent, self.failed, self.deferred, self.skipped
        )
    }
}

/// Result of asking for a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    Completed(DrainSummary),
    /// Another pass holds the lock and no wait was configured
    AlreadyLocked,
    /// Another pass held the lock for the whole configured wait
    TimedOut,
}

/// Result of asking for deferred entries to be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// This many entries are eligible again
    Completed(usize),
    AlreadyLocked,
    TimedOut,
}

#[derive(Debug)]
pub struct DeliveryEngine<'config> {
    config: &'config DeliveryConfig,
    classifier: RetryClassifier,
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn Transport>,
    lock: Arc<dyn ProcessLock>,
}

impl<'config> DeliveryEngine<'config> {
    pub fn new(
        config: &'config DeliveryConfig,
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        lock: Arc<dyn ProcessLock>,
    ) -> Self {
        Self {
            config,
            classifier: config.classifier(),
            store,
            transport,
            lock,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DeliveryConfig {
        self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn QueueStore {
        self.store.as_ref()
    }
}
