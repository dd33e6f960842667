//! Cross-process mutual exclusion for drain passes
//!
//! At most one pass may run at a time across every process sharing a queue.
//! [`acquire`] tries a [`ProcessLock`] until it succeeds or the wait runs
//! out; losing the race is an expected outcome, not an error.

mod file;
mod memory;

use std::{fmt, time::Duration};

pub use file::FileLock;
pub use memory::MemoryLock;
use postbox_common::internal;
use tokio::time::Instant;

use crate::LockError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Something that can be held by one holder at a time
pub trait ProcessLock: Send + Sync + fmt::Debug {
    /// Take the lock if nobody holds it, without waiting
    ///
    /// # Errors
    /// If the lock itself is unusable (e.g. the lock file cannot be opened)
    fn try_acquire(&self) -> Result<Option<LockGuard>, LockError>;
}

/// Proof of holding a lock; releases it when dropped
///
/// Dropping covers every way out of a guarded section: an early return, an
/// error, a panic, or the section's future being cancelled.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Release the lock now
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            internal!("Lock released");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Result of trying to take a lock
#[derive(Debug)]
pub enum Acquire {
    Acquired(LockGuard),
    /// Held elsewhere and we were not prepared to wait
    AlreadyLocked,
    /// Held elsewhere for longer than we were prepared to wait
    TimedOut,
}

/// Take `lock`, waiting up to `timeout` for it to become free
///
/// A zero timeout makes exactly one attempt and reports
/// [`Acquire::AlreadyLocked`] if it fails. Otherwise the lock is retried
/// every 100ms until the timeout passes, then [`Acquire::TimedOut`] is
/// reported. A timeout too large to represent waits forever.
///
/// # Errors
/// If the lock itself is unusable
pub async fn acquire(lock: &dyn ProcessLock, timeout: Duration) -> Result<Acquire, LockError> {
    if let Some(guard) = lock.try_acquire()? {
        internal!("Lock acquired");
        return Ok(Acquire::Acquired(guard));
    }

    if timeout.is_zero() {
        return Ok(Acquire::AlreadyLocked);
    }

    let deadline = Instant::now().checked_add(timeout);
    loop {
        let now = Instant::now();
        if deadline.is_some_and(|deadline| now >= deadline) {
            return Ok(Acquire::TimedOut);
        }

        let wait = deadline.map_or(POLL_INTERVAL, |deadline| POLL_INTERVAL.min(deadline - now));
        tokio::time::sleep(wait).await;

        if let Some(guard) = lock.try_acquire()? {
            internal!("Lock acquired after waiting");
            return Ok(Acquire::Acquired(guard));
        }
    }
}
