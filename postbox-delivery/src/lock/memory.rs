use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use super::{LockGuard, ProcessLock};
use crate::LockError;

/// A lock shared between clones within one process
#[derive(Debug, Clone, Default)]
pub struct MemoryLock {
    held: Arc<AtomicBool>,
}

impl MemoryLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl ProcessLock for MemoryLock {
    fn try_acquire(&self) -> Result<Option<LockGuard>, LockError> {
        if self
            .held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(None);
        }

        let held = Arc::clone(&self.held);
        Ok(Some(LockGuard::new(move || {
            held.store(false, Ordering::SeqCst);
        })))
    }
}
