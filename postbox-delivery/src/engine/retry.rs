use postbox_common::internal;

use super::{DeliveryEngine, Retry};
use crate::{Acquire, DeliveryError, lock};

impl DeliveryEngine<'_> {
    /// Make deferred entries eligible for the next pass
    ///
    /// Takes the process lock the same way [`DeliveryEngine::drain`] does, so
    /// that it never runs while a pass is deleting entries. Entries that
    /// already have `max_retries` retries stay deferred.
    ///
    /// # Errors
    /// If the lock file or the store cannot be used
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn retry_deferred(&self, max_retries: Option<u32>) -> Result<Retry, DeliveryError> {
        let guard = match lock::acquire(self.lock.as_ref(), self.config.lock_wait_timeout()).await? {
            Acquire::Acquired(guard) => guard,
            Acquire::AlreadyLocked => {
                internal!(level = DEBUG, "Lock already in place. Exiting.");
                return Ok(Retry::AlreadyLocked);
            }
            Acquire::TimedOut => {
                internal!(level = DEBUG, "Waiting for the lock timed out. Exiting.");
                return Ok(Retry::TimedOut);
            }
        };

        let result = self.store.retry_deferred(max_retries).await;
        guard.release();

        let retried = result?;
        tracing::info!("{retried} deferred messages are eligible again.");

        Ok(Retry::Completed(retried))
    }
}
