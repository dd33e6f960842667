use postbox_common::internal;
use postbox_queue::BlockCursor;
use postbox_transport::Connection;
use tokio::time::Instant;

use super::{DeliveryEngine, Drain, DrainSummary, Outcome};
use crate::{Acquire, BlacklistSnapshot, DeliveryError, lock};

impl DeliveryEngine<'_> {
    /// Run one pass over the queue
    ///
    /// Takes the process lock (waiting as configured), opens one connection,
    /// snapshots the blacklist and delivers every eligible entry block by
    /// block. An entry that fails is excluded for the rest of the pass. A
    /// connection the transport reports as lost is replaced before the next
    /// entry. The lock is released however the pass ends.
    ///
    /// The pass deadline is checked between entries, never in the middle of
    /// one, so every entry is either fully handled or untouched.
    ///
    /// Losing the lock race is reported as [`Drain::AlreadyLocked`] or
    /// [`Drain::TimedOut`], not as an error.
    ///
    /// # Errors
    /// If the lock file or the store cannot be used, a connection cannot be
    /// opened, or the pass runs out of time. Entries handled before the
    /// error stay handled.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn drain(&self) -> Result<Drain, DeliveryError> {
        let guard = match lock::acquire(self.lock.as_ref(), self.config.lock_wait_timeout()).await? {
            Acquire::Acquired(guard) => guard,
            Acquire::AlreadyLocked => {
                internal!(level = DEBUG, "Lock already in place. Exiting.");
                return Ok(Drain::AlreadyLocked);
            }
            Acquire::TimedOut => {
                internal!(level = DEBUG, "Waiting for the lock timed out. Exiting.");
                return Ok(Drain::TimedOut);
            }
        };

        let start = Instant::now();
        let mut summary = DrainSummary::default();

        let result = self.pass(start, &mut summary).await;

        guard.release();
        summary.elapsed = start.elapsed();

        if summary.is_empty() {
            tracing::info!("{summary}");
        } else {
            tracing::warn!("{summary}");
        }
        tracing::debug!("Completed in {:.2} seconds", summary.elapsed.as_secs_f64());

        result.map(|()| Drain::Completed(summary))
    }

    /// The body of a pass, run while holding the lock
    ///
    /// Counts go straight into `summary` so they survive the pass being
    /// cut short.
    async fn pass(&self, start: Instant, summary: &mut DrainSummary) -> Result<(), DeliveryError> {
        let mut connection = self
            .transport
            .open()
            .await
            .map_err(DeliveryError::Connect)?;

        let result = self.deliver_all(&mut connection, start, summary).await;

        if let Err(err) = connection.close().await {
            tracing::debug!("Failed to close connection: {err}");
        }

        result
    }

    async fn deliver_all(
        &self,
        connection: &mut Box<dyn Connection>,
        start: Instant,
        summary: &mut DrainSummary,
    ) -> Result<(), DeliveryError> {
        let snapshot = BlacklistSnapshot::load(self.store()).await?;
        let mut cursor = BlockCursor::new(self.store(), self.config.block_size);
        let deadline = self.config.pass_deadline();

        while let Some(entry) = cursor.next().await? {
            if let Some(deadline) = deadline
                && start.elapsed() >= deadline
            {
                tracing::warn!("Pass ran past its deadline of {deadline:?}, stopping early");
                return Err(DeliveryError::Deadline(deadline));
            }

            if !connection.is_usable() {
                *connection = self.reconnect(connection.as_mut()).await?;
            }

            let outcome = self
                .deliver(&entry, Some(connection.as_mut()), Some(&snapshot))
                .await?;

            if matches!(outcome, Outcome::Failed { .. }) {
                cursor.exclude(entry.id());
            }
            summary.record(outcome);
        }

        internal!("Queue exhausted after {} blocks", cursor.blocks_fetched());

        Ok(())
    }

    /// Replace a connection the transport has given up on
    ///
    /// Only a failure to open the new connection ends the pass; the entries
    /// left in the queue never reached the lost one.
    async fn reconnect(
        &self,
        lost: &mut dyn Connection,
    ) -> Result<Box<dyn Connection>, DeliveryError> {
        internal!(level = DEBUG, "Connection lost, opening a new one");

        if let Err(err) = lost.close().await {
            tracing::debug!("Failed to close lost connection: {err}");
        }

        self.transport.open().await.map_err(DeliveryError::Connect)
    }
}
