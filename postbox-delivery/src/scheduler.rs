//! Running drain passes forever
//!
//! Each [`Scheduler::tick`] either does nothing (sending paused, or no
//! eligible entries) or runs one pass. [`Scheduler::run`] ticks until told
//! to shut down, sleeping between ticks whenever the last one got nothing
//! out of the queue.

use postbox_common::{Signal, internal};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::{DeliveryEngine, DeliveryError, Drain};

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Sending is paused; nothing was looked at
    Paused,
    /// No eligible entries, so no pass was started
    Idle,
    Drained(Drain),
}

impl Tick {
    /// Whether it is worth ticking again straight away
    #[must_use]
    pub const fn made_progress(&self) -> bool {
        matches!(self, Self::Drained(Drain::Completed(summary)) if summary.made_progress())
    }
}

#[derive(Debug)]
pub struct Scheduler<'config> {
    engine: DeliveryEngine<'config>,
}

impl<'config> Scheduler<'config> {
    pub const fn new(engine: DeliveryEngine<'config>) -> Self {
        Self { engine }
    }

    #[must_use]
    pub const fn engine(&self) -> &DeliveryEngine<'config> {
        &self.engine
    }

    /// Run at most one pass
    ///
    /// # Errors
    /// If the store cannot be read or the pass fails
    pub async fn tick(&self) -> Result<Tick, DeliveryError> {
        if self.engine.config().pause_send {
            internal!(level = DEBUG, "Sending is paused");
            return Ok(Tick::Paused);
        }

        if self.engine.store().count_eligible().await? == 0 {
            return Ok(Tick::Idle);
        }

        Ok(Tick::Drained(self.engine.drain().await?))
    }

    /// Tick until a shutdown signal arrives
    ///
    /// After a tick that moved nothing out of the queue (idle, paused, lock
    /// held elsewhere, only failures, or an error) the scheduler sleeps for
    /// the configured empty-queue interval before trying again. A pass in
    /// progress is always allowed to finish.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!("Scheduler starting");
        let sleep = self.engine.config().empty_queue_sleep();

        loop {
            let progress = match self.tick().await {
                Ok(tick) => {
                    if tick == Tick::Idle {
                        internal!(
                            level = DEBUG,
                            "No messages to send, sleeping for {} seconds",
                            sleep.as_secs()
                        );
                    }
                    tick.made_progress()
                }
                Err(err) => {
                    tracing::error!("Delivery pass failed: {err}");
                    false
                }
            };

            if progress {
                if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
                    break;
                }
                continue;
            }

            tokio::select! {
                () = tokio::time::sleep(sleep) => {}
                _ = shutdown.recv() => break,
            }
        }

        internal!("Scheduler shutdown complete");
    }
}
