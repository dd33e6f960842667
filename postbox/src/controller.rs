use std::sync::Arc;

use anyhow::Context;
use postbox_common::{Signal, internal};
use postbox_delivery::{
    DeliveryConfig, DeliveryEngine, DeliveryError, Drain, FileLock, Retry, Scheduler,
};
use postbox_queue::{QueueStore, StoreConfig};
use postbox_transport::{SmtpConfig, SmtpTransport};
use serde::Deserialize;
use tokio::sync::broadcast;

/// The whole configuration file
///
/// # Example Configuration
///
/// ```ron
/// Postbox (
///     store: File(path: "/var/spool/postbox"),
///     smtp: (
///         host: "mail.example.com",
///         port: 587,
///         username: Some("postbox"),
///         password: Some("secret"),
///     ),
///     delivery: (
///         lock_path: "/run/postbox/send_mail",
///         block_size: 100,
///     ),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Postbox {
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

impl Postbox {
    /// Parse a configuration document
    ///
    /// # Errors
    /// If `content` is not valid RON for this configuration
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    fn open_store(&self) -> anyhow::Result<Arc<dyn QueueStore>> {
        self.store
            .clone()
            .into_store()
            .context("Failed to open the queue store")
    }

    fn engine(&self, store: Arc<dyn QueueStore>) -> DeliveryEngine<'_> {
        DeliveryEngine::new(
            &self.delivery,
            store,
            Arc::new(SmtpTransport::new(self.smtp.clone())),
            Arc::new(FileLock::new(&self.delivery.lock_path)),
        )
    }

    /// Drain the queue once
    ///
    /// Losing the lock race, a connection that cannot be opened and a pass
    /// that runs out of time are all logged and count as success; the next
    /// invocation picks up where this one stopped.
    ///
    /// # Errors
    /// If the store cannot be opened or used, or the lock file cannot be
    /// created
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn send(&self) -> anyhow::Result<()> {
        if self.delivery.pause_send {
            tracing::info!("Sending is paused, quitting.");
            return Ok(());
        }

        let engine = self.engine(self.open_store()?);

        match engine.drain().await {
            Ok(Drain::Completed(_) | Drain::AlreadyLocked | Drain::TimedOut) => Ok(()),
            Err(err @ (DeliveryError::Store(_) | DeliveryError::Lock(_))) => Err(err.into()),
            Err(err @ (DeliveryError::Connect(_) | DeliveryError::Deadline(_))) => {
                tracing::error!("{err}");
                Ok(())
            }
        }
    }

    /// Make deferred messages eligible for the next `send`
    ///
    /// Messages already retried `max_retries` times stay deferred. Losing
    /// the lock race is logged and counts as success.
    ///
    /// # Errors
    /// If the store cannot be opened or used, or the lock file cannot be
    /// created
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn retry(&self, max_retries: Option<u32>) -> anyhow::Result<usize> {
        let engine = self.engine(self.open_store()?);

        match engine.retry_deferred(max_retries).await? {
            Retry::Completed(retried) => Ok(retried),
            Retry::AlreadyLocked | Retry::TimedOut => {
                tracing::warn!("A delivery pass holds the lock, nothing was retried.");
                Ok(0)
            }
        }
    }

    /// Keep draining the queue until SIGINT or SIGTERM
    ///
    /// The first signal lets a pass in progress finish; a second CTRL+C
    /// abandons it.
    ///
    /// # Errors
    /// If the store cannot be opened or the signal handlers cannot be
    /// installed
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(&self) -> anyhow::Result<()> {
        let scheduler = Scheduler::new(self.engine(self.open_store()?));
        let (sender, receiver) = broadcast::channel(4);

        let run = scheduler.run(receiver);
        tokio::pin!(run);

        tokio::select! {
            () = &mut run => return Ok(()),
            result = shutdown_signal() => result?,
        }

        sender.send(Signal::Shutdown)?;

        tokio::select! {
            () = run => {}
            _ = tokio::signal::ctrl_c() => {
                internal!(level = WARN, "Forcing shutdown");
            }
        }

        internal!("Shutting down...");
        Ok(())
    }
}
