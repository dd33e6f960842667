use chrono::Utc;
use postbox_common::{LogEntry, Message, MessageId, QueueEntry};
use postbox_queue::StoreError;
use postbox_transport::{Connection, TransportError};

use super::{DeliveryEngine, Outcome};
use crate::{BlacklistSnapshot, DeliveryError, Disposition, blacklist};

impl DeliveryEngine<'_> {
    /// Decide the fate of one queue entry
    ///
    /// A blacklisted recipient is skipped without contacting the transport.
    /// Otherwise the message is sent over `connection`, or over a connection
    /// opened and closed just for it when there is none. Sent and skipped
    /// entries are removed from the queue before this returns; a failed entry
    /// is deferred if the failure is transient and left alone otherwise.
    /// Every call appends exactly one delivery log record.
    ///
    /// Without a `snapshot` the blacklist is checked live.
    ///
    /// # Errors
    /// Only if the queue store fails; transport failures are an
    /// [`Outcome::Failed`]
    #[tracing::instrument(level = "debug", skip_all, fields(id = %entry.id()))]
    pub async fn deliver(
        &self,
        entry: &QueueEntry,
        connection: Option<&mut dyn Connection>,
        snapshot: Option<&BlacklistSnapshot>,
    ) -> Result<Outcome, DeliveryError> {
        let id = entry.id();
        let message = &entry.message;

        if blacklist::is_blacklisted(self.store(), &message.to_address, snapshot).await? {
            self.remove_queued(&id).await?;
            self.store
                .append_log(&LogEntry::skipped(id, &message.to_address))
                .await?;
            tracing::info!(
                "Not sending to blacklisted recipient {}",
                message.to_address
            );
            return Ok(Outcome::Skipped);
        }

        let result = match connection {
            Some(connection) => connection.send(message).await,
            None => self.send_alone(message).await,
        };

        match result {
            Ok(()) => {
                self.remove_queued(&id).await?;
                self.store.append_log(&LogEntry::sent(id)).await?;
                tracing::info!("Sent {message}");
                Ok(Outcome::Sent)
            }
            Err(err) => self.failed(id, message, &err).await,
        }
    }

    async fn send_alone(&self, message: &Message) -> Result<(), TransportError> {
        let mut connection = self.transport.open().await?;
        let result = connection.send(message).await;

        if let Err(err) = connection.close().await {
            tracing::debug!("Failed to close connection: {err}");
        }

        result
    }

    async fn failed(
        &self,
        id: MessageId,
        message: &Message,
        err: &TransportError,
    ) -> Result<Outcome, DeliveryError> {
        let deferred = self.classifier.classify(err) == Disposition::Defer;

        if deferred {
            match self.store.defer(&id, Utc::now()).await {
                Err(StoreError::NotFound(_)) => {
                    tracing::warn!("Queue entry for {id} vanished before it could be deferred");
                }
                other => other?,
            }
            tracing::warn!(
                "Message to {} deferred due to failure: {err}",
                message.to_address
            );
        } else {
            tracing::warn!("Message to {} failed: {err}", message.to_address);
        }

        self.store
            .append_log(&LogEntry::failed(id, err.to_string()))
            .await?;

        Ok(Outcome::Failed { deferred })
    }

    /// Delete a queue entry, tolerating one that someone else already removed
    async fn remove_queued(&self, id: &MessageId) -> Result<(), DeliveryError> {
        match self.store.delete_queued(id).await {
            Err(StoreError::NotFound(_)) => {
                tracing::warn!("Queue entry for {id} was already removed");
                Ok(())
            }
            other => Ok(other?),
        }
    }
}
