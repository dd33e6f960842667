use async_trait::async_trait;
use postbox_common::Message;

/// Something that can open connections to deliver mail over
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Open a new connection
    ///
    /// # Errors
    /// If the connection could not be established
    async fn open(&self) -> crate::Result<Box<dyn Connection>>;
}

/// An open connection, reusable for any number of messages
///
/// Dropping a connection without calling [`Connection::close`] is allowed;
/// the remote end simply sees the connection go away.
#[async_trait]
pub trait Connection: Send + std::fmt::Debug {
    /// Deliver one message
    ///
    /// # Errors
    /// If the message was not accepted; the error's kind says why
    async fn send(&mut self, message: &Message) -> crate::Result<()>;

    /// Whether another [`Connection::send`] can succeed
    ///
    /// `false` once the session has been lost; the caller should close this
    /// connection and open a new one.
    fn is_usable(&self) -> bool {
        true
    }

    /// Politely end the connection; it must not be used afterwards
    ///
    /// # Errors
    /// If the connection could not be shut down cleanly
    async fn close(&mut self) -> crate::Result<()>;
}
