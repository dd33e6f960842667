use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a transport failure
///
/// The set is closed so that retry policy can be written down in
/// configuration as a list of kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Network failure: refused, reset, timed out, or closed early
    Socket,
    /// The server refused the envelope sender
    SenderRefused,
    /// The server refused the recipient
    RecipientRefused,
    /// The server rejected our credentials
    Authentication,
    /// The server refused the message content
    DataRejected,
    /// The server said something we could not make sense of
    Protocol,
    /// The message itself cannot be sent (unparseable address, etc.)
    InvalidMessage,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Socket => "Socket error",
            Self::SenderRefused => "Sender refused",
            Self::RecipientRefused => "Recipient refused",
            Self::Authentication => "Authentication failed",
            Self::DataRejected => "Data rejected",
            Self::Protocol => "Protocol error",
            Self::InvalidMessage => "Invalid message",
            Self::Other => "Transport error",
        })
    }
}

/// A failed transport operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct TransportError {
    kind: ErrorKind,
    detail: String,
}

impl TransportError {
    #[must_use]
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn socket(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Socket, detail)
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::socket(err.to_string())
    }
}

/// Specialized `Result` type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_detail() {
        let err = TransportError::new(ErrorKind::RecipientRefused, "550 No such user");
        assert_eq!(err.to_string(), "Recipient refused: 550 No such user");
        assert_eq!(err.kind(), ErrorKind::RecipientRefused);
        assert_eq!(err.detail(), "550 No such user");
    }

    #[test]
    fn test_io_errors_are_socket_errors() {
        let err = TransportError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(err.kind(), ErrorKind::Socket);
    }
}
