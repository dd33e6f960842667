//! Errors from the SMTP client, before they are given a transport meaning.

use std::io;

use thiserror::Error;

use crate::{ErrorKind, TransportError};

#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    Parse(String),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl From<ClientError> for TransportError {
    fn from(err: ClientError) -> Self {
        let kind = match err {
            ClientError::Io(_) | ClientError::ConnectionClosed => ErrorKind::Socket,
            ClientError::Parse(_) | ClientError::Utf8(_) => ErrorKind::Protocol,
        };

        Self::new(kind, err.to_string())
    }
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
