//! Typed error handling for delivery operations.
//!
//! Only failures that stop a whole pass are errors here. Lock contention is
//! an ordinary [`crate::Acquire`] outcome, and a message the transport
//! refuses is an ordinary [`crate::Outcome::Failed`].

use std::{path::PathBuf, time::Duration};

use postbox_queue::StoreError;
use postbox_transport::TransportError;
use thiserror::Error;

/// An error that aborted a drain pass.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The queue store could not be read or written.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The process lock could not be created or taken.
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// No transport connection could be opened for the pass.
    #[error("Failed to open connection: {0}")]
    Connect(#[source] TransportError),

    /// The pass ran past its wall-clock budget.
    #[error("Pass exceeded its deadline of {0:?}")]
    Deadline(Duration),
}

/// Failure to use the lock file itself.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Unable to open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
