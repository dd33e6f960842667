//! Shared types for the postbox mail queue
//!
//! Everything the queue store, the transports and the delivery engine need
//! to agree on lives here: the persisted data model and the logging setup.

pub mod audit;
pub mod blacklist;
pub mod logging;
pub mod message;

pub use audit::{LogEntry, LogResult};
pub use blacklist::{BlacklistEntry, normalize_address};
pub use message::{Message, MessageId, NewMessage, Priority, QueueEntry, QueuedMessage};
pub use tracing;

/// Broadcast to long-running tasks by the process controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
