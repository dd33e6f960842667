//! The outbound mail queue
//!
//! Stores messages, their pending-delivery state, the recipient blacklist and
//! the delivery log behind the [`QueueStore`] trait, and reads pending entries
//! in bounded blocks through [`BlockCursor`].

pub mod backends;
pub mod config;
pub mod cursor;
pub mod error;
pub mod store;

pub use backends::{FileQueueStore, MemoryQueueStore};
pub use config::StoreConfig;
pub use cursor::BlockCursor;
pub use error::{Result, SerializationError, StoreError, ValidationError};
pub use store::QueueStore;
