//! Draining the outbound queue
//!
//! A drain pass takes the cross-process [`lock`], opens one transport
//! connection, snapshots the blacklist, and walks the queue block by block.
//! Each message is sent, skipped because its recipient is blacklisted, or
//! recorded as failed and possibly deferred according to the
//! [`RetryClassifier`]. The [`Scheduler`] runs passes forever, sleeping
//! while there is nothing to do. Deferred entries wait until
//! [`DeliveryEngine::retry_deferred`] makes them eligible again.

pub mod blacklist;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod policy;
pub mod scheduler;

pub use blacklist::BlacklistSnapshot;
pub use config::DeliveryConfig;
pub use engine::{DeliveryEngine, Drain, DrainSummary, Outcome, Retry};
pub use error::{DeliveryError, LockError};
pub use lock::{Acquire, FileLock, LockGuard, MemoryLock, ProcessLock};
pub use policy::{Disposition, RetryClassifier};
pub use scheduler::{Scheduler, Tick};
