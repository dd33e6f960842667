//! Outbound transports
//!
//! A [`Transport`] opens [`Connection`]s; a connection sends one message at a
//! time and may be reused for many. Failures carry an [`ErrorKind`] so callers
//! can decide what to retry without knowing which transport produced them.

pub mod error;
pub mod memory;
pub mod smtp;
mod transport;

pub use error::{ErrorKind, Result, TransportError};
pub use memory::MemoryTransport;
pub use smtp::{SmtpConfig, SmtpTimeouts, SmtpTransport};
pub use transport::{Connection, Transport};
