//! Delivery log records
//!
//! One record is appended for every decision the delivery engine makes about
//! a message. Records are never updated or removed by the engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MessageId;

/// Outcome recorded against a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogResult {
    /// Handed to the transport successfully
    Sent,
    /// Not sent because the recipient is blacklisted
    Skipped,
    /// The transport refused or errored
    Failed,
}

impl fmt::Display for LogResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sent => "success",
            Self::Skipped => "not sent (blacklisted)",
            Self::Failed => "failure",
        })
    }
}

/// An append-only delivery log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique per record; the file-backed store names the row after it
    pub id: ulid::Ulid,
    pub message_id: MessageId,
    pub result: LogResult,
    pub date: DateTime<Utc>,
    pub detail: String,
}

impl LogEntry {
    #[must_use]
    pub fn new(message_id: MessageId, result: LogResult, detail: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new(),
            message_id,
            result,
            date: Utc::now(),
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn sent(message_id: MessageId) -> Self {
        Self::new(message_id, LogResult::Sent, "Sent")
    }

    #[must_use]
    pub fn skipped(message_id: MessageId, address: &str) -> Self {
        Self::new(
            message_id,
            LogResult::Skipped,
            format!("Recipient {address} is blacklisted"),
        )
    }

    #[must_use]
    pub fn failed(message_id: MessageId, detail: impl Into<String>) -> Self {
        Self::new(message_id, LogResult::Failed, detail)
    }
}
