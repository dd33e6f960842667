//! Messages and their pending-delivery state

use std::{
    cmp::Ordering,
    fmt,
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier for a stored message
///
/// A ULID, so identifiers sort by creation time and double as file names in
/// the file-backed store. A [`QueuedMessage`] shares the identifier of the
/// [`Message`] it refers to, which is what keeps the two one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    id: ulid::Ulid,
}

impl MessageId {
    /// Generate a new unique message ID
    ///
    /// IDs generated by one process are strictly increasing, even within the
    /// same millisecond.
    #[must_use]
    pub fn generate() -> Self {
        static GENERATOR: Mutex<ulid::Generator> = Mutex::new(ulid::Generator::new());

        let mut generator = GENERATOR.lock().unwrap_or_else(PoisonError::into_inner);
        Self {
            id: generator.generate().unwrap_or_else(|_| ulid::Ulid::new()),
        }
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Parse an ID from a row file name such as `01ARZ3NDEKTSV4RRFFQ69G5FAV.bin`
    ///
    /// Anything that is not exactly a ULID followed by `.bin` is rejected, so
    /// stray files (and path tricks) in a store directory are never read.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(".bin")?;
        ulid::Ulid::from_string(stem).ok().map(Self::new)
    }

    /// The file name this ID is stored under
    #[must_use]
    pub fn filename(&self) -> String {
        format!("{}.bin", self.id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl std::str::FromStr for MessageId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self::new)
    }
}

impl Serialize for MessageId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

/// Delivery priority of a queued message
///
/// Declaration order is delivery order: `High` sorts first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        })
    }
}

/// The content of a message as handed to the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub to_address: String,
    pub from_address: String,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
}

impl NewMessage {
    #[must_use]
    pub fn new(
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            to_address: to_address.into(),
            from_address: from_address.into(),
            subject: subject.into(),
            body: body.into(),
            html_body: None,
        }
    }

    /// Attach an HTML alternative to the plain text body
    #[must_use]
    pub fn with_html(mut self, html_body: impl Into<String>) -> Self {
        self.html_body = Some(html_body.into());
        self
    }
}

/// A stored message
///
/// Immutable once stored. The message outlives its queue entry so that the
/// delivery log always has something to point at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub to_address: String,
    pub from_address: String,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Assign an identifier and creation time to new message content
    #[must_use]
    pub fn from_new(message: NewMessage) -> Self {
        Self {
            id: MessageId::generate(),
            to_address: message.to_address,
            from_address: message.from_address,
            subject: message.subject,
            body: message.body,
            html_body: message.html_body,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn has_html(&self) -> bool {
        self.html_body.is_some()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.to_address, self.subject)
    }
}

/// Pending-delivery state of a [`Message`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub message_id: MessageId,
    pub priority: Priority,
    /// When the message was deferred; `None` means eligible now
    pub deferred_at: Option<DateTime<Utc>>,
    pub retries: u32,
    pub queued_at: DateTime<Utc>,
}

impl QueuedMessage {
    #[must_use]
    pub fn new(message_id: MessageId, priority: Priority) -> Self {
        Self {
            message_id,
            priority,
            deferred_at: None,
            retries: 0,
            queued_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        self.deferred_at.is_some()
    }

    /// Mark this entry as temporarily ineligible for delivery
    pub fn defer(&mut self, at: DateTime<Utc>) {
        self.deferred_at = Some(at);
    }

    /// Delivery order: priority, then oldest first, then ID as a tie-breaker
    #[must_use]
    pub fn delivery_order(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.queued_at.cmp(&other.queued_at))
            .then_with(|| self.message_id.cmp(&other.message_id))
    }
}

/// A queue entry joined with the message it refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub queued: QueuedMessage,
    pub message: Message,
}

impl QueueEntry {
    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.queued.message_id
    }
}
