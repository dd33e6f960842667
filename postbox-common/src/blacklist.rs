use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An address barred from delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub id: ulid::Ulid,
    pub email: String,
    pub added_at: DateTime<Utc>,
}

impl BlacklistEntry {
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new(),
            email: email.into(),
            added_at: Utc::now(),
        }
    }
}

/// Canonical form of an address for blacklist comparisons
///
/// `Name <user@example.com>` becomes `user@example.com`; the result is
/// trimmed and ASCII-lowercased.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    let bare = mailparse::addrparse(address)
        .ok()
        .and_then(|list| list.extract_single_info())
        .map_or_else(|| address.trim().to_string(), |info| info.addr);

    bare.trim().to_ascii_lowercase()
}
