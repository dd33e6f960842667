//! Recipient blacklist checks
//!
//! A drain pass reads the blacklist once, up front, into a
//! [`BlacklistSnapshot`]. Addresses added while the pass is running are not
//! seen until the next pass; that staleness is the price of not querying the
//! store for every message.

use std::collections::HashSet;

use postbox_common::normalize_address;
use postbox_queue::{QueueStore, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlacklistSnapshot {
    addresses: HashSet<String>,
}

impl BlacklistSnapshot {
    pub fn new<'a>(addresses: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            addresses: addresses.into_iter().map(normalize_address).collect(),
        }
    }

    /// Read the whole blacklist from `store`
    ///
    /// # Errors
    /// If the store could not be read
    pub async fn load(store: &dyn QueueStore) -> Result<Self, StoreError> {
        let entries = store.blacklist().await?;
        Ok(Self::new(entries.iter().map(|entry| entry.email.as_str())))
    }

    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(&normalize_address(address))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Check `address` against `snapshot` if there is one, or against the store
/// as it is right now if not
///
/// # Errors
/// If there is no snapshot and the store could not be read
pub async fn is_blacklisted(
    store: &dyn QueueStore,
    address: &str,
    snapshot: Option<&BlacklistSnapshot>,
) -> Result<bool, StoreError> {
    match snapshot {
        Some(snapshot) => Ok(snapshot.contains(address)),
        None => store.is_blacklisted(address).await,
    }
}
