use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{FileQueueStore, MemoryQueueStore, QueueStore};

/// Which queue store backs the queue
///
/// File-backed store in RON config:
/// ```ron
/// Postbox (
///     store: File(
///         path: "/var/spool/postbox",
///     ),
/// )
/// ```
///
/// Memory-backed store for testing:
/// ```ron
/// Postbox (
///     store: Memory,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum StoreConfig {
    /// File-based store (production)
    File {
        #[serde(default = "default_path")]
        path: PathBuf,
    },
    /// Memory-based store (testing/development)
    Memory,
}

fn default_path() -> PathBuf {
    PathBuf::from("/var/spool/postbox")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File {
            path: default_path(),
        }
    }
}

impl StoreConfig {
    /// Filesystem path for file-backed stores
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File { path } => Some(path),
            Self::Memory => None,
        }
    }

    /// Build the configured store, creating its directories if needed
    ///
    /// # Errors
    /// If a file-backed store path is invalid or cannot be initialised
    pub fn into_store(self) -> crate::Result<Arc<dyn QueueStore>> {
        Ok(match self {
            Self::File { path } => Arc::new(FileQueueStore::open(path)?),
            Self::Memory => Arc::new(MemoryQueueStore::new()),
        })
    }
}
