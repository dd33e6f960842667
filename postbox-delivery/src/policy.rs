//! Deciding what a failed send means for the queue entry.

use std::collections::HashSet;

use postbox_transport::{ErrorKind, TransportError};

/// What to do with a message whose send failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient: mark the entry deferred so it is left alone until
    /// something re-queues it.
    Defer,
    /// Leave the entry as it is. It is still eligible and will be tried
    /// again on the next pass.
    Permanent,
}

/// Maps failure kinds to a [`Disposition`].
///
/// The defer-worthy kinds come from configuration; every other kind is
/// permanent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryClassifier {
    defer_on: HashSet<ErrorKind>,
}

impl RetryClassifier {
    pub fn new(defer_on: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            defer_on: defer_on.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn classify(&self, error: &TransportError) -> Disposition {
        self.classify_kind(error.kind())
    }

    #[must_use]
    pub fn classify_kind(&self, kind: ErrorKind) -> Disposition {
        if self.defer_on.contains(&kind) {
            Disposition::Defer
        } else {
            Disposition::Permanent
        }
    }
}

impl Default for RetryClassifier {
    fn default() -> Self {
        crate::DeliveryConfig::default().classifier()
    }
}
