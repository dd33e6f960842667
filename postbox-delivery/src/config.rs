use std::{path::PathBuf, time::Duration};

use postbox_transport::ErrorKind;
use serde::Deserialize;

use crate::RetryClassifier;

mod defaults {
    use std::path::PathBuf;

    use postbox_transport::ErrorKind;

    pub fn lock_path() -> PathBuf {
        std::env::temp_dir().join("send_mail")
    }

    pub const fn empty_queue_sleep_secs() -> u64 {
        30
    }

    pub const fn block_size() -> usize {
        500
    }

    pub fn defer_on() -> Vec<ErrorKind> {
        vec![
            ErrorKind::Socket,
            ErrorKind::RecipientRefused,
            ErrorKind::SenderRefused,
            ErrorKind::Authentication,
        ]
    }

    #[allow(clippy::unnecessary_wraps, reason = "serde default functions return the field type")]
    pub const fn pass_deadline_secs() -> Option<u64> {
        Some(3600)
    }
}

/// How delivery passes behave
///
/// Built once at start-up and shared by reference with the engine and the
/// scheduler.
///
/// # Example Configuration
///
/// ```ron
/// delivery: (
///     lock_path: "/run/postbox/send_mail",
///     lock_wait_timeout_secs: 5.0,
///     block_size: 100,
///     defer_on: [Socket, RecipientRefused],
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeliveryConfig {
    /// File locked for the duration of a pass, so that only one process
    /// drains the queue at a time
    ///
    /// Default: `<temp dir>/send_mail`
    #[serde(default = "defaults::lock_path")]
    pub lock_path: PathBuf,

    /// How long to wait for another process to finish its pass
    ///
    /// Zero (or anything negative) gives up immediately.
    ///
    /// Default: 0
    #[serde(default)]
    pub lock_wait_timeout_secs: f64,

    /// How long the scheduler sleeps when there is nothing to send
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::empty_queue_sleep_secs")]
    pub empty_queue_sleep_secs: u64,

    /// Queue entries fetched per block; 0 fetches everything at once
    ///
    /// Default: 500
    #[serde(default = "defaults::block_size")]
    pub block_size: usize,

    /// Failure kinds that defer a message rather than leave it eligible
    ///
    /// Default: `[Socket, RecipientRefused, SenderRefused, Authentication]`
    #[serde(default = "defaults::defer_on")]
    pub defer_on: Vec<ErrorKind>,

    /// Skip delivery entirely
    ///
    /// Default: `false`
    #[serde(default)]
    pub pause_send: bool,

    /// Wall-clock budget for a single pass; `None` lets a pass run forever
    ///
    /// Default: 3600 seconds (1 hour)
    #[serde(default = "defaults::pass_deadline_secs")]
    pub pass_deadline_secs: Option<u64>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            lock_path: defaults::lock_path(),
            lock_wait_timeout_secs: 0.0,
            empty_queue_sleep_secs: defaults::empty_queue_sleep_secs(),
            block_size: defaults::block_size(),
            defer_on: defaults::defer_on(),
            pause_send: false,
            pass_deadline_secs: defaults::pass_deadline_secs(),
        }
    }
}

impl DeliveryConfig {
    /// The lock wait, with negative values treated as zero and infinity as
    /// waiting forever
    #[must_use]
    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.lock_wait_timeout_secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    #[must_use]
    pub const fn empty_queue_sleep(&self) -> Duration {
        Duration::from_secs(self.empty_queue_sleep_secs)
    }

    #[must_use]
    pub fn pass_deadline(&self) -> Option<Duration> {
        self.pass_deadline_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn classifier(&self) -> RetryClassifier {
        RetryClassifier::new(self.defer_on.iter().copied())
    }
}
