use std::{
    collections::HashSet,
    io,
    path::{Component, Path, PathBuf},
    time::SystemTime,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postbox_common::{
    BlacklistEntry, LogEntry, Message, MessageId, NewMessage, Priority, QueueEntry, QueuedMessage,
    internal,
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;

use crate::{SerializationError, StoreError, ValidationError, store::QueueStore};

const MESSAGES: &str = "messages";
const QUEUE: &str = "queue";
const DEFERRED: &str = "deferred";
const BLACKLIST: &str = "blacklist";
const LOG: &str = "log";

const TEMP_PREFIX: &str = ".tmp_";

const PRIORITIES: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

const fn rank(priority: Priority) -> u8 {
    match priority {
        Priority::High => 0,
        Priority::Normal => 1,
        Priority::Low => 2,
    }
}

/// Name of a queue row: `<rank>-<ulid>.bin`
fn queue_filename(priority: Priority, id: &MessageId) -> String {
    format!("{}-{}", rank(priority), id.filename())
}

fn parse_queue_filename(name: &str) -> Option<(u8, MessageId)> {
    let (rank, rest) = name.split_once('-')?;
    let rank = rank.parse::<u8>().ok().filter(|rank| *rank <= 2)?;
    Some((rank, MessageId::from_filename(rest)?))
}

fn is_missing(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
}

/// File-backed queue store
///
/// Each table is a directory under the store path and each row is a bincode
/// file:
///
/// ```text
/// /var/spool/postbox/
/// ├── messages/   Message rows as <ulid>.bin, never removed by delivery
/// ├── queue/      Eligible QueuedMessage rows as <rank>-<ulid>.bin
/// ├── deferred/   Deferred QueuedMessage rows, same names as queue/
/// ├── blacklist/  BlacklistEntry rows as <ulid>.bin
/// └── log/        LogEntry rows as <ulid>.bin, append only
/// ```
///
/// The rank is 0, 1 or 2 for high, normal and low priority, so sorting the
/// names of `queue/` gives delivery order without reading a row. Within a
/// priority, entries go out in ID order; the ID's timestamp is the enqueue
/// time to the millisecond.
///
/// Which directory a queue row is in decides whether it is deferred, and the
/// modification time of a row in `deferred/` is its deferral time. Deferring
/// is a single rename, so it can never recreate a row that was deleted.
///
/// Rows are written to a `.tmp_` file and renamed into place, so a reader
/// never sees a partial row and a crash leaves at most an orphaned temporary
/// file, which [`FileQueueStore::open`] removes. Deleting a queue row is a
/// single unlink.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    path: PathBuf,
}

impl FileQueueStore {
    /// Check that a store path is safe to use
    ///
    /// # Errors
    /// If the path contains `..`, is relative, or points into a system directory
    pub fn validate_path(path: &Path) -> Result<(), ValidationError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(ValidationError::ParentDirectory(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        for prefix in sensitive_prefixes {
            if path.starts_with(prefix) {
                return Err(ValidationError::SystemDirectory {
                    prefix: prefix.to_string(),
                    path: path.display().to_string(),
                });
            }
        }

        Ok(())
    }

    /// Open (creating if needed) a store rooted at `path`
    ///
    /// # Errors
    /// If the path fails validation, is not a directory, or the table
    /// directories cannot be created
    pub fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let store = Self { path: path.into() };
        Self::validate_path(&store.path)?;
        store.init()?;
        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init(&self) -> crate::Result<()> {
        internal!("Initialising queue store at {}", self.path.display());

        if self.path.try_exists()? && !self.path.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        let mut cleaned = 0;
        for table in [MESSAGES, QUEUE, DEFERRED, BLACKLIST, LOG] {
            let dir = self.path.join(table);
            std::fs::create_dir_all(&dir)?;

            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                    std::fs::remove_file(entry.path())?;
                    cleaned += 1;
                }
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned temporary files from the queue store"
            );
        }

        Ok(())
    }

    fn row_path(&self, table: &str, filename: &str) -> PathBuf {
        self.path.join(table).join(filename)
    }

    async fn write_row<T: Serialize + Sync>(
        &self,
        table: &str,
        filename: &str,
        value: &T,
    ) -> crate::Result<()> {
        let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(SerializationError::Encode)?;

        let temp = self.row_path(table, &format!("{TEMP_PREFIX}{filename}"));
        fs::write(&temp, bytes).await?;
        fs::rename(&temp, self.row_path(table, filename)).await?;

        Ok(())
    }

    async fn read_row<T: DeserializeOwned>(path: &Path) -> crate::Result<T> {
        let bytes = fs::read(path).await?;
        let (value, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(SerializationError::Decode)?;
        Ok(value)
    }

    /// Read every row of a table in ID order
    ///
    /// Rows removed between listing and reading are skipped, as they would
    /// be by a reader that listed a moment later.
    async fn read_table<T: DeserializeOwned>(&self, table: &str) -> crate::Result<Vec<T>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(self.path.join(table)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = entry.file_name().to_str().and_then(MessageId::from_filename) {
                ids.push(id);
            }
        }
        ids.sort();

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            match Self::read_row(&self.row_path(table, &id.filename())).await {
                Ok(row) => rows.push(row),
                Err(StoreError::Io(err)) if is_missing(&err) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(rows)
    }

    /// Names of the rows in `queue/` or `deferred/`, in delivery order
    async fn list_queue(&self, table: &str) -> crate::Result<Vec<(u8, MessageId, String)>> {
        let mut rows = Vec::new();
        let mut entries = fs::read_dir(self.path.join(table)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(name) = name.to_str()
                && let Some((rank, id)) = parse_queue_filename(name)
            {
                rows.push((rank, id, name.to_string()));
            }
        }
        rows.sort_unstable();

        Ok(rows)
    }

    /// Read a queue row, taking its deferral from the directory it is in
    ///
    /// `None` if the row is not there (any more).
    async fn read_queue_row(table: &str, path: &Path) -> crate::Result<Option<QueuedMessage>> {
        let mut queued: QueuedMessage = match Self::read_row(path).await {
            Ok(queued) => queued,
            Err(StoreError::Io(err)) if is_missing(&err) => return Ok(None),
            Err(err) => return Err(err),
        };

        queued.deferred_at = if table == DEFERRED {
            match fs::metadata(path).await {
                Ok(metadata) => Some(DateTime::<Utc>::from(metadata.modified()?)),
                Err(err) if is_missing(&err) => return Ok(None),
                Err(err) => return Err(err.into()),
            }
        } else {
            None
        };

        Ok(Some(queued))
    }

    async fn read_queued(&self, id: &MessageId) -> crate::Result<Option<QueuedMessage>> {
        for table in [QUEUE, DEFERRED] {
            for priority in PRIORITIES {
                let path = self.row_path(table, &queue_filename(priority, id));
                if let Some(queued) = Self::read_queue_row(table, &path).await? {
                    return Ok(Some(queued));
                }
            }
        }

        Ok(None)
    }

    async fn count_rows(&self, table: &str) -> crate::Result<usize> {
        Ok(self.list_queue(table).await?.len())
    }

    /// Set the deferral time of a row in `deferred/`
    async fn stamp(path: &Path, at: DateTime<Utc>) -> io::Result<()> {
        let file = fs::OpenOptions::new().write(true).open(path).await?;
        file.into_std().await.set_modified(SystemTime::from(at))
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn enqueue(
        &self,
        message: NewMessage,
        priority: Priority,
    ) -> crate::Result<QueuedMessage> {
        let message = Message::from_new(message);
        let queued = QueuedMessage::new(message.id, priority);

        if self.read_queued(&message.id).await?.is_some() {
            return Err(StoreError::AlreadyQueued(message.id));
        }

        // The message row goes first so a queue row never points at nothing
        self.write_row(MESSAGES, &message.id.filename(), &message)
            .await?;
        self.write_row(QUEUE, &queue_filename(priority, &message.id), &queued)
            .await?;

        internal!("Queued {} ({priority})", message.id);

        Ok(queued)
    }

    async fn message(&self, id: &MessageId) -> crate::Result<Message> {
        match Self::read_row(&self.row_path(MESSAGES, &id.filename())).await {
            Err(StoreError::Io(err)) if is_missing(&err) => Err(StoreError::NotFound(*id)),
            other => other,
        }
    }

    async fn queued(&self, id: &MessageId) -> crate::Result<Option<QueuedMessage>> {
        self.read_queued(id).await
    }

    async fn next_block(
        &self,
        limit: Option<usize>,
        exclude: &HashSet<MessageId>,
    ) -> crate::Result<Vec<QueueEntry>> {
        let mut block = Vec::new();

        for (_, id, name) in self.list_queue(QUEUE).await? {
            if limit.is_some_and(|limit| block.len() >= limit) {
                break;
            }

            if exclude.contains(&id) {
                continue;
            }

            let Some(queued) = Self::read_queue_row(QUEUE, &self.row_path(QUEUE, &name)).await?
            else {
                continue;
            };

            let message = self.message(&id).await?;
            block.push(QueueEntry { queued, message });
        }

        Ok(block)
    }

    async fn delete_queued(&self, id: &MessageId) -> crate::Result<()> {
        for table in [QUEUE, DEFERRED] {
            for priority in PRIORITIES {
                match fs::remove_file(self.row_path(table, &queue_filename(priority, id))).await {
                    Ok(()) => return Ok(()),
                    Err(err) if is_missing(&err) => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Err(StoreError::NotFound(*id))
    }

    async fn defer(&self, id: &MessageId, at: DateTime<Utc>) -> crate::Result<()> {
        for priority in PRIORITIES {
            let name = queue_filename(priority, id);
            let deferred = self.row_path(DEFERRED, &name);

            match fs::rename(self.row_path(QUEUE, &name), &deferred).await {
                Ok(()) => {}
                Err(err) if is_missing(&err) => continue,
                Err(err) => return Err(err.into()),
            }

            return match Self::stamp(&deferred, at).await {
                Ok(()) => Ok(()),
                Err(err) if is_missing(&err) => Err(StoreError::NotFound(*id)),
                Err(err) => Err(err.into()),
            };
        }

        // Already deferred, so only the deferral time moves
        for priority in PRIORITIES {
            match Self::stamp(&self.row_path(DEFERRED, &queue_filename(priority, id)), at).await {
                Ok(()) => return Ok(()),
                Err(err) if is_missing(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Err(StoreError::NotFound(*id))
    }

    async fn retry_deferred(&self, max_retries: Option<u32>) -> crate::Result<usize> {
        let mut retried = 0;

        for (_, id, name) in self.list_queue(DEFERRED).await? {
            let deferred = self.row_path(DEFERRED, &name);
            let Some(mut queued) = Self::read_queue_row(DEFERRED, &deferred).await? else {
                continue;
            };

            if max_retries.is_some_and(|max| queued.retries >= max) {
                continue;
            }

            match fs::rename(&deferred, self.row_path(QUEUE, &name)).await {
                Ok(()) => {}
                Err(err) if is_missing(&err) => continue,
                Err(err) => return Err(err.into()),
            }

            queued.retries += 1;
            queued.deferred_at = None;
            self.write_row(QUEUE, &name, &queued).await?;

            internal!("Retrying {id} (attempt {})", queued.retries);
            retried += 1;
        }

        Ok(retried)
    }

    async fn count_queued(&self) -> crate::Result<usize> {
        Ok(self.count_rows(QUEUE).await? + self.count_rows(DEFERRED).await?)
    }

    async fn count_eligible(&self) -> crate::Result<usize> {
        self.count_rows(QUEUE).await
    }

    async fn blacklist(&self) -> crate::Result<Vec<BlacklistEntry>> {
        self.read_table(BLACKLIST).await
    }

    async fn add_to_blacklist(&self, address: &str) -> crate::Result<BlacklistEntry> {
        let entry = BlacklistEntry::new(address);
        self.write_row(
            BLACKLIST,
            &MessageId::new(entry.id).filename(),
            &entry,
        )
        .await?;

        Ok(entry)
    }

    async fn append_log(&self, entry: &LogEntry) -> crate::Result<()> {
        self.write_row(LOG, &MessageId::new(entry.id).filename(), entry)
            .await
    }

    async fn logs(&self, message: Option<&MessageId>) -> crate::Result<Vec<LogEntry>> {
        let mut logs: Vec<LogEntry> = self.read_table(LOG).await?;
        if let Some(id) = message {
            logs.retain(|entry| entry.message_id == *id);
        }

        // IDs minted within the same millisecond are not ordered
        logs.sort_by_key(|entry| (entry.date, entry.id));

        Ok(logs)
    }
}
