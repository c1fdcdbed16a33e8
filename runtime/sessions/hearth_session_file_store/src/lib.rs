//! A session store for `hearth_session` that keeps every record in a single JSON file.
//!
//! # Limitations
//!
//! Every operation reads (and possibly rewrites) the whole file, and operations
//! are serialized through a single queue. This store is a good fit for
//! local development, small deployments and tests. It won't synchronize
//! data between multiple server instances.
use hearth_session::{
    Clock, SessionData, SessionId,
    store::{
        SessionRecord, SessionRecordRef, SessionStorageBackend,
        errors::{DeleteError, DeleteExpiredError, LoadError, SaveError},
    },
};
use jiff::Timestamp;
use queue::OperationQueue;
use std::{
    collections::BTreeMap,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing_log_error::log_error;

mod queue;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configuration for [`FileSessionStore`].
pub struct FileSessionStoreConfig {
    /// The file holding the session records.
    ///
    /// It is created on the first write if it doesn't exist.
    /// Its parent directory must exist.
    pub path: PathBuf,
}

impl FileSessionStoreConfig {
    /// Create a new configuration for a store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
/// The error returned by [`FileSessionStore::new`] when the configuration can't be used.
pub enum InvalidFileStoreConfig {
    #[error("The path of the session file can't be empty")]
    EmptyPath,
    #[error("The path of the session file points to a directory: {path}")]
    IsADirectory { path: PathBuf },
}

#[derive(Debug, Clone)]
/// A session store backed by a single JSON file.
///
/// The file contains one JSON object, keyed by session id:
///
/// ```json
/// { "<id>": { "data": { "user.id": "ada" }, "expires_at": 1704067200000 } }
/// ```
///
/// where `expires_at` is expressed in milliseconds since the Unix epoch.
///
/// All clones share the same operation queue: operations are executed one at
/// a time, in the order they were submitted.
/// Writes go to a temporary sibling file which is then renamed over the target,
/// so the file is never left half-written.
pub struct FileSessionStore {
    path: PathBuf,
    queue: Arc<OperationQueue>,
    clock: Clock,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StoredRecord {
    data: SessionData,
    expires_at: i64,
}

/// The in-memory view of the file, restricted to the records that could be decoded.
type Document = BTreeMap<String, StoredRecord>;

impl FileSessionStore {
    /// Creates a new store backed by the file at `path`, using the system clock.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, InvalidFileStoreConfig> {
        Self::from_config(FileSessionStoreConfig::new(path))
    }

    /// Creates a new store from its configuration, using the system clock.
    pub fn from_config(config: FileSessionStoreConfig) -> Result<Self, InvalidFileStoreConfig> {
        let path = config.path;
        if path.as_os_str().is_empty() {
            return Err(InvalidFileStoreConfig::EmptyPath);
        }
        if path.is_dir() {
            return Err(InvalidFileStoreConfig::IsADirectory { path });
        }
        Ok(Self {
            path,
            queue: Arc::new(OperationQueue::default()),
            clock: Clock::system(),
        })
    }

    /// Use the provided clock to decide if a record has expired.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The file backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Document, anyhow::Error> {
        let raw = match fs_err::tokio::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Document::new());
        }
        let entries: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                log_error!(
                    e,
                    level: tracing::Level::WARN,
                    "The session file is not a valid JSON document. Treating it as empty"
                );
                return Ok(Document::new());
            }
        };
        let mut document = Document::new();
        for (id, entry) in entries {
            match serde_json::from_value::<StoredRecord>(entry) {
                Ok(record) => {
                    document.insert(id, record);
                }
                Err(e) => {
                    log_error!(
                        e,
                        level: tracing::Level::WARN,
                        "Dropping a session record that can't be decoded"
                    );
                }
            }
        }
        Ok(document)
    }

    async fn write_document(&self, document: &Document) -> Result<(), anyhow::Error> {
        let contents = serde_json::to_vec(document)?;
        let temporary = self.temporary_path();
        fs_err::tokio::write(&temporary, contents).await?;
        fs_err::tokio::rename(&temporary, &self.path).await?;
        Ok(())
    }

    fn temporary_path(&self) -> PathBuf {
        let mut file_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        file_name.push(".tmp");
        self.path.with_file_name(file_name)
    }
}

impl StoredRecord {
    /// `None` if the record has expired or its expiration can't be represented.
    fn into_live(self, now: Timestamp) -> Option<SessionRecord> {
        let expires_at = match Timestamp::from_millisecond(self.expires_at) {
            Ok(expires_at) => expires_at,
            Err(e) => {
                log_error!(
                    e,
                    level: tracing::Level::WARN,
                    "Dropping a session record with an out-of-range expiration"
                );
                return None;
            }
        };
        let record = SessionRecord {
            data: self.data,
            expires_at,
        };
        (!record.is_expired(now)).then_some(record)
    }
}

impl FileSessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, anyhow::Error> {
        let mut document = self.read_document().await?;
        let Some(record) = document.remove(id.as_str()) else {
            return Ok(None);
        };
        match record.into_live(self.clock.now()) {
            Some(record) => Ok(Some(record)),
            None => {
                self.write_document(&document).await?;
                Ok(None)
            }
        }
    }

    async fn save(&self, id: &SessionId, record: StoredRecord) -> Result<(), anyhow::Error> {
        let mut document = self.read_document().await?;
        if record.expires_at <= self.clock.now().as_millisecond() {
            document.remove(id.as_str());
        } else {
            document.insert(id.as_str().to_owned(), record);
        }
        self.write_document(&document).await
    }

    async fn remove(&self, id: &SessionId) -> Result<(), anyhow::Error> {
        let mut document = self.read_document().await?;
        if document.remove(id.as_str()).is_some() {
            self.write_document(&document).await?;
        }
        Ok(())
    }

    async fn remove_expired(&self, batch_size: Option<NonZeroUsize>) -> Result<usize, anyhow::Error> {
        let mut document = self.read_document().await?;
        let now = self.clock.now().as_millisecond();
        let limit = batch_size.map_or(usize::MAX, NonZeroUsize::get);
        let stale_ids: Vec<String> = document
            .iter()
            .filter(|(_, record)| record.expires_at <= now)
            .map(|(id, _)| id.to_owned())
            .take(limit)
            .collect();
        for id in &stale_ids {
            document.remove(id);
        }
        if !stale_ids.is_empty() {
            self.write_document(&document).await?;
        }
        Ok(stale_ids.len())
    }
}

#[async_trait::async_trait]
impl SessionStorageBackend for FileSessionStore {
    /// Loads a session record from the file.
    ///
    /// Expired records are removed from the file on sight.
    #[tracing::instrument(name = "Load server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn get(&self, id: &SessionId) -> Result<Option<SessionRecord>, LoadError> {
        self.queue.run(self.load(id)).await.map_err(LoadError::Other)
    }

    /// Creates or overwrites the session record associated with the provided ID.
    ///
    /// Writing an already expired record removes the existing one, if any.
    #[tracing::instrument(name = "Save server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn set(&self, id: &SessionId, record: SessionRecordRef<'_>) -> Result<(), SaveError> {
        let record = StoredRecord {
            data: record.data.into_owned(),
            expires_at: record.expires_at.as_millisecond(),
        };
        self.queue
            .run(self.save(id, record))
            .await
            .map_err(SaveError::Other)
    }

    /// Deletes the session record associated with the provided ID, if any.
    #[tracing::instrument(name = "Delete server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn delete(&self, id: &SessionId) -> Result<(), DeleteError> {
        self.queue.run(self.remove(id)).await.map_err(DeleteError::Other)
    }

    /// Delete expired records from the file.
    #[tracing::instrument(name = "Delete expired records", level = tracing::Level::TRACE, skip_all)]
    async fn delete_expired(
        &self,
        batch_size: Option<NonZeroUsize>,
    ) -> Result<usize, DeleteExpiredError> {
        Ok(self.queue.run(self.remove_expired(batch_size)).await?)
    }
}
