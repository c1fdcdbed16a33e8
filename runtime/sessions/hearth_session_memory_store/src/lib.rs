//! An in-memory session store for `hearth_session`, geared towards testing and local development.
use hearth_session::{
    Clock, SessionData, SessionId,
    store::{
        SessionRecord, SessionRecordRef, SessionStorageBackend,
        errors::{DeleteError, DeleteExpiredError, LoadError, SaveError},
    },
};
use jiff::Timestamp;
use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};
use tokio::sync::Mutex;

#[derive(Clone)]
/// An in-memory session store.
///
/// # Limitations
///
/// This store won't persist data between server restarts.
/// It also won't synchronize data between multiple server instances.
/// It is primarily intended for testing and local development.
pub struct InMemorySessionStore {
    records: Arc<Mutex<HashMap<SessionId, StoreRecord>>>,
    clock: Clock,
}

impl std::fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySessionStore")
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct StoreRecord {
    data: SessionData,
    expires_at: Timestamp,
}

impl StoreRecord {
    fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionStore {
    /// Creates a new (empty) in-memory session store, using the system clock
    /// to decide if a record has expired.
    pub fn new() -> Self {
        Self::with_clock(Clock::system())
    }

    /// Creates a new (empty) in-memory session store that uses the provided clock
    /// to decide if a record has expired.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// The number of records currently held in memory, expired ones included.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// `true` if the store holds no records, expired ones included.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionStorageBackend for InMemorySessionStore {
    /// Loads a session record from the store using the provided ID.
    ///
    /// Expired records are removed on sight.
    #[tracing::instrument(name = "Load server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn get(&self, id: &SessionId) -> Result<Option<SessionRecord>, LoadError> {
        let mut guard = self.records.lock().await;
        let now = self.clock.now();
        let Some(record) = guard.get(id) else {
            return Ok(None);
        };
        if record.is_expired(now) {
            guard.remove(id);
            return Ok(None);
        }
        Ok(Some(SessionRecord {
            data: record.data.clone(),
            expires_at: record.expires_at,
        }))
    }

    /// Creates or overwrites the session record associated with the provided ID.
    ///
    /// Writing an already expired record removes the existing one, if any.
    #[tracing::instrument(name = "Save server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn set(&self, id: &SessionId, record: SessionRecordRef<'_>) -> Result<(), SaveError> {
        let mut guard = self.records.lock().await;
        if record.is_expired(self.clock.now()) {
            guard.remove(id);
            return Ok(());
        }
        guard.insert(
            id.to_owned(),
            StoreRecord {
                data: record.data.into_owned(),
                expires_at: record.expires_at,
            },
        );
        Ok(())
    }

    /// Deletes a session record from the store using the provided ID.
    #[tracing::instrument(name = "Delete server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn delete(&self, id: &SessionId) -> Result<(), DeleteError> {
        self.records.lock().await.remove(id);
        Ok(())
    }

    /// Delete all expired records from the store.
    #[tracing::instrument(name = "Delete expired records", level = tracing::Level::TRACE, skip_all)]
    async fn delete_expired(
        &self,
        batch_size: Option<NonZeroUsize>,
    ) -> Result<usize, DeleteExpiredError> {
        let mut guard = self.records.lock().await;
        let now = self.clock.now();
        let mut stale_ids = Vec::new();
        for (id, record) in guard.iter() {
            if record.is_expired(now) {
                stale_ids.push(id.to_owned());
                if let Some(batch_size) = batch_size {
                    if stale_ids.len() >= batch_size.get() {
                        break;
                    }
                }
            }
        }
        let num_deleted = stale_ids.len();
        for id in stale_ids {
            guard.remove(&id);
        }
        Ok(num_deleted)
    }
}
