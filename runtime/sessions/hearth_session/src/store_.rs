use crate::SessionId;
use errors::{DeleteError, DeleteExpiredError, LoadError, SaveError};
use jiff::Timestamp;
use serde_json::Value;
use std::{borrow::Cow, collections::HashMap, num::NonZeroUsize};

/// The key-value pairs attached to a session.
pub type SessionData = HashMap<String, Value>;

/// Where server-side session records are stored.
///
/// It is a thin wrapper
/// [around your chosen storage backend implementation][`SessionStorageBackend`],
/// removing the need to specify the concrete type of the storage backend
/// everywhere in your code.
#[derive(Debug)]
pub struct SessionStore(Box<dyn SessionStorageBackend>);

impl SessionStore {
    /// Creates a new session store using the provided backend.
    pub fn new<Backend>(backend: Backend) -> Self
    where
        Backend: SessionStorageBackend + 'static,
    {
        Self(Box::new(backend))
    }

    /// Loads the session record associated with the provided ID.
    ///
    /// Returns `None` if there is no such record, or if it has expired.
    pub async fn get(&self, id: &SessionId) -> Result<Option<SessionRecord>, LoadError> {
        self.0.get(id).await
    }

    /// Creates or overwrites the session record associated with the provided ID.
    pub async fn set(&self, id: &SessionId, record: SessionRecordRef<'_>) -> Result<(), SaveError> {
        self.0.set(id, record).await
    }

    /// Deletes the session record associated with the provided ID.
    ///
    /// Deleting a record that doesn't exist is not an error.
    pub async fn delete(&self, id: &SessionId) -> Result<(), DeleteError> {
        self.0.delete(id).await
    }

    /// Deletes expired session records from the store.
    ///
    /// If `batch_size` is provided, at most `batch_size` records are deleted.
    /// Returns the number of deleted records.
    pub async fn delete_expired(
        &self,
        batch_size: Option<NonZeroUsize>,
    ) -> Result<usize, DeleteExpiredError> {
        self.0.delete_expired(batch_size).await
    }
}

#[async_trait::async_trait]
/// The interface of a session storage backend.
///
/// # Expiration
///
/// A record whose `expires_at` is not in the future must be treated as absent:
/// [`get`](Self::get) must never return it, and it should be reclaimed when encountered.
///
/// # Errors
///
/// "Not found" is never an error. Only genuine I/O failures should be reported.
/// Records that can't be decoded must be treated as absent and removed.
///
/// # Concurrency
///
/// A single backend instance is shared by every in-flight request.
/// Implementations are responsible for the atomicity of their own
/// read-modify-write sequences.
pub trait SessionStorageBackend: std::fmt::Debug + Send + Sync {
    /// Loads the session record associated with the provided ID.
    ///
    /// Returns `None` if there is no such record, or if it has expired.
    async fn get(&self, id: &SessionId) -> Result<Option<SessionRecord>, LoadError>;

    /// Creates or overwrites the session record associated with the provided ID.
    ///
    /// If the record has already expired, the backend may delete the key instead.
    async fn set(&self, id: &SessionId, record: SessionRecordRef<'_>) -> Result<(), SaveError>;

    /// Deletes the session record associated with the provided ID.
    ///
    /// Deleting a record that doesn't exist is not an error.
    async fn delete(&self, id: &SessionId) -> Result<(), DeleteError>;

    /// Deletes expired session records from the store.
    ///
    /// If `batch_size` is provided, at most `batch_size` records are deleted.
    /// Returns the number of deleted records.
    ///
    /// Backends with native expiration support can return `Ok(0)`.
    async fn delete_expired(
        &self,
        batch_size: Option<NonZeroUsize>,
    ) -> Result<usize, DeleteExpiredError>;
}

/// A session record that's going to be stored in the chosen storage backend.
#[derive(Debug, Clone)]
pub struct SessionRecordRef<'session> {
    /// The set of key-value pairs attached to a session.
    pub data: Cow<'session, SessionData>,
    /// When the record stops being valid.
    pub expires_at: Timestamp,
}

impl SessionRecordRef<'_> {
    /// `true` if the record is no longer valid at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

/// A session record that was retrieved from the chosen storage backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// The set of key-value pairs attached to a session.
    pub data: SessionData,
    /// When the record stops being valid.
    pub expires_at: Timestamp,
}

impl SessionRecord {
    /// `true` if the record is no longer valid at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    /// Borrow this record as a [`SessionRecordRef`].
    pub fn as_ref(&self) -> SessionRecordRef<'_> {
        SessionRecordRef {
            data: Cow::Borrowed(&self.data),
            expires_at: self.expires_at,
        }
    }
}

/// Errors that can occur when interacting with a session storage backend.
pub mod errors {
    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::get`][super::SessionStorageBackend::get].
    pub enum LoadError {
        /// Something went wrong when loading the session record.
        #[error("Something went wrong when loading the session record.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::set`][super::SessionStorageBackend::set].
    pub enum SaveError {
        /// Failed to serialize the session state.
        #[error("Failed to serialize the session state.")]
        SerializationError(#[from] serde_json::Error),
        /// Something else went wrong when saving the session record.
        #[error("Something went wrong when saving the session record.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::delete`][super::SessionStorageBackend::delete].
    pub enum DeleteError {
        /// Something went wrong when deleting the session record.
        #[error("Something went wrong when deleting the session record.")]
        Other(#[source] anyhow::Error),
    }

    #[derive(Debug, thiserror::Error)]
    #[error("Something went wrong when deleting expired session records.")]
    /// The error returned by [`SessionStorageBackend::delete_expired`][super::SessionStorageBackend::delete_expired].
    pub struct DeleteExpiredError(#[from] anyhow::Error);
}
