use crate::SessionData;
use crate::SessionId;
use crate::SessionManager;
use crate::state::{CommitMode, CommitPlan, SessionState};
use crate::store::SessionRecordRef;
use errors::{
    CommitError, RegenerateError, SessionDestroyedError, ValueDeserializationError,
    ValueSerializationError,
};
use jiff::Timestamp;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::borrow::Cow;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The current HTTP session.
///
/// It's built by [`SessionManager::start`], alongside the [`SessionCommit`]
/// that the integration layer must invoke once the request handler is done.
///
/// All reads and most mutations are synchronous and operate on the in-memory
/// state. The storage backend is only touched by [`update`](Self::update)
/// (no I/O of its own, but it awaits your updater), [`regenerate`](Self::regenerate),
/// [`destroy`](Self::destroy) and [`save`](Self::save).
///
/// # Destroyed sessions
///
/// After [`destroy`](Self::destroy), the session is terminal: mutations are ignored
/// and [`regenerate`](Self::regenerate) fails.
pub struct Session {
    inner: Arc<SessionInner>,
}

/// The end-of-request commit for a [`Session`].
///
/// It is deliberately not reachable from the [`Session`] handle:
/// only the code that started the session can commit it, and
/// [`commit`](Self::commit) consumes the value, so it runs at most once.
///
/// Dropping a `SessionCommit` without invoking [`commit`](Self::commit)
/// (e.g. because the request was cancelled) discards any pending change.
pub struct SessionCommit {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    state: Mutex<SessionState>,
    manager: SessionManager,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // The state is never left half-updated across a panic: each
        // operation mutates it through a single method call.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn commit(&self, mode: CommitMode) -> Result<(), CommitError> {
        let store = self.manager.store();
        let config = self.manager.config();
        let now = self.manager.clock().now();
        let plan = self.lock().plan_commit(mode, now, config, || {
            self.manager.id_generator().generate()
        });
        match &plan {
            CommitPlan::AlreadyCommitted => {
                tracing::trace!("The session has already been committed. This is a no-op.");
            }
            CommitPlan::Skip { .. } => {
                tracing::trace!("The session is unchanged, skipping the storage backend.");
            }
            CommitPlan::Delete { id: Some(id), .. } => {
                store.delete(id).await?;
            }
            CommitPlan::Delete { id: None, .. } => {
                tracing::trace!(
                    "The session was destroyed before being assigned an id. There is no record to delete."
                );
            }
            CommitPlan::Write {
                id,
                data,
                expires_at,
                ..
            } => {
                let record = SessionRecordRef {
                    data: Cow::Borrowed(data),
                    expires_at: *expires_at,
                };
                store.set(id, record).await?;
            }
        }
        self.lock().complete_commit(plan, mode, now, config);
        Ok(())
    }
}

impl Session {
    pub(crate) fn pair(state: SessionState, manager: SessionManager) -> (Session, SessionCommit) {
        let inner = Arc::new(SessionInner {
            state: Mutex::new(state),
            manager,
        });
        (
            Session {
                inner: inner.clone(),
            },
            SessionCommit { inner },
        )
    }

    /// The session identifier, if one has been assigned.
    ///
    /// It's `None` for lazily created sessions that haven't been saved yet.
    pub fn id(&self) -> Option<SessionId> {
        self.inner.lock().id().cloned()
    }

    /// `true` until the session has been written to the storage backend for the first time.
    ///
    /// It's reset to `true` by [`regenerate`](Self::regenerate).
    pub fn is_new(&self) -> bool {
        self.inner.lock().is_new()
    }

    /// `true` once [`destroy`](Self::destroy) has been invoked.
    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().is_destroyed()
    }

    /// When the session expires, as of its last write (or its creation, if it was never written).
    pub fn expires_at(&self) -> Timestamp {
        self.inner.lock().expires_at()
    }

    /// A snapshot of the session data.
    pub fn data(&self) -> SessionData {
        self.inner.lock().data().clone()
    }

    /// Get the value associated with `key`.
    ///
    /// If the value is not found, `None` is returned.
    /// If the value cannot be deserialized into the expected type, an error is returned.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ValueDeserializationError> {
        self.get_raw(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ValueDeserializationError {
                key: key.to_owned(),
                source: e,
            })
    }

    /// Get the raw JSON value associated with `key`.
    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.inner.lock().data().get(key).cloned()
    }

    /// `true` if there is a value associated with `key`.
    pub fn has(&self, key: &str) -> bool {
        self.inner.lock().data().contains_key(key)
    }

    /// Set a value for the given key.
    ///
    /// If the key already exists, the old raw value is returned.
    /// If the value cannot be serialized, an error is returned and the session is left unchanged.
    pub fn set<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Result<Option<Value>, ValueSerializationError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| ValueSerializationError {
            key: key.clone(),
            source: e,
        })?;
        Ok(self.set_raw(key, value))
    }

    /// Set a raw JSON value for the given key.
    ///
    /// If the key already exists, the old value is returned.
    pub fn set_raw(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.lock().set(key.into(), value)
    }

    /// Merge `partial` into the session data.
    ///
    /// Keys in `partial` overwrite existing ones; other keys are left untouched.
    pub fn assign(&self, partial: SessionData) {
        self.inner.lock().assign(partial)
    }

    /// Replace the whole session data with `data`.
    pub fn replace(&self, data: SessionData) {
        self.inner.lock().replace(data)
    }

    /// Compute the new session data from the current one.
    ///
    /// The updater receives a copy of the current data and may suspend (e.g. to
    /// query another service) before returning the replacement.
    pub async fn update<F, Fut>(&self, updater: F)
    where
        F: FnOnce(SessionData) -> Fut,
        Fut: Future<Output = SessionData>,
    {
        let current = {
            let state = self.inner.lock();
            if state.is_destroyed() {
                tracing::debug!("Tried to update a destroyed session. This is a no-op.");
                return;
            }
            state.data().clone()
        };
        let updated = updater(current).await;
        self.inner.lock().replace(updated);
    }

    /// Remove the value associated with `key`.
    ///
    /// If the key exists, the removed value is returned.
    pub fn delete(&self, key: &str) -> Option<Value> {
        self.inner.lock().delete(key)
    }

    /// Generate a new session identifier and attach it to this session.
    /// The session data is preserved.
    ///
    /// The record stored under the previous identifier, if any, is deleted
    /// right away. The data is written under the new identifier when the
    /// session is committed.
    ///
    /// This method is useful for security reasons, as it can help prevent
    /// session fixation attacks (e.g. invoke it right after a successful login).
    pub async fn regenerate(&self) -> Result<SessionId, RegenerateError> {
        if self.inner.lock().is_destroyed() {
            return Err(SessionDestroyedError.into());
        }
        let new_id = self.inner.manager.id_generator().generate();
        let previous = self.inner.lock().regenerate(new_id.clone())?;
        if let Some(previous) = previous {
            tracing::debug!("Deleting the session record stored under the previous session id");
            self.inner.manager.store().delete(&previous).await?;
        }
        Ok(new_id)
    }

    /// Destroy the session.
    ///
    /// The session record is deleted from the storage backend right away and
    /// the session cookie will be removed from the client.
    ///
    /// Destroying an already destroyed session is a no-op.
    pub async fn destroy(&self) -> Result<(), CommitError> {
        if !self.inner.lock().destroy() {
            return Ok(());
        }
        self.inner.commit(CommitMode::Destroy).await
    }

    /// Persist the session right away, whether it was modified or not.
    ///
    /// Changes applied after `save` are still picked up by the
    /// end-of-request commit.
    pub async fn save(&self) -> Result<(), CommitError> {
        self.inner.commit(CommitMode::Manual).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Session")
            .field("id", &state.id())
            .field("is_new", &state.is_new())
            .field("is_destroyed", &state.is_destroyed())
            .finish_non_exhaustive()
    }
}

impl SessionCommit {
    /// Reconcile the session with the storage backend.
    ///
    /// Returns the value of the `Set-Cookie` header to attach to the response, if any.
    ///
    /// In most cases, you don't need to invoke this method manually: it is done for you by
    /// [`finalize_session`](crate::finalize_session) and [`with_session`](crate::with_session).
    pub async fn commit(self) -> Result<Option<String>, CommitError> {
        self.inner.commit(CommitMode::Auto).await?;
        Ok(self.inner.lock().take_pending_cookie())
    }
}

impl std::fmt::Debug for SessionCommit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCommit").finish_non_exhaustive()
    }
}

/// Errors that can occur when interacting with the session.
pub mod errors {
    use crate::store::errors::{DeleteError, LoadError, SaveError};
    use http::StatusCode;

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned when the session state is synced with the storage backend,
    /// e.g. by [`Session::save`][super::Session::save] or [`SessionCommit::commit`][super::SessionCommit::commit].
    pub enum CommitError {
        #[error("Failed to save the session record")]
        SaveError(#[from] SaveError),
        #[error("Failed to delete the session record")]
        DeleteError(#[from] DeleteError),
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`Session::regenerate`][super::Session::regenerate].
    pub enum RegenerateError {
        #[error(transparent)]
        Destroyed(#[from] SessionDestroyedError),
        #[error("Failed to delete the session record stored under the previous id")]
        DeleteError(#[from] DeleteError),
    }

    #[derive(Debug, thiserror::Error)]
    #[error("The session has been destroyed")]
    /// The operation is not allowed because the session has been destroyed.
    pub struct SessionDestroyedError;

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("Failed to deserialize the value associated with `{key}`")]
    /// The error returned by [`Session::get`][super::Session::get].
    pub struct ValueDeserializationError {
        /// The key of the value that we failed to deserialize.
        pub key: String,
        #[source]
        /// The underlying deserialization error.
        pub source: serde_json::Error,
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("Failed to serialize the value associated with `{key}`")]
    /// The error returned by [`Session::set`][super::Session::set].
    pub struct ValueSerializationError {
        /// The key of the value that we failed to serialize.
        pub key: String,
        #[source]
        /// The underlying serialization error.
        pub source: serde_json::Error,
    }

    /// The error returned by [`finalize_session`][crate::finalize_session].
    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    pub enum FinalizeError {
        #[error("Failed to sync the session with the storage backend")]
        CommitError(#[from] CommitError),
        #[error("The session cookie is not a valid header value")]
        InvalidHeader(#[from] http::header::InvalidHeaderValue),
    }

    impl FinalizeError {
        /// Convert the error into a response.
        pub fn into_response<B: Default>(&self) -> http::Response<B> {
            internal_server_error()
        }
    }

    /// The error returned by [`with_session`][crate::with_session].
    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    pub enum WithSessionError {
        #[error("Failed to load the session record")]
        LoadError(#[from] LoadError),
        #[error(transparent)]
        FinalizeError(#[from] FinalizeError),
    }

    impl WithSessionError {
        /// Convert the error into a response.
        pub fn into_response<B: Default>(&self) -> http::Response<B> {
            internal_server_error()
        }
    }

    fn internal_server_error<B: Default>() -> http::Response<B> {
        let mut response = http::Response::new(B::default());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    }
}
