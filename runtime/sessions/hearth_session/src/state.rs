//! The per-request session state machine.
//!
//! [`SessionState`] is plain data plus the decision logic for the commit step.
//! It never performs I/O: [`SessionState::plan_commit`] decides what must happen
//! to the store, the caller performs the I/O, and [`SessionState::complete_commit`]
//! records the outcome. No lock is held while the store is being accessed.
use crate::clock::deadline;
use crate::config::SessionConfig;
use crate::cookie::{serialize_removal_cookie, serialize_session_cookie};
use crate::errors::SessionDestroyedError;
use crate::{SessionData, SessionId};
use jiff::Timestamp;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What triggered a commit.
pub(crate) enum CommitMode {
    /// The end-of-request commit.
    Auto,
    /// An explicit `save()` from the request handler.
    Manual,
    /// `destroy()`, which commits immediately.
    Destroy,
}

#[derive(Debug)]
/// The store operation a commit requires.
pub(crate) enum CommitPlan {
    /// A terminal commit already ran for this request.
    AlreadyCommitted,
    /// Nothing to write or delete.
    Skip { revision: u64 },
    /// The session was destroyed: its record (if any) must go.
    Delete {
        id: Option<SessionId>,
        clear_cookie: bool,
        revision: u64,
    },
    /// The session must be persisted under `id`.
    Write {
        id: SessionId,
        data: SessionData,
        expires_at: Timestamp,
        revision: u64,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct SessionState {
    id: Option<SessionId>,
    data: SessionData,
    expires_at: Timestamp,
    is_new: bool,
    destroyed: bool,
    revision: u64,
    saved_revision: u64,
    committed: bool,
    /// The request carried an id that resolved to a live record.
    loaded: bool,
    /// An id was assigned during this request (eagerly, lazily or by `regenerate`).
    id_assigned: bool,
    /// A write already refreshed the record's expiry during this request.
    refreshed: bool,
    /// The `Set-Cookie` value to send back, if any. Later commits overwrite it.
    pending_cookie: Option<String>,
}

impl SessionState {
    /// A session resumed from a record found in the store.
    pub(crate) fn loaded(id: SessionId, data: SessionData, expires_at: Timestamp) -> Self {
        Self {
            id: Some(id),
            data,
            expires_at,
            is_new: false,
            destroyed: false,
            revision: 0,
            saved_revision: 0,
            committed: false,
            loaded: true,
            id_assigned: false,
            refreshed: false,
            pending_cookie: None,
        }
    }

    /// A brand-new session.
    ///
    /// `id` is `None` for lazily created sessions: the identifier is only
    /// materialized when the session is first written.
    pub(crate) fn fresh(id: Option<SessionId>, data: SessionData, expires_at: Timestamp) -> Self {
        Self {
            id_assigned: id.is_some(),
            id,
            data,
            expires_at,
            is_new: true,
            destroyed: false,
            revision: 0,
            saved_revision: 0,
            committed: false,
            loaded: false,
            refreshed: false,
            pending_cookie: None,
        }
    }

    /// Queue a removal cookie, e.g. because the client presented an unknown or expired id.
    pub(crate) fn schedule_removal_cookie(&mut self, cookie: String) {
        self.pending_cookie = Some(cookie);
    }

    pub(crate) fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    pub(crate) fn data(&self) -> &SessionData {
        &self.data
    }

    pub(crate) fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    pub(crate) fn is_new(&self) -> bool {
        self.is_new
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.revision != self.saved_revision
    }

    pub(crate) fn take_pending_cookie(&mut self) -> Option<String> {
        self.pending_cookie.take()
    }

    /// Apply `mutation` to the session data, unless the session has been destroyed.
    fn mutate<T>(&mut self, operation: &str, mutation: impl FnOnce(&mut SessionData) -> T) -> Option<T> {
        if self.destroyed {
            tracing::debug!(
                session.operation = operation,
                "Ignored a mutation on a destroyed session"
            );
            return None;
        }
        let outcome = mutation(&mut self.data);
        self.revision += 1;
        Some(outcome)
    }

    /// Insert `value` under `key`, returning the previous value.
    pub(crate) fn set(&mut self, key: String, value: Value) -> Option<Value> {
        self.mutate("set", |data| data.insert(key, value)).flatten()
    }

    /// Merge `partial` into the session data, key by key.
    pub(crate) fn assign(&mut self, partial: SessionData) {
        self.mutate("assign", |data| data.extend(partial));
    }

    /// Swap the whole session data for `data`.
    pub(crate) fn replace(&mut self, data: SessionData) {
        self.mutate("replace", |current| *current = data);
    }

    /// Remove `key`, returning its value.
    pub(crate) fn delete(&mut self, key: &str) -> Option<Value> {
        self.mutate("delete", |data| data.remove(key)).flatten()
    }

    /// Start a new identity epoch under `new_id`.
    ///
    /// Returns the previous id, whose record must be deleted by the caller.
    pub(crate) fn regenerate(
        &mut self,
        new_id: SessionId,
    ) -> Result<Option<SessionId>, SessionDestroyedError> {
        if self.destroyed {
            return Err(SessionDestroyedError);
        }
        let previous = self.id.replace(new_id);
        self.id_assigned = true;
        self.is_new = true;
        self.revision += 1;
        Ok(previous.filter(|previous| Some(previous) != self.id.as_ref()))
    }

    /// Mark the session as destroyed.
    ///
    /// Returns `false` if it was already destroyed.
    pub(crate) fn destroy(&mut self) -> bool {
        if self.destroyed {
            return false;
        }
        self.destroyed = true;
        self.revision += 1;
        true
    }

    /// Decide what the commit triggered by `mode` must do to the store.
    ///
    /// `generate_id` is only invoked when a lazily created session is written for the first time.
    pub(crate) fn plan_commit(
        &self,
        mode: CommitMode,
        now: Timestamp,
        config: &SessionConfig,
        generate_id: impl FnOnce() -> SessionId,
    ) -> CommitPlan {
        if self.committed {
            return CommitPlan::AlreadyCommitted;
        }
        let revision = self.revision;
        if self.destroyed {
            return CommitPlan::Delete {
                id: self.id.clone(),
                clear_cookie: self.loaded || self.id.is_some(),
                revision,
            };
        }
        let should_write = if mode == CommitMode::Manual {
            true
        } else if self.is_new {
            config.state.create_on_request || self.id_assigned || self.is_dirty()
        } else {
            self.is_dirty() || (config.state.rolling && self.loaded && !self.refreshed)
        };
        if !should_write {
            return CommitPlan::Skip { revision };
        }
        CommitPlan::Write {
            id: self.id.clone().unwrap_or_else(generate_id),
            data: self.data.clone(),
            expires_at: deadline(now, config.state.ttl),
            revision,
        }
    }

    /// Record the outcome of a commit whose store I/O succeeded.
    pub(crate) fn complete_commit(
        &mut self,
        plan: CommitPlan,
        mode: CommitMode,
        now: Timestamp,
        config: &SessionConfig,
    ) {
        let revision = match plan {
            CommitPlan::AlreadyCommitted => return,
            CommitPlan::Skip { revision } => revision,
            CommitPlan::Delete {
                clear_cookie,
                revision,
                ..
            } => {
                if clear_cookie {
                    self.pending_cookie = Some(serialize_removal_cookie(&config.cookie));
                }
                revision
            }
            CommitPlan::Write {
                id,
                expires_at,
                revision,
                ..
            } => {
                self.pending_cookie = Some(serialize_session_cookie(
                    &config.cookie,
                    id.as_str(),
                    expires_at,
                    now,
                ));
                if self.id.is_none() {
                    self.id_assigned = true;
                }
                self.id = Some(id);
                self.expires_at = expires_at;
                self.is_new = false;
                self.refreshed = true;
                revision
            }
        };
        self.saved_revision = revision;
        if mode != CommitMode::Manual {
            self.committed = true;
        }
    }
}
