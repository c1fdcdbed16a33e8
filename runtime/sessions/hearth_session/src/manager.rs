use crate::clock::deadline;
use crate::config::InvalidSessionConfig;
use crate::cookie::{parse_cookies, serialize_removal_cookie};
use crate::state::SessionState;
use crate::store::errors::LoadError;
use crate::{
    Clock, IdGenerator, Session, SessionCommit, SessionConfig, SessionData, SessionId,
    SessionStore,
};
use std::sync::Arc;

/// The entrypoint for session management.
///
/// It bundles the [`SessionStore`], the [`SessionConfig`] and the injectable
/// collaborators (id generator, initial data, clock) that every session
/// started by it shares.
///
/// It's cheap to clone: all clones share the same state.
///
/// # Example
///
/// ```rust
/// use hearth_session::{SessionConfig, SessionManager, SessionStore};
/// use hearth_session_memory_store::InMemorySessionStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = SessionStore::new(InMemorySessionStore::new());
/// let manager = SessionManager::new(store, SessionConfig::default())?;
///
/// let (session, commit) = manager.start(Some("sid=abc; theme=dark")).await?;
/// session.set("user.id", "my-user-identifier")?;
/// let set_cookie: Option<String> = commit.commit().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct SessionManager(Arc<ManagerInner>);

#[derive(Debug)]
struct ManagerInner {
    store: SessionStore,
    config: SessionConfig,
    id_generator: IdGenerator,
    initial_data: InitialData,
    clock: Clock,
}

impl SessionManager {
    /// Create a new session manager with the default id generator,
    /// empty initial data and the system clock.
    ///
    /// It fails if the configuration is invalid.
    pub fn new(store: SessionStore, config: SessionConfig) -> Result<Self, InvalidSessionConfig> {
        Self::builder(store).config(config).build()
    }

    /// Start building a session manager on top of `store`.
    pub fn builder(store: SessionStore) -> SessionManagerBuilder {
        SessionManagerBuilder {
            store,
            config: SessionConfig::default(),
            id_generator: IdGenerator::default(),
            initial_data: InitialData::default(),
            clock: Clock::default(),
        }
    }

    /// Start the session for the current request.
    ///
    /// `cookie_header` is the value of the incoming `Cookie` header, if any.
    /// If it carries a session id whose record is still live, the session is loaded
    /// from the storage backend. Otherwise a brand-new session is created.
    ///
    /// If the client presented a session id that the storage backend doesn't know
    /// (or that has expired), the end-of-request commit will clear the session cookie
    /// unless a new one is emitted.
    #[tracing::instrument(name = "Start session", level = tracing::Level::TRACE, skip_all)]
    pub async fn start(
        &self,
        cookie_header: Option<&str>,
    ) -> Result<(Session, SessionCommit), LoadError> {
        let inner = &self.0;
        let incoming_id = cookie_header
            .and_then(|header| parse_cookies(header).swap_remove(&inner.config.cookie.name))
            .filter(|id| !id.is_empty())
            .map(SessionId::from);
        let record = match &incoming_id {
            Some(id) => inner.store.get(id).await?,
            None => None,
        };
        let now = inner.clock.now();
        let state = match (incoming_id, record) {
            (Some(id), Some(record)) if !record.is_expired(now) => {
                tracing::trace!("Loaded the session record");
                SessionState::loaded(id, record.data, record.expires_at)
            }
            (incoming_id, _) => {
                let id = inner
                    .config
                    .state
                    .create_on_request
                    .then(|| inner.id_generator.generate());
                let mut state = SessionState::fresh(
                    id,
                    (inner.initial_data.0)(),
                    deadline(now, inner.config.state.ttl),
                );
                if incoming_id.is_some() {
                    tracing::debug!(
                        "The incoming session id is unknown or expired. The session cookie will be cleared"
                    );
                    state.schedule_removal_cookie(serialize_removal_cookie(&inner.config.cookie));
                }
                state
            }
        };
        Ok(Session::pair(state, self.clone()))
    }

    /// The configuration used by this manager.
    pub fn config(&self) -> &SessionConfig {
        &self.0.config
    }

    /// The storage backend used by this manager.
    pub fn store(&self) -> &SessionStore {
        &self.0.store
    }

    pub(crate) fn id_generator(&self) -> &IdGenerator {
        &self.0.id_generator
    }

    pub(crate) fn clock(&self) -> &Clock {
        &self.0.clock
    }
}

/// A builder for [`SessionManager`], returned by [`SessionManager::builder`].
pub struct SessionManagerBuilder {
    store: SessionStore,
    config: SessionConfig,
    id_generator: IdGenerator,
    initial_data: InitialData,
    clock: Clock,
}

impl SessionManagerBuilder {
    /// Use `config` instead of [`SessionConfig::default`].
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Override how new session ids are generated.
    ///
    /// By default, ids are random v4 UUIDs.
    pub fn id_generator(mut self, id_generator: IdGenerator) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Set the data every new session starts with.
    ///
    /// By default, new sessions start empty.
    pub fn initial_data<F>(mut self, f: F) -> Self
    where
        F: Fn() -> SessionData + Send + Sync + 'static,
    {
        self.initial_data = InitialData(Arc::new(f));
        self
    }

    /// Override the source of the current time.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and build the manager.
    pub fn build(self) -> Result<SessionManager, InvalidSessionConfig> {
        self.config.validate()?;
        Ok(SessionManager(Arc::new(ManagerInner {
            store: self.store,
            config: self.config,
            id_generator: self.id_generator,
            initial_data: self.initial_data,
            clock: self.clock,
        })))
    }
}

#[derive(Clone)]
struct InitialData(Arc<dyn Fn() -> SessionData + Send + Sync>);

impl Default for InitialData {
    fn default() -> Self {
        Self(Arc::new(SessionData::new))
    }
}

impl std::fmt::Debug for InitialData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InitialData")
    }
}
