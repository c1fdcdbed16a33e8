use std::sync::Arc;

#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
/// The identifier for a session.
///
/// It is carried by the session cookie and used as the key of the
/// server-side record in the storage backend.
///
/// # Format stability
///
/// From an API perspective, a session id is an opaque string.
/// Identifiers produced by [`SessionId::random`] are UUIDs today, but you
/// should not rely on it: incoming cookies may carry arbitrary values and
/// custom generators can be plugged in via [`SessionManagerBuilder::id_generator`].
///
/// [`SessionManagerBuilder::id_generator`]: crate::SessionManagerBuilder::id_generator
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random identifier using the random number generator
    /// provided by the underlying operating system.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier, e.g. the value of an incoming session cookie.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the wrapper and return the underlying string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Clone)]
/// The function used to mint new session identifiers.
///
/// Defaults to [`SessionId::random`].
pub struct IdGenerator(Arc<dyn Fn() -> SessionId + Send + Sync>);

impl IdGenerator {
    /// Use a custom function to generate session identifiers.
    ///
    /// The function must return a value that is unique with overwhelming
    /// probability: two live sessions sharing an id share their state.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> SessionId + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Mint a new identifier.
    pub fn generate(&self) -> SessionId {
        (self.0)()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::from_fn(SessionId::random)
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("IdGenerator").finish_non_exhaustive()
    }
}
