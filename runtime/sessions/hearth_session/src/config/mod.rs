//! Types related to [`SessionConfig`].
mod cookie;
mod state;

pub use biscotti::SameSite;
pub use cookie::SessionCookieConfig;
pub use state::{InvalidSessionConfig, SessionStateConfig};

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
/// Configure how sessions are managed.
///
/// All fields have sensible defaults: an empty table deserializes
/// into [`SessionConfig::default`].
///
/// ```toml
/// [session.cookie]
/// name = "sid"
/// secure = true
///
/// [session.state]
/// ttl = "1day"
/// rolling = false
/// ```
pub struct SessionConfig {
    /// Configure the session cookie.
    #[serde(default)]
    pub cookie: SessionCookieConfig,
    /// Configure the session lifecycle.
    #[serde(default)]
    pub state: SessionStateConfig,
}

impl SessionConfig {
    /// Create a new session configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that the configuration values are usable.
    pub fn validate(&self) -> Result<(), InvalidSessionConfig> {
        self.state.validate()
    }
}
