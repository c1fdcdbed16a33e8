#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure the lifecycle of the session state.
pub struct SessionStateConfig {
    /// The time-to-live of a session, i.e. how long the server-side record
    /// is kept in the storage backend after the last write.
    ///
    /// It also controls the `Max-Age` and `Expires` attributes of the session cookie.
    ///
    /// It must be greater than zero.
    ///
    /// # Default
    ///
    /// The default value is 7 days.
    #[serde(with = "humantime_serde", default = "default_ttl")]
    pub ttl: std::time::Duration,
    /// Refresh the expiration of an existing session on every request that
    /// carries a valid session cookie, even if the session wasn't modified.
    ///
    /// # Performance impact
    ///
    /// Rolling sessions cost one write to the storage backend per request.
    /// Disable it on read-heavy workloads if sliding expiration isn't needed.
    ///
    /// # Default
    ///
    /// Enabled.
    #[serde(default = "default_rolling")]
    pub rolling: bool,
    /// Assign a session ID (and persist a record) for every request
    /// that doesn't carry a valid session cookie, even if the session is never touched.
    ///
    /// If disabled, sessions are created lazily: no ID is generated, no record is
    /// written and no cookie is sent until the session is modified or explicitly saved.
    ///
    /// # Default
    ///
    /// Enabled.
    #[serde(default = "default_create_on_request")]
    pub create_on_request: bool,
}

impl Default for SessionStateConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            rolling: default_rolling(),
            create_on_request: default_create_on_request(),
        }
    }
}

impl SessionStateConfig {
    /// Check that the configuration values are usable.
    pub fn validate(&self) -> Result<(), InvalidSessionConfig> {
        if self.ttl.is_zero() {
            return Err(InvalidSessionConfig::ZeroTtl);
        }
        Ok(())
    }
}

fn default_ttl() -> std::time::Duration {
    std::time::Duration::from_secs(60 * 60 * 24 * 7)
}

fn default_rolling() -> bool {
    true
}

fn default_create_on_request() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
/// Error raised when building a [`SessionManager`](crate::SessionManager) with an invalid configuration.
pub enum InvalidSessionConfig {
    /// The session time-to-live must be greater than zero.
    #[error("The session time-to-live must be greater than zero")]
    ZeroTtl,
}
