use jiff::Timestamp;
use std::sync::Arc;

#[derive(Clone)]
/// The source of "now" for session expiry decisions.
///
/// Every expiration check (in the session state machine and in the bundled
/// storage backends) goes through a `Clock`, so that tests can drive time
/// explicitly instead of sleeping.
pub struct Clock(Arc<dyn Fn() -> Timestamp + Send + Sync>);

impl Clock {
    /// A clock backed by the operating system's wall clock.
    pub fn system() -> Self {
        Self::from_fn(Timestamp::now)
    }

    /// A clock backed by a custom function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Timestamp + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// The current instant, according to this clock.
    pub fn now(&self) -> Timestamp {
        (self.0)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Clock").field(&self.now()).finish()
    }
}

/// Add `ttl` to `now`, saturating at [`Timestamp::MAX`].
pub(crate) fn deadline(now: Timestamp, ttl: std::time::Duration) -> Timestamp {
    now.checked_add(ttl).unwrap_or(Timestamp::MAX)
}
