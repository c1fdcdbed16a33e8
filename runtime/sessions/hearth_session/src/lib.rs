/*!
Server-side session management.

# Why do we need sessions?

HTTP is stateless: the outcome of a request is only influenced by its content and
by whatever state the server queries while processing it.
That's not enough to, say, keep a user logged in across page views.

**Sessions** attach state to a set of requests coming from the same client.
The server sets a cookie in the HTTP response (`Set-Cookie` header), the client
stores it and sends it back whenever it issues new requests (`Cookie` header).

# Anatomy of a session

The session cookie only carries an opaque **session id**.
All the data attached to the session lives server-side, inside a
**session storage backend** (a SQL database, Redis, a file, memory...),
under a record that expires after a configurable time-to-live.

# Lifecycle

1. [`SessionManager::start`] looks up the session id in the incoming cookies
   and loads the corresponding record, or creates a new session.
2. The request handler reads and mutates the session via the [`Session`] handle.
3. [`SessionCommit::commit`] reconciles the session with the storage backend
   and returns the `Set-Cookie` header value to attach to the response, if any.

[`with_session`] and [`finalize_session`] wire these steps into an
[`http`](https://docs.rs/http)-based request/response flow.

## References

Further reading on sessions:
- [RFC 6265](https://datatracker.ietf.org/doc/html/rfc6265);
- [OWASP's session management cheat-sheet](https://cheatsheetseries.owasp.org/cheatsheets/Session_Management_Cheat_Sheet.html).
*/
mod clock;
pub mod config;
pub mod cookie;
mod id;
mod manager;
mod middleware;
mod session_;
mod state;
mod store_;

pub use clock::Clock;
pub use config::SessionConfig;
pub use id::{IdGenerator, SessionId};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use middleware::{finalize_session, with_session};
pub use session_::{Session, SessionCommit};
pub use session_::errors;
pub use store_::{SessionData, SessionStore};

pub mod store {
    //! Types and traits related to [`SessionStore`][super::SessionStore].
    pub use crate::store_::errors;
    pub use crate::store_::{SessionRecord, SessionRecordRef, SessionStorageBackend};
}
