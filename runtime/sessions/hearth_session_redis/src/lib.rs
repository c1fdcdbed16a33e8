#![deny(missing_docs)]
//! A Redis-based session store for [`hearth_session`](https://crates.io/crates/hearth_session),
//! implemented using the [`redis`](https://crates.io/crates/redis) crate.
use anyhow::Context;
use hearth_session::{
    Clock, SessionData, SessionId,
    store::{
        SessionRecord, SessionRecordRef, SessionStorageBackend,
        errors::{DeleteError, DeleteExpiredError, LoadError, SaveError},
    },
};
use jiff::Timestamp;
use redis::{AsyncCommands, SetExpiry, SetOptions, Value, aio::ConnectionManager};
use std::borrow::Cow;
use std::num::NonZeroUsize;
use tracing_log_error::log_error;

#[derive(Clone, Debug, Default, serde::Deserialize)]
/// Configuration options for the Redis session store.
pub struct RedisSessionStoreConfig {
    /// Optional namespace prefix for Redis keys. When set, all session keys will be prefixed with this value.
    ///
    /// Namespacing allows multiple applications to share the same Redis instance without interfering with each other.
    ///
    /// # Example
    ///
    /// If `namespace` is set to `myapp` and the session key is `12345`, then
    /// the session state will be stored in Redis using the key `myapp:12345`.
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Clone)]
/// A server-side session store using Redis as its backend.
///
/// # Implementation details
///
/// Every session record is stored as an individual Redis key, holding the JSON document
/// `{ "data": {...}, "expires_at": <milliseconds since the Unix epoch> }`.
/// The key's expiration is set to match `expires_at`, so Redis reclaims expired
/// records on its own. Reads double-check `expires_at` against the store clock.
///
/// If the `namespace` value in [`RedisSessionStoreConfig`] is `Some`, then all
/// session keys are stored prefixed with this string, allowing multiple applications
/// to share the same Redis instance.
pub struct RedisSessionStore {
    connection: ConnectionManager,
    config: RedisSessionStoreConfig,
    clock: Clock,
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("connection", &"<ConnectionManager>")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisSessionStore {
    /// Creates a new Redis session store instance.
    ///
    /// You must provide a connection as well as configuration.
    pub fn new(connection: ConnectionManager, config: RedisSessionStoreConfig) -> Self {
        Self {
            connection,
            config,
            clock: Clock::system(),
        }
    }

    /// Use the provided clock to compute key expirations and to double-check them on reads.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn redis_key(&self, id: &SessionId) -> String {
        if let Some(namespace) = &self.config.namespace {
            format!("{}:{}", namespace, id)
        } else {
            id.to_string()
        }
    }

    async fn del(&self, key: &str) -> Result<(), redis::RedisError> {
        let _deleted: u64 = self.connection.clone().del(key).await?;
        Ok(())
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredRecord<'a> {
    data: Cow<'a, SessionData>,
    expires_at: i64,
}

fn decode(raw: &[u8]) -> Result<SessionRecord, anyhow::Error> {
    let stored: StoredRecord<'static> =
        serde_json::from_slice(raw).context("Failed to deserialize the session record")?;
    let expires_at = Timestamp::from_millisecond(stored.expires_at)
        .context("The session record has an out-of-range expiration")?;
    Ok(SessionRecord {
        data: stored.data.into_owned(),
        expires_at,
    })
}

fn log_corrupted_record(e: &anyhow::Error) {
    let e: &(dyn std::error::Error + 'static) = e.as_ref();
    log_error!(
        e,
        level: tracing::Level::WARN,
        "Deleting a corrupted session record"
    );
}

fn redis_value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Nil => "Nil",
        Value::Okay => "Okay",
        Value::Int(_) => "Int",
        Value::BulkString(_) => "BulkString",
        Value::Array(_) => "Array",
        Value::SimpleString(_) => "SimpleString",
        Value::Map(_) => "Map",
        Value::Set(_) => "Set",
        Value::Attribute { .. } => "Attribute",
        Value::Double(_) => "Double",
        Value::Boolean(_) => "Boolean",
        Value::VerbatimString { .. } => "VerbatimString",
        Value::BigNumber(_) => "BigNumber",
        Value::Push { .. } => "Push",
        Value::ServerError(_) => "ServerError",
    }
}

#[async_trait::async_trait]
impl SessionStorageBackend for RedisSessionStore {
    /// Load the session record with the given ID, if it exists and hasn't expired.
    ///
    /// Records that can't be decoded are deleted and reported as missing.
    #[tracing::instrument(name = "Load server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn get(&self, id: &SessionId) -> Result<Option<SessionRecord>, LoadError> {
        let key = self.redis_key(id);
        let reply: Value = self
            .connection
            .clone()
            .get(&key)
            .await
            .map_err(|e| LoadError::Other(e.into()))?;
        let raw = match reply {
            Value::Nil => return Ok(None),
            Value::BulkString(raw) => raw,
            other => {
                return Err(LoadError::Other(anyhow::anyhow!(
                    "Redis GET replied {}. Expected BulkString or Nil.",
                    redis_value_type_name(&other)
                )));
            }
        };
        let record = match decode(&raw) {
            Ok(record) => record,
            Err(e) => {
                log_corrupted_record(&e);
                self.del(&key)
                    .await
                    .map_err(|e| LoadError::Other(e.into()))?;
                return Ok(None);
            }
        };
        if record.is_expired(self.clock.now()) {
            self.del(&key)
                .await
                .map_err(|e| LoadError::Other(e.into()))?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Create or overwrite the session record with the given ID.
    ///
    /// The key expires when the record does.
    /// Writing an already expired record deletes the key instead.
    #[tracing::instrument(name = "Save server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn set(&self, id: &SessionId, record: SessionRecordRef<'_>) -> Result<(), SaveError> {
        let key = self.redis_key(id);
        let remaining_ms = record.expires_at.as_millisecond() - self.clock.now().as_millisecond();
        if remaining_ms <= 0 {
            return self.del(&key).await.map_err(|e| SaveError::Other(e.into()));
        }
        let payload = serde_json::to_vec(&StoredRecord {
            data: record.data,
            expires_at: record.expires_at.as_millisecond(),
        })?;
        let reply: Value = self
            .connection
            .clone()
            .set_options(
                key,
                payload,
                SetOptions::default().with_expiration(SetExpiry::PX(remaining_ms as u64)),
            )
            .await
            .map_err(|e| SaveError::Other(e.into()))?;
        match reply {
            Value::Okay => Ok(()),
            other => Err(SaveError::Other(anyhow::anyhow!(
                "Redis SET replied {}. Expected Okay.",
                redis_value_type_name(&other)
            ))),
        }
    }

    /// Delete the session record with the given ID.
    ///
    /// Deleting a key that doesn't exist is not an error.
    #[tracing::instrument(name = "Delete server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn delete(&self, id: &SessionId) -> Result<(), DeleteError> {
        self.del(&self.redis_key(id))
            .await
            .map_err(|e| DeleteError::Other(e.into()))
    }

    /// No-op: Redis removes expired keys on its own.
    async fn delete_expired(
        &self,
        _batch_size: Option<NonZeroUsize>,
    ) -> Result<usize, DeleteExpiredError> {
        Ok(0)
    }
}
