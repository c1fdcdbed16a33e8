//! Types related to [`PostgresSessionStore`].
use crate::row::{Lookup, RawRow, decode, limit};
use anyhow::Context as _;
use hearth_session::{
    Clock, SessionId,
    store::{
        SessionRecord, SessionRecordRef, SessionStorageBackend,
        errors::{DeleteError, DeleteExpiredError, LoadError, SaveError},
    },
};
use sqlx::{PgPool, Row as _, postgres::PgRow};
use std::num::NonZeroUsize;

#[derive(Debug, Clone)]
/// A server-side session store using Postgres as its backend.
///
/// # Implementation details
///
/// This store uses `sqlx` to interact with Postgres.
/// All session records are stored in a single table. You can use
/// [`migrate`](Self::migrate) to create the table and index
/// required by the store in the database.
/// Alternatively, you can use [`migration_query`](Self::migration_query)
/// to get the SQL query that creates the table and index in order to run it yourself
/// (e.g. as part of your database migration scripts).
///
/// Expiration is checked against the store [`Clock`], not against the
/// database clock.
pub struct PostgresSessionStore {
    pool: PgPool,
    clock: Clock,
}

impl PostgresSessionStore {
    /// Creates a new Postgres session store instance.
    ///
    /// It requires a pool of Postgres connections to interact with the database
    /// where the session records are stored.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            clock: Clock::system(),
        }
    }

    /// Use the provided clock to decide if a record has expired.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Return the query used to create the sessions table and index.
    ///
    /// # Implementation details
    ///
    /// The query is designed to be idempotent, meaning it can be run multiple times
    /// without causing any issues. If the table and index already exist, the query
    /// does nothing.
    ///
    /// # Alternatives
    ///
    /// You can use this method to add the query to your database migration scripts.
    /// Alternatively, you can use [`migrate`](Self::migrate)
    /// to run the query directly on the database.
    pub fn migration_query() -> &'static str {
        "-- Create the sessions table if it doesn't exist
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    expires_at BIGINT NOT NULL,
    data JSONB NOT NULL
);

-- Create the index on the expires_at column if it doesn't exist
DO $$
BEGIN
    IF NOT EXISTS (
        SELECT 1 FROM pg_indexes
        WHERE schemaname = current_schema()
            AND tablename = 'sessions'
            AND indexname = 'idx_sessions_expires_at'
    ) THEN
        CREATE INDEX idx_sessions_expires_at ON sessions(expires_at);
    END IF;
END $$;"
    }

    /// Create the sessions table and index in the database.
    ///
    /// This method is idempotent, meaning it can be called multiple times without
    /// causing any issues. If the table and index already exist, this method does nothing.
    ///
    /// If you prefer to run the query yourself, rely on [`migration_query`](Self::migration_query)
    /// to get the SQL that's being executed.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        use sqlx::Executor as _;

        self.pool.execute(Self::migration_query()).await?;
        Ok(())
    }

    async fn delete_row(&self, id: &SessionId) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn raw_row(row: &PgRow) -> Result<RawRow, anyhow::Error> {
    let expires_at: i64 = row
        .try_get(0)
        .context("Failed to read the retrieved session expiration")?;
    let data: serde_json::Value = row
        .try_get(1)
        .context("Failed to read the retrieved session data")?;
    Ok(RawRow { expires_at, data })
}

#[async_trait::async_trait]
impl SessionStorageBackend for PostgresSessionStore {
    /// Load the session record with the given ID, if it exists and hasn't expired.
    ///
    /// Expired rows, as well as rows that can't be decoded, are deleted on sight.
    #[tracing::instrument(name = "Load server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn get(&self, id: &SessionId) -> Result<Option<SessionRecord>, LoadError> {
        let row = sqlx::query("SELECT expires_at, data FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LoadError::Other(e.into()))?;
        let Some(row) = row else {
            return Ok(None);
        };
        match decode(raw_row(&row), self.clock.now()) {
            Lookup::Live(record) => Ok(Some(record)),
            Lookup::Stale => {
                self.delete_row(id)
                    .await
                    .map_err(|e| LoadError::Other(e.into()))?;
                Ok(None)
            }
        }
    }

    /// Create or overwrite the session record with the given ID.
    ///
    /// Writing an already expired record deletes the row instead.
    #[tracing::instrument(name = "Save server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn set(&self, id: &SessionId, record: SessionRecordRef<'_>) -> Result<(), SaveError> {
        if record.is_expired(self.clock.now()) {
            return self
                .delete_row(id)
                .await
                .map_err(|e| SaveError::Other(e.into()));
        }
        let data = serde_json::to_value(&record.data)?;
        sqlx::query(
            "INSERT INTO sessions (id, expires_at, data) \
            VALUES ($1, $2, $3) \
            ON CONFLICT (id) DO UPDATE \
            SET expires_at = EXCLUDED.expires_at, data = EXCLUDED.data",
        )
        .bind(id.as_str())
        .bind(record.expires_at.as_millisecond())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| SaveError::Other(e.into()))?;
        Ok(())
    }

    /// Delete the session record with the given ID.
    ///
    /// Deleting a missing record is not an error.
    #[tracing::instrument(name = "Delete server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn delete(&self, id: &SessionId) -> Result<(), DeleteError> {
        self.delete_row(id)
            .await
            .map_err(|e| DeleteError::Other(e.into()))
    }

    /// Delete expired sessions from the database.
    ///
    /// If `batch_size` is provided, the query will delete at most `batch_size` expired sessions.
    /// In either case, if successful, the method returns the number of expired sessions that
    /// have been deleted.
    ///
    /// # When should you delete in batches?
    ///
    /// If there are a lot of expired sessions in the database, deleting them all at once can
    /// cause performance issues. By deleting in batches, you can limit the number of sessions
    /// deleted in a single query, reducing the impact.
    ///
    /// # Example
    ///
    /// Delete expired sessions in batches of 1000:
    ///
    /// ```no_run
    /// use hearth_session::SessionStore;
    /// use hearth_session_sqlx::PostgresSessionStore;
    /// use tracing_log_error::log_error;
    /// use std::time::Duration;
    ///
    /// # async fn delete_expired_sessions(pool: sqlx::PgPool) {
    /// let backend = PostgresSessionStore::new(pool);
    /// let store = SessionStore::new(backend);
    /// let batch_size = Some(1000.try_into().unwrap());
    /// let batch_sleep = Duration::from_secs(60);
    /// loop {
    ///     if let Err(e) = store.delete_expired(batch_size).await {
    ///         log_error!(e, "Failed to delete a batch of expired sessions");
    ///     }
    ///     tokio::time::sleep(batch_sleep).await;
    /// }
    /// # }
    /// ```
    #[tracing::instrument(name = "Delete expired records", level = tracing::Level::INFO, skip_all)]
    async fn delete_expired(
        &self,
        batch_size: Option<NonZeroUsize>,
    ) -> Result<usize, DeleteExpiredError> {
        let now = self.clock.now().as_millisecond();
        let query = if let Some(batch_size) = batch_size {
            sqlx::query(
                "DELETE FROM sessions WHERE id IN \
                (SELECT id FROM sessions WHERE expires_at <= $1 LIMIT $2)",
            )
            .bind(now)
            .bind(limit(batch_size))
        } else {
            sqlx::query("DELETE FROM sessions WHERE expires_at <= $1").bind(now)
        };
        let r = query.execute(&self.pool).await.map_err(anyhow::Error::from)?;
        Ok(r.rows_affected().try_into().unwrap_or(usize::MAX))
    }
}
