use anyhow::Context as _;
use hearth_session::SessionData;
use hearth_session::store::SessionRecord;
use jiff::Timestamp;
use tracing_log_error::log_error;

/// What a session row turned out to contain.
pub(crate) enum Lookup {
    Live(SessionRecord),
    /// The row must be deleted: it has expired or can't be decoded.
    Stale,
}

/// The raw columns of a session row, as read from the database.
pub(crate) struct RawRow {
    pub(crate) expires_at: i64,
    pub(crate) data: serde_json::Value,
}

pub(crate) fn decode(row: Result<RawRow, anyhow::Error>, now: Timestamp) -> Lookup {
    match row.and_then(try_decode) {
        Ok(record) if !record.is_expired(now) => Lookup::Live(record),
        Ok(_) => Lookup::Stale,
        Err(e) => {
            let e: &(dyn std::error::Error + 'static) = e.as_ref();
            log_error!(
                e,
                level: tracing::Level::WARN,
                "Deleting a session record that can't be decoded"
            );
            Lookup::Stale
        }
    }
}

fn try_decode(row: RawRow) -> Result<SessionRecord, anyhow::Error> {
    let expires_at = Timestamp::from_millisecond(row.expires_at)
        .context("Failed to parse the retrieved session expiration")?;
    let data: SessionData = serde_json::from_value(row.data)
        .context("Failed to deserialize the retrieved session data")?;
    Ok(SessionRecord { data, expires_at })
}

/// Convert a batch size into a `LIMIT` value.
pub(crate) fn limit(batch_size: std::num::NonZeroUsize) -> i64 {
    batch_size.get().try_into().unwrap_or(i64::MAX)
}
