//! Typed SQL parameters.
//!
//! The filter compilers produce a flat list of [`SqlParam`] values
//! that the execution layers bind through prepared statements. User
//! input never reaches SQL text - only regex-validated identifiers
//! are ever spliced.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{ToSqlOutput, Value};

// ============================================================================
// PARAMETER SUM
// ============================================================================

/// Type tag for a NULL parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlNull {
    /// NULL text
    Text,
    /// NULL double precision
    Double,
    /// NULL timestamp
    Timestamp,
}

/// A typed SQL parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Text value
    Text(String),
    /// 64-bit integer value
    Int(i64),
    /// Double-precision value
    Double(f64),
    /// Boolean value
    Bool(bool),
    /// UTC timestamp value
    Timestamp(DateTime<Utc>),
    /// Typed NULL
    Null(SqlNull),
}

impl SqlParam {
    /// Text parameter from anything string-like
    pub fn text(value: impl Into<String>) -> Self {
        SqlParam::Text(value.into())
    }
}

// ============================================================================
// TIMESTAMP FORMAT
// ============================================================================

/// Timestamps persist in SQLite as RFC 3339 text with fixed
/// millisecond precision and a `Z` suffix, so lexicographic order
/// matches chronological order.
pub(crate) fn sqlite_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp persisted by [`sqlite_timestamp`]
pub(crate) fn parse_sqlite_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// DRIVER BINDINGS
// ============================================================================

impl rusqlite::ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParam::Text(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
            SqlParam::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlParam::Double(d) => ToSqlOutput::Owned(Value::Real(*d)),
            SqlParam::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            SqlParam::Timestamp(ts) => ToSqlOutput::Owned(Value::Text(sqlite_timestamp(ts))),
            SqlParam::Null(_) => ToSqlOutput::Owned(Value::Null),
        })
    }
}

#[cfg(feature = "postgres")]
mod pg {
    use super::{SqlNull, SqlParam};
    use chrono::{DateTime, Utc};
    use postgres::types::ToSql;

    static NULL_TEXT: Option<String> = None;
    static NULL_DOUBLE: Option<f64> = None;
    static NULL_TIMESTAMP: Option<DateTime<Utc>> = None;

    impl SqlParam {
        /// Borrow as a postgres statement parameter
        pub fn pg_ref(&self) -> &(dyn ToSql + Sync) {
            match self {
                SqlParam::Text(s) => s,
                SqlParam::Int(i) => i,
                SqlParam::Double(d) => d,
                SqlParam::Bool(b) => b,
                SqlParam::Timestamp(ts) => ts,
                SqlParam::Null(SqlNull::Text) => &NULL_TEXT,
                SqlParam::Null(SqlNull::Double) => &NULL_DOUBLE,
                SqlParam::Null(SqlNull::Timestamp) => &NULL_TIMESTAMP,
            }
        }
    }

    /// Borrow a whole parameter list for `Client::query`/`execute`
    pub(crate) fn pg_refs(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
        params.iter().map(SqlParam::pg_ref).collect()
    }
}

#[cfg(feature = "postgres")]
pub(crate) use pg::pg_refs;

// ============================================================================
// TESTS
// ============================================================================
