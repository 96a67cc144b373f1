use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeriesError {
    #[error("cannot open series store at `{}`: {source}", .location.display())]
    ConnectionFailed {
        location: PathBuf,
        source: rusqlite::Error,
    },
    #[error("table `{table}` already exists{}", shape_context(.reason))]
    AlreadyExists {
        table: &'static str,
        reason: Option<String>,
    },
    #[error("a reading already exists at timestamp {0}")]
    DuplicateTimestamp(f64),
    #[error("reading at timestamp {timestamp} has a corrupt payload: {source}")]
    CorruptRecord {
        timestamp: f64,
        source: serde_json::Error,
    },
    #[error("cannot encode payload: {0}")]
    Encode(serde_json::Error),
    #[error("timestamp must be a finite number of seconds")]
    InvalidTimestamp,
    #[error("payload value for `{0}` is not finite")]
    NonFiniteValue(String),
    #[error("sqlite error `{0}`")]
    Sqlite(#[from] rusqlite::Error),
    #[error("sqlite worker error `{0}`")]
    Worker(#[from] tokio_rusqlite::Error),
}

fn shape_context(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!(" with an incompatible shape ({r})"),
        None => String::new(),
    }
}

impl SeriesError {
    /// Maps a failed INSERT onto the taxonomy. Only primary key collisions
    /// become `DuplicateTimestamp`.
    pub(crate) fn from_insert(err: rusqlite::Error, timestamp: f64) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == ErrorCode::ConstraintViolation
                    && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Self::DuplicateTimestamp(timestamp)
            }
            other => Self::Sqlite(other),
        }
    }

    /// Failures that mean the location itself is unusable, as opposed to a
    /// problem with a single statement.
    pub(crate) fn is_connection_failure(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    ErrorCode::CannotOpen
                        | ErrorCode::NotADatabase
                        | ErrorCode::PermissionDenied
                        | ErrorCode::ReadOnly
                        | ErrorCode::SystemIoFailure
                )
        )
    }
}
