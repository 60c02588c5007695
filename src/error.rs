use std::time::Duration;

use thiserror::Error;

use crate::bootstrap::Phase;

/// Errors returned by the message store.
///
/// `Conflict` and `NotFound` are expected outcomes of at-least-once delivery
/// and are handled by the ingestion pipeline without crashing anything. The
/// remaining variants are transient storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message {external_id} is already stored")]
    Conflict { external_id: String },

    #[error("no stored message for {0}")]
    NotFound(String),

    #[error("table '{0}' is missing or not queryable")]
    MissingTable(String),

    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage connection is closed")]
    Closed,

    #[error("storage is locked by another writer")]
    Busy,

    #[error("storage error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
                StoreError::Busy
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Fatal errors raised while bringing the service up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("storage is unreachable: {0}")]
    StorageUnreachable(#[source] StoreError),

    #[error("storage schema check failed: {0}")]
    SchemaMissing(#[source] StoreError),

    #[error("failed to bind {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("no free port found after {attempts} attempt(s) starting at {start}")]
    NoPortAvailable { start: u16, attempts: u32 },

    #[error("bootstrap step requires phase {expected:?}, current phase is {actual:?}")]
    OutOfOrder { expected: Phase, actual: Phase },
}
