// ABOUTME: Error taxonomy shared by every storage backend and the save manager.
// ABOUTME: Keeps not-found and quota failures distinguishable from generic I/O and parse errors.

use std::sync::Arc;

use initiative_core::{BundleError, ImportError, RecordError, RecordKind};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur while persisting or retrieving records.
///
/// Wrapped library errors sit behind an `Arc` so the error can be cloned
/// into save events and still be returned whole to the caller.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("{kind} `{name}` not found")]
    NotFound { kind: RecordKind, name: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("invalid record format: {0}")]
    Format(String),

    #[error("io error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    #[error("json error: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    #[error("sqlite error: {0}")]
    Sqlite(#[source] Arc<rusqlite::Error>),

    #[error("storage task failed: {0}")]
    Task(#[source] Arc<tokio::task::JoinError>),
}

impl StorageError {
    pub fn not_found(kind: RecordKind, name: &str) -> Self {
        StorageError::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            StorageError::QuotaExceeded(err.to_string())
        } else {
            StorageError::Io(Arc::new(err))
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        if err.sqlite_error_code() == Some(ErrorCode::DiskFull) {
            StorageError::QuotaExceeded(err.to_string())
        } else {
            StorageError::Sqlite(Arc::new(err))
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Json(Arc::new(err))
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Task(Arc::new(err))
    }
}

impl From<RecordError> for StorageError {
    fn from(err: RecordError) -> Self {
        StorageError::Format(err.to_string())
    }
}

impl From<ImportError> for StorageError {
    fn from(err: ImportError) -> Self {
        StorageError::Format(err.to_string())
    }
}

impl From<BundleError> for StorageError {
    fn from(err: BundleError) -> Self {
        StorageError::Format(err.to_string())
    }
}
