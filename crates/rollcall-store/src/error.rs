//! Error type for `rollcall-store`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted state exists but cannot be read back faithfully.
    #[error("corrupt {what}: {detail}")]
    Corrupt { what: String, detail: String },

    #[error("embedding for {id} has dimension {actual}, store expects {expected}")]
    Dimension {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("embedding for {0} contains non-finite values")]
    NonFinite(String),

    #[error("identity not found: {0}")]
    NotFound(String),

    #[error("identity already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid evidence reference: {0}")]
    InvalidReference(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(what: impl Into<String>, detail: impl Into<String>) -> Self {
        StoreError::Corrupt {
            what: what.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
