//! Error types shared by the library modules

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of the key/value persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store is unavailable (could not create {0})")]
    Unavailable(PathBuf),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("stored value for {key:?} has an unexpected shape: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a history operation
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Stored history was left unchanged
    #[error("failed to persist history: {0}")]
    Persistence(#[from] StoreError),

    /// Nothing was written
    #[error("invalid import data: {0}")]
    InvalidImport(String),
}

/// Failure resolving a saved context into a jump target
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("file not found: {0}")]
    FileMissing(String),

    #[error("no saved context at index {0}")]
    NoSuchEntry(usize),

    #[error(transparent)]
    History(#[from] HistoryError),
}
