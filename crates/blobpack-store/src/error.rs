//! Error types for the packed-file store.

use blobpack_core::BlobHash;
use thiserror::Error;

use crate::index::BlobPos;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error variants for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No index entry exists for the requested hash.
    #[error("blob not found: {hash}")]
    NotFound {
        /// The hash that was looked up.
        hash: BlobHash,
    },

    /// One or more frames failed integrity checks during a scan.
    #[error("{} corrupt frame(s) detected", positions.len())]
    Corrupted {
        /// Every offending frame position found over the full pass.
        positions: Vec<BlobPos>,
    },

    /// A container file does not start with the expected magic.
    #[error("bad magic in container file {path}")]
    BadMagic {
        /// Path of the offending file.
        path: std::path::PathBuf,
    },

    /// Wraps lower-level filesystem errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Position index (redb) error.
    #[error("index error: {0}")]
    Index(String),

    /// The operation was refused by store policy.
    #[error("operation refused: {0}")]
    Policy(String),

    /// The caller's deadline expired.
    #[error("operation canceled")]
    Canceled,
}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        StoreError::Index(e.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::Index(e.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::Index(e.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::Index(e.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::Index(e.to_string())
    }
}
