//! Error types for the filetree layer.

use thiserror::Error;

use crate::chunker::ChunkerError;

/// Result type alias for filetree operations.
pub type FiletreeResult<T> = Result<T, FiletreeError>;

/// Error variants for filetree operations.
#[derive(Debug, Error)]
pub enum FiletreeError {
    /// Underlying blob store error (including `NotFound` for a missing
    /// chunk or node).
    #[error("store error: {0}")]
    Store(#[from] blobpack_store::StoreError),

    /// Chunker misconfiguration.
    #[error("chunker error: {0}")]
    Chunker(#[from] ChunkerError),

    /// Node (de)serialization failure.
    #[error("node encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A node's contents do not match its declared type.
    #[error("malformed node: {0}")]
    MalformedNode(String),

    /// I/O error from the input stream or filesystem metadata.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
