//! Error types for the sync layer.

use blobpack_core::{BlobHash, HashError};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Error variants for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local blob store error.
    #[error("store error: {0}")]
    Store(#[from] blobpack_store::StoreError),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The peer answered with an unexpected status.
    #[error("remote error: status {status}: {body}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Response body, for context.
        body: String,
    },

    /// A hash received from the peer failed to parse.
    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    /// A blob fetched from the peer did not hash to its claimed identity.
    #[error("blob from peer failed verification: {hash}")]
    BlobVerification {
        /// The claimed hash.
        hash: BlobHash,
    },
}
