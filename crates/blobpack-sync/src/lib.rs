#![warn(missing_docs)]

//! Merkle-tree anti-entropy sync for BlobPack replicas.
//!
//! Each replica summarizes its blob-hash set as a two-level hash tree: a
//! root over every hash plus 256 buckets keyed by the first two hex
//! characters. Reconciliation exchanges the compact summaries and only
//! descends into buckets whose 32-byte hashes disagree, so replicas that
//! mostly agree pay far less than a full hash-list exchange.
//!
//! Blob `put` is idempotent and position-addressed, so an interrupted
//! round leaves both sides holding a subset of the union and a retry
//! converges.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod tree;

pub use api::SyncApi;
pub use client::{SyncClient, SyncStats};
pub use config::DaemonConfig;
pub use error::{SyncError, SyncResult};
pub use tree::{diff, LeafState, State, StateTree, SyncResp};
