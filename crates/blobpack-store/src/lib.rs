#![warn(missing_docs)]

//! BlobPack packed-file blob store.
//!
//! Blobs are appended as immutable frames to large pre-allocated container
//! files (`blobs-NNNNN`) and located through a persistent position index
//! that is a pure cache of the container contents: the index can be wiped
//! and rebuilt by a linear scan at any time.
//!
//! Write path: `put` → frame encode (optional Snappy) → append + fsync →
//! index position. Read path: index lookup → positional read → decode +
//! hash verify.

pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod packed;
pub mod scan;
pub mod store;

pub use config::{StoreConfig, DEFAULT_CHUNKER_POLYNOMIAL, DEFAULT_MAX_CONTAINER_SIZE};
pub use error::{StoreError, StoreResult};
pub use index::{BlobIndex, BlobPos};
pub use packed::{flags, FrameHeader, CONTAINER_MAGIC, FRAME_OVERHEAD};
pub use scan::{scan_containers, ScanEntry, ScanReport};
pub use store::{BlobStore, SizedBlobRef};
