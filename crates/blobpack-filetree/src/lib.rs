#![warn(missing_docs)]

//! File-to-blob-graph layer for BlobPack.
//!
//! Write path: a byte stream is split by a Rabin rolling-hash chunker into
//! content-defined chunks; each chunk becomes a blob, and a metadata node
//! recording `(offset_end, chunk_hash)` refs (plus name, size, mode, mtime
//! and the full-content hash) is itself stored as a blob. The node's hash
//! is the file handle.
//!
//! Read path: a [`reader::FileReader`] binary-searches the sorted ref list
//! to serve random-access reads across chunk boundaries.

pub mod chunker;
pub mod error;
pub mod node;
pub mod reader;
pub mod writer;

pub use chunker::{Chunk, ChunkSplitter, ChunkerParams, Pol};
pub use error::{FiletreeError, FiletreeResult};
pub use node::{Node, NodeRef, NODE_TYPE_DIR, NODE_TYPE_FILE};
pub use reader::FileReader;
pub use writer::FileWriter;
