#![warn(missing_docs)]

//! BlobPack hash primitives: BLAKE2b-256 blob identities and hex encoding.
//!
//! Every blob in a BlobPack store is identified by the BLAKE2b-256 hash of
//! its plaintext bytes. This crate is the single definition of that identity
//! so the packed-file store, the filetree layer and the sync protocol all
//! agree on it.

pub mod hash;

pub use hash::{BlobHash, HashError, Hasher, HASH_SIZE, HEX_SIZE};
