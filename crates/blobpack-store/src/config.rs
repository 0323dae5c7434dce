//! Store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default rollover threshold for container files: 256 MiB.
pub const DEFAULT_MAX_CONTAINER_SIZE: u64 = 256 << 20;

/// Default irreducible polynomial for the content-defined chunker.
///
/// Must not change once a store has been written to: chunk boundaries (and
/// therefore deduplication across replicas) depend on it.
pub const DEFAULT_CHUNKER_POLYNOMIAL: u64 = 0x3c65_7535_c4d6_f5;

/// Options recognized at store creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory for container files and the position index.
    pub dir: PathBuf,
    /// Rollover threshold in bytes.
    pub max_container_size: u64,
    /// Snappy-compress frame payloads.
    pub compression: bool,
    /// Irreducible polynomial handed to the chunker.
    pub chunker_polynomial: u64,
}

impl StoreConfig {
    /// Configuration with defaults for the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            dir: dir.into(),
            max_container_size: DEFAULT_MAX_CONTAINER_SIZE,
            compression: false,
            chunker_polynomial: DEFAULT_CHUNKER_POLYNOMIAL,
        }
    }

    /// Enable or disable Snappy compression of frame payloads.
    pub fn with_compression(mut self, on: bool) -> Self {
        self.compression = on;
        self
    }

    /// Override the rollover threshold.
    pub fn with_max_container_size(mut self, bytes: u64) -> Self {
        self.max_container_size = bytes;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::new("./blobpack-data")
    }
}
