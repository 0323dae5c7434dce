//! Snappy payload codec for frame payloads.

use crate::error::{StoreError, StoreResult};

/// Compress a payload with raw (block-format) Snappy.
pub fn compress(data: &[u8]) -> StoreResult<Vec<u8>> {
    snap::raw::Encoder::new()
        .compress_vec(data)
        .map_err(|e| StoreError::Policy(format!("snappy encode failed: {e}")))
}

/// Decompress a raw Snappy payload.
///
/// Failure means the payload on disk is not what was written (bit flips,
/// punched holes); callers treat it like a hash mismatch.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, snap::Error> {
    snap::raw::Decoder::new().decompress_vec(data)
}
