//! Content hashing: BLAKE2b-256 identities for blobs.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// BLAKE2b instantiation with a 32-byte digest.
pub type Blake2b256 = Blake2b<U32>;

/// Size of a blob hash in bytes.
pub const HASH_SIZE: usize = 32;

/// Size of a blob hash in lowercase hex characters.
pub const HEX_SIZE: usize = 64;

/// Errors from parsing a hash out of its textual form.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// The input was not `HEX_SIZE` characters long.
    #[error("invalid hash length: expected {HEX_SIZE} hex chars, got {0}")]
    InvalidLength(usize),
    /// The input contained non-hex characters.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// A 32-byte BLAKE2b-256 hash identifying a blob's plaintext content.
///
/// Ordered byte-wise, which matches the lexicographic ordering of the
/// lowercase hex form. Serializes as a hex string on every JSON surface.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobHash(pub [u8; HASH_SIZE]);

impl BlobHash {
    /// Hash a complete byte slice.
    pub fn compute(data: &[u8]) -> Self {
        let digest = Blake2b256::digest(data);
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&digest);
        BlobHash(out)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the lowercase (or uppercase) hex form.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        if s.len() != HEX_SIZE {
            return Err(HashError::InvalidLength(s.len()));
        }
        let raw = hex::decode(s)?;
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&raw);
        Ok(BlobHash(out))
    }

    /// The two-hex-character bucket prefix used by the sync state tree.
    pub fn hex_prefix(&self) -> String {
        format!("{:02x}", self.0[0])
    }
}

impl std::fmt::Display for BlobHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for BlobHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlobHash({})", self.to_hex())
    }
}

impl std::str::FromStr for BlobHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlobHash::from_hex(s)
    }
}

impl Serialize for BlobHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlobHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlobHash::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Streaming hasher for content that does not fit in one slice.
pub struct Hasher(Blake2b256);

impl Hasher {
    /// Start a new streaming hash.
    pub fn new() -> Self {
        Hasher(Blake2b256::new())
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finish and return the digest.
    pub fn finalize(self) -> BlobHash {
        let digest = self.0.finalize();
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&digest);
        BlobHash(out)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
