//! Persistent position index backed by redb.
//!
//! The index is a pure cache of the state reconstructable from the
//! container files: it may be wiped and rebuilt by a scan at any time.
//! Keys are raw 32-byte hashes; redb's byte-wise key ordering gives
//! enumeration its lexicographic order for free.

use std::ops::Bound;
use std::path::Path;

use blobpack_core::BlobHash;
use redb::{Database, TableDefinition};
use tracing::debug;

use crate::error::StoreResult;

const POSITIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("blob-positions");
const META: TableDefinition<&str, u64> = TableDefinition::new("store-meta");
const N_KEY: &str = "n";

/// Directory (inside the store root) holding the index database.
pub const INDEX_DIR: &str = "blobs-index";

/// Position of one frame inside a container file: points at the first byte
/// of the frame, with the payload size as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobPos {
    /// Container file index.
    pub n: u32,
    /// Byte offset of the frame inside the container.
    pub offset: u64,
    /// Payload size in bytes (after compression, if any).
    pub size: u32,
}

impl BlobPos {
    /// Little-endian fixed-width encoding.
    pub fn encode(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&self.n.to_le_bytes());
        out[4..12].copy_from_slice(&self.offset.to_le_bytes());
        out[12..].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    /// Decode a record previously produced by [`BlobPos::encode`].
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() != 16 {
            return None;
        }
        Some(BlobPos {
            n: u32::from_le_bytes(raw[..4].try_into().ok()?),
            offset: u64::from_le_bytes(raw[4..12].try_into().ok()?),
            size: u32::from_le_bytes(raw[12..].try_into().ok()?),
        })
    }
}

/// The on-disk hash → position mapping, plus the `n` counter naming the
/// container currently open for append.
pub struct BlobIndex {
    db: Database,
}

impl BlobIndex {
    /// Open (or create) the index under `store_dir/blobs-index/`.
    pub fn open(store_dir: &Path) -> StoreResult<Self> {
        let dir = store_dir.join(INDEX_DIR);
        std::fs::create_dir_all(&dir)?;
        let db = Database::create(dir.join("positions.redb"))?;
        // Create both tables up front so read paths never see a missing table.
        let txn = db.begin_write()?;
        {
            txn.open_table(POSITIONS)?;
            txn.open_table(META)?;
        }
        txn.commit()?;
        debug!(dir = %dir.display(), "position index opened");
        Ok(BlobIndex { db })
    }

    /// Insert or replace the position record for `hash`.
    pub fn set_pos(&self, hash: &BlobHash, pos: &BlobPos) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(POSITIONS)?;
            table.insert(hash.as_bytes().as_slice(), pos.encode().as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Look up the position record for `hash`.
    pub fn get_pos(&self, hash: &BlobHash) -> StoreResult<Option<BlobPos>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(POSITIONS)?;
        let found = table.get(hash.as_bytes().as_slice())?;
        Ok(found.and_then(|guard| BlobPos::decode(guard.value())))
    }

    /// Remove the position record for `hash`, if any.
    pub fn delete_pos(&self, hash: &BlobHash) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(POSITIONS)?;
            table.remove(hash.as_bytes().as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// True when no position records exist.
    pub fn is_empty(&self) -> StoreResult<bool> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(POSITIONS)?;
        let mut iter = table.range::<&[u8]>(..)?;
        Ok(iter.next().is_none())
    }

    /// Number of position records.
    pub fn count(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(POSITIONS)?;
        let mut count = 0u64;
        for entry in table.range::<&[u8]>(..)? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// List `(hash, position)` pairs in lexicographic hash order.
    ///
    /// `start` is inclusive, `end` exclusive, `limit == 0` means unlimited.
    pub fn list_range(
        &self,
        start: Option<&BlobHash>,
        end: Option<&BlobHash>,
        limit: usize,
    ) -> StoreResult<Vec<(BlobHash, BlobPos)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(POSITIONS)?;

        let lower = match start {
            Some(h) => Bound::Included(h.as_bytes().as_slice()),
            None => Bound::Unbounded,
        };
        let upper = match end {
            Some(h) => Bound::Excluded(h.as_bytes().as_slice()),
            None => Bound::Unbounded,
        };

        let mut out = Vec::new();
        for entry in table.range::<&[u8]>((lower, upper))? {
            let (key, value) = entry?;
            let mut raw = [0u8; blobpack_core::HASH_SIZE];
            raw.copy_from_slice(key.value());
            if let Some(pos) = BlobPos::decode(value.value()) {
                out.push((BlobHash(raw), pos));
            }
            if limit != 0 && out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Persist the index of the container currently open for append.
    pub fn set_n(&self, n: u32) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(META)?;
            table.insert(N_KEY, n as u64)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// The persisted container counter; 0 when never set.
    pub fn get_n(&self) -> StoreResult<u32> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(META)?;
        Ok(table.get(N_KEY)?.map(|g| g.value() as u32).unwrap_or(0))
    }

    /// Drop every position record and the container counter.
    ///
    /// Required before a reindex; the caller opts into losing the cache.
    pub fn wipe(&self) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(POSITIONS)?;
        {
            txn.open_table(POSITIONS)?;
            let mut meta = txn.open_table(META)?;
            meta.remove(N_KEY)?;
        }
        txn.commit()?;
        debug!("position index wiped");
        Ok(())
    }
}
