//! Blob store facade: `put`/`get`/`stat`/`delete`/`enumerate` over the
//! packed containers and the position index.
//!
//! Concurrency: a single writer mutex serialises every mutating operation
//! (and enumeration, which walks the index). Reads resolve a position
//! record, which is immutable once written, and do positional I/O on read-only
//! handles, so they never contend with the writer.

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use blobpack_core::BlobHash;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::index::{BlobIndex, BlobPos, INDEX_DIR};
use crate::packed::{encode_frame, flags, FrameHeader, PackedWriter, FRAME_OVERHEAD};
use crate::scan::{scan_containers, ScanReport};

/// A hash with its stored payload size, as yielded by enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizedBlobRef {
    /// Blob identity.
    pub hash: BlobHash,
    /// Payload size as stored (after compression, if any).
    pub size: u32,
}

fn poisoned() -> StoreError {
    StoreError::Policy("store lock poisoned".to_string())
}

/// A content-addressed blob store over one directory of container files.
pub struct BlobStore {
    config: StoreConfig,
    index: BlobIndex,
    writer: Mutex<PackedWriter>,
    readers: RwLock<HashMap<u32, Arc<File>>>,
}

impl BlobStore {
    /// Open or create a store in `config.dir`.
    ///
    /// If the position index directory is missing (first open, or the cache
    /// was discarded), the index is rebuilt from the containers before the
    /// store is handed out.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        std::fs::create_dir_all(&config.dir)?;
        let had_index = config.dir.join(INDEX_DIR).exists();
        let index = BlobIndex::open(&config.dir)?;
        let (writer, reader_files) =
            PackedWriter::open(&config.dir, config.max_container_size)?;

        let mut readers = HashMap::new();
        for (n, file) in reader_files {
            readers.insert(n, Arc::new(file));
        }
        index.set_n(writer.n())?;

        let store = BlobStore {
            config,
            index,
            writer: Mutex::new(writer),
            readers: RwLock::new(readers),
        };
        if !had_index {
            info!(dir = %store.config.dir.display(), "index missing, rebuilding from containers");
            store.reindex()?;
        }
        Ok(store)
    }

    /// The configuration this store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Store a blob under its hash. Idempotent: a put of an already-present
    /// hash succeeds without writing anything.
    ///
    /// The store trusts that `hash == H(data)`; callers compute the hash.
    pub fn put(&self, hash: &BlobHash, data: &[u8]) -> StoreResult<()> {
        if data.len() > u32::MAX as usize {
            return Err(StoreError::Policy(format!(
                "blob exceeds maximum size: {} bytes",
                data.len()
            )));
        }

        let mut writer = self.writer.lock().map_err(|_| poisoned())?;

        if self.index.get_pos(hash)?.is_some() {
            debug!(%hash, "blob already stored");
            return Ok(());
        }

        let frame = if self.config.compression {
            let packed = codec::compress(data)?;
            encode_frame(hash.as_bytes(), flags::COMPRESSED, &packed)
        } else {
            encode_frame(hash.as_bytes(), 0, data)
        };
        let payload_size = (frame.len() - FRAME_OVERHEAD) as u32;

        // Frames are atomic: roll over before writing rather than ever
        // splitting a frame across containers.
        if writer.needs_rollover(frame.len()) {
            let (n, reader) = writer.roll_over()?;
            self.readers
                .write()
                .map_err(|_| poisoned())?
                .insert(n, Arc::new(reader));
            self.index.set_n(n)?;
        }

        let (n, offset) = writer.append_frame(&frame)?;
        self.index.set_pos(
            hash,
            &BlobPos {
                n,
                offset,
                size: payload_size,
            },
        )?;
        debug!(%hash, container = n, offset, size = payload_size, "blob stored");
        Ok(())
    }

    /// Fetch a blob's plaintext. Verifies the hash on read; a frame that
    /// fails verification (bit flip, concurrent tombstone) is reported as
    /// `NotFound` rather than handed back.
    pub fn get(&self, hash: &BlobHash) -> StoreResult<Vec<u8>> {
        let pos = self
            .index
            .get_pos(hash)?
            .ok_or(StoreError::NotFound { hash: *hash })?;

        let file = {
            let readers = self.readers.read().map_err(|_| poisoned())?;
            readers.get(&pos.n).cloned()
        }
        .ok_or_else(|| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("container {} is not open", pos.n),
            ))
        })?;

        let mut buf = vec![0u8; FRAME_OVERHEAD + pos.size as usize];
        file.read_exact_at(&mut buf, pos.offset)?;

        let mut prefix = [0u8; FRAME_OVERHEAD];
        prefix.copy_from_slice(&buf[..FRAME_OVERHEAD]);
        let header = FrameHeader::parse(&prefix);

        if header.is_deleted() {
            return Err(StoreError::NotFound { hash: *hash });
        }

        let payload = &buf[FRAME_OVERHEAD..];
        let plain = if header.is_compressed() {
            match codec::decompress(payload) {
                Ok(plain) => plain,
                Err(e) => {
                    warn!(%hash, container = pos.n, offset = pos.offset, error = %e,
                        "stored payload failed to decode");
                    return Err(StoreError::NotFound { hash: *hash });
                }
            }
        } else {
            payload.to_vec()
        };

        if BlobHash::compute(&plain) != *hash {
            warn!(%hash, container = pos.n, offset = pos.offset,
                "stored payload failed verification");
            return Err(StoreError::NotFound { hash: *hash });
        }
        Ok(plain)
    }

    /// True when an index entry exists for `hash`. No file I/O.
    pub fn stat(&self, hash: &BlobHash) -> StoreResult<bool> {
        Ok(self.index.get_pos(hash)?.is_some())
    }

    /// Tombstone the blob's frame, drop its index entry and punch a hole
    /// over the payload (best effort).
    pub fn delete(&self, hash: &BlobHash) -> StoreResult<()> {
        let mut writer = self.writer.lock().map_err(|_| poisoned())?;

        let pos = self
            .index
            .get_pos(hash)?
            .ok_or(StoreError::NotFound { hash: *hash })?;

        writer.mark_deleted(&pos)?;
        self.index.delete_pos(hash)?;
        if let Err(e) = writer.punch_payload(&pos) {
            warn!(%hash, container = pos.n, error = %e, "hole punch failed");
        }
        debug!(%hash, container = pos.n, offset = pos.offset, "blob deleted");
        Ok(())
    }

    /// Every stored blob in lexicographic hash order.
    pub fn enumerate(&self) -> StoreResult<impl Iterator<Item = SizedBlobRef>> {
        self.enumerate_range(None, None, 0)
    }

    /// Stored blobs with `start <= hash < end`, capped at `limit`
    /// (`0` = unlimited), in lexicographic hash order.
    pub fn enumerate_range(
        &self,
        start: Option<&BlobHash>,
        end: Option<&BlobHash>,
        limit: usize,
    ) -> StoreResult<impl Iterator<Item = SizedBlobRef>> {
        // Serialised with writers while the index iterator runs.
        let _writer = self.writer.lock().map_err(|_| poisoned())?;
        let entries = self.index.list_range(start, end, limit)?;
        Ok(entries
            .into_iter()
            .map(|(hash, pos)| SizedBlobRef {
                hash,
                size: pos.size,
            }))
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> StoreResult<u64> {
        self.index.count()
    }

    /// Verify every frame in every container without touching the index.
    pub fn scan(&self, deadline: Option<Instant>) -> StoreResult<ScanReport> {
        let _writer = self.writer.lock().map_err(|_| poisoned())?;
        scan_containers(&self.config.dir, deadline, |_| Ok(()))
    }

    /// Drop every index entry. The next [`BlobStore::reindex`] rebuilds
    /// them from the containers.
    pub fn wipe_index(&self) -> StoreResult<()> {
        let _writer = self.writer.lock().map_err(|_| poisoned())?;
        self.index.wipe()
    }

    /// Rebuild the position index by scanning every container.
    ///
    /// Refuses to run over a non-empty index: wipe it first. A scan that
    /// finds corrupt frames indexes nothing extra and surfaces
    /// [`StoreError::Corrupted`] with every offending position.
    pub fn reindex(&self) -> StoreResult<()> {
        let _writer = self.writer.lock().map_err(|_| poisoned())?;
        if !self.index.is_empty()? {
            return Err(StoreError::Policy(
                "refusing to re-index a non-empty index; wipe it first".to_string(),
            ));
        }

        info!(dir = %self.config.dir.display(), "re-indexing containers");
        let index = &self.index;
        let report = scan_containers(&self.config.dir, None, |entry| {
            index.set_pos(&entry.hash, &entry.pos)
        })?;

        if !report.corrupted.is_empty() {
            return Err(StoreError::Corrupted {
                positions: report.corrupted,
            });
        }

        let n = report.containers.saturating_sub(1);
        self.index.set_n(n)?;
        info!(
            blobs = report.blobs,
            containers = report.containers,
            "re-index complete"
        );
        Ok(())
    }
}
