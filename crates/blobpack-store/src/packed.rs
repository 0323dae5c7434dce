//! Append-only container files ("packed files") holding blob frames.
//!
//! A container starts with the 6-byte magic `\x00Blobs` followed by frames:
//!
//! ```text
//! frame := hash[32] | flags[1] | size[4, little-endian] | payload[size]
//! ```
//!
//! Frames never span containers. Committed bytes are never rewritten except
//! for the single flags byte a deletion tombstones in place.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use blobpack_core::hash::HASH_SIZE;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::index::BlobPos;

/// Magic bytes at the start of every container file.
pub const CONTAINER_MAGIC: &[u8; 6] = b"\x00Blobs";

/// Bytes of metadata stored per frame: 32-byte hash + 1 flags byte +
/// 4-byte little-endian payload size.
pub const FRAME_OVERHEAD: usize = HASH_SIZE + 1 + 4;

/// Frame flag bits.
pub mod flags {
    /// The frame was tombstoned; its payload may have been hole-punched.
    pub const DELETED: u8 = 1;
    /// The payload is Snappy-compressed.
    pub const COMPRESSED: u8 = 1 << 1;
    /// Reserved; never set by this implementation.
    pub const ENCRYPTED: u8 = 1 << 2;
    /// Reserved for parity data; never set by this implementation.
    pub const PARITY_CHUNK: u8 = 1 << 3;
}

/// Decoded frame metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Claimed hash of the plaintext payload.
    pub hash: [u8; HASH_SIZE],
    /// Flag bits.
    pub flags: u8,
    /// Payload size in bytes (after compression, if any).
    pub size: u32,
}

impl FrameHeader {
    /// Parse the fixed-size frame prefix.
    pub fn parse(buf: &[u8; FRAME_OVERHEAD]) -> Self {
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&buf[..HASH_SIZE]);
        let flags = buf[HASH_SIZE];
        let size = u32::from_le_bytes([
            buf[HASH_SIZE + 1],
            buf[HASH_SIZE + 2],
            buf[HASH_SIZE + 3],
            buf[HASH_SIZE + 4],
        ]);
        FrameHeader { hash, flags, size }
    }

    /// True if the tombstone bit is set.
    pub fn is_deleted(&self) -> bool {
        self.flags & flags::DELETED != 0
    }

    /// True if the payload is Snappy-compressed.
    pub fn is_compressed(&self) -> bool {
        self.flags & flags::COMPRESSED != 0
    }
}

/// Encode a complete frame for the given payload.
pub fn encode_frame(hash: &[u8; HASH_SIZE], frame_flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    frame.extend_from_slice(hash);
    frame.push(frame_flags);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Path of container `n` inside the store directory.
pub fn container_path(dir: &Path, n: u32) -> PathBuf {
    dir.join(format!("blobs-{n:05}"))
}

/// Open container `n` read-only and validate its magic.
///
/// Returns `Ok(None)` when the container does not exist.
pub fn open_container_read(dir: &Path, n: u32) -> StoreResult<Option<File>> {
    let path = container_path(dir, n);
    let mut file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut magic = [0u8; CONTAINER_MAGIC.len()];
    if file.read_exact(&mut magic).is_err() || &magic != CONTAINER_MAGIC {
        return Err(StoreError::BadMagic { path });
    }
    Ok(Some(file))
}

/// Reserve `len` bytes for the file without changing its logical size.
#[cfg(target_os = "linux")]
fn preallocate(file: &File, len: u64) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let ret = unsafe {
        libc::fallocate(
            file.as_raw_fd(),
            libc::FALLOC_FL_KEEP_SIZE,
            0,
            len as libc::off_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn preallocate(_file: &File, _len: u64) -> std::io::Result<()> {
    Ok(())
}

/// Deallocate the byte range, keeping the file size. Reads of the range
/// return zeros afterwards.
#[cfg(target_os = "linux")]
fn punch_hole(file: &File, offset: u64, len: u64) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let ret = unsafe {
        libc::fallocate(
            file.as_raw_fd(),
            libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
            offset as libc::off_t,
            len as libc::off_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn punch_hole(_file: &File, _offset: u64, _len: u64) -> std::io::Result<()> {
    Ok(())
}

/// Append side of the container set: the single writable container plus the
/// bookkeeping to roll over to the next one.
#[derive(Debug)]
pub struct PackedWriter {
    dir: PathBuf,
    max_size: u64,
    n: u32,
    current: File,
    size: u64,
}

impl PackedWriter {
    /// Open a store directory: validate every existing container in
    /// ascending order, open the highest-numbered one for append (creating
    /// container 0 if the directory holds none).
    ///
    /// Returns the writer and a read-only handle per existing container.
    pub fn open(dir: &Path, max_size: u64) -> StoreResult<(Self, Vec<(u32, File)>)> {
        let mut readers = Vec::new();
        let mut n = 0u32;
        while let Some(file) = open_container_read(dir, n)? {
            debug!(container = n, "container loaded");
            readers.push((n, file));
            n += 1;
        }

        let writer = if readers.is_empty() {
            let current = Self::create_container(dir, 0, max_size)?;
            let reader = open_container_read(dir, 0)?
                .expect("container 0 exists after creation");
            readers.push((0, reader));
            PackedWriter {
                dir: dir.to_path_buf(),
                max_size,
                n: 0,
                current,
                size: CONTAINER_MAGIC.len() as u64,
            }
        } else {
            let last = n - 1;
            let path = container_path(dir, last);
            let current = OpenOptions::new().read(true).write(true).open(&path)?;
            let size = current.metadata()?.len();
            info!(container = last, size, "container opened for append");
            PackedWriter {
                dir: dir.to_path_buf(),
                max_size,
                n: last,
                current,
                size,
            }
        };

        Ok((writer, readers))
    }

    fn create_container(dir: &Path, n: u32, max_size: u64) -> StoreResult<File> {
        let path = container_path(dir, n);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if let Err(e) = preallocate(&file, max_size) {
            warn!(container = n, error = %e, "preallocation failed, growing on write");
        }
        file.write_all_at(CONTAINER_MAGIC, 0)?;
        file.sync_all()?;
        info!(container = n, "container created");
        Ok(file)
    }

    /// Index of the container currently open for append.
    pub fn n(&self) -> u32 {
        self.n
    }

    /// Append offset of the current container.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// True when appending `frame_len` more bytes would exceed the
    /// rollover threshold.
    pub fn needs_rollover(&self, frame_len: usize) -> bool {
        self.size + frame_len as u64 > self.max_size
    }

    /// Close the current container for append and switch to a freshly
    /// created successor. Returns the new container index and a validated
    /// read-only handle for it; the caller installs the handle and persists
    /// the new `n` before releasing the store lock.
    pub fn roll_over(&mut self) -> StoreResult<(u32, File)> {
        let next = self.n + 1;
        debug!(container = next, "rolling over to a new container");
        let current = Self::create_container(&self.dir, next, self.max_size)?;
        let reader = open_container_read(&self.dir, next)?
            .expect("container exists after creation");
        self.current = current;
        self.n = next;
        self.size = CONTAINER_MAGIC.len() as u64;
        Ok((next, reader))
    }

    /// Write a whole frame at the append offset and fsync. Returns the
    /// container index and the offset of the frame's first byte.
    pub fn append_frame(&mut self, frame: &[u8]) -> StoreResult<(u32, u64)> {
        let offset = self.size;
        self.current.write_all_at(frame, offset)?;
        self.current.sync_data()?;
        self.size += frame.len() as u64;
        Ok((self.n, offset))
    }

    /// Set the tombstone bit on the frame at `pos`, preserving the other
    /// flag bits.
    pub fn mark_deleted(&mut self, pos: &BlobPos) -> StoreResult<()> {
        let flags_offset = pos.offset + HASH_SIZE as u64;
        if pos.n == self.n {
            let mut flag = [0u8; 1];
            self.current.read_exact_at(&mut flag, flags_offset)?;
            flag[0] |= flags::DELETED;
            self.current.write_all_at(&flag, flags_offset)?;
            self.current.sync_data()?;
        } else {
            let path = container_path(&self.dir, pos.n);
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            let mut flag = [0u8; 1];
            file.read_exact_at(&mut flag, flags_offset)?;
            flag[0] |= flags::DELETED;
            file.write_all_at(&flag, flags_offset)?;
            file.sync_data()?;
        }
        Ok(())
    }

    /// Best-effort hole punch of the payload range of a tombstoned frame.
    pub fn punch_payload(&mut self, pos: &BlobPos) -> StoreResult<()> {
        let payload_offset = pos.offset + FRAME_OVERHEAD as u64;
        if pos.n == self.n {
            punch_hole(&self.current, payload_offset, pos.size as u64)?;
        } else {
            let path = container_path(&self.dir, pos.n);
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            punch_hole(&file, payload_offset, pos.size as u64)?;
        }
        Ok(())
    }
}
