//! Random-access reads over a file node's chunk list.

use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::sync::Arc;

use blobpack_core::BlobHash;
use blobpack_store::BlobStore;
use lru::LruCache;

use crate::error::{FiletreeError, FiletreeResult};
use crate::node::Node;

const CHUNK_CACHE_SIZE: usize = 8;

/// Reads a chunked file back out of the store.
///
/// `read_at` binary-searches the node's `(offset_end, hash)` list for the
/// first chunk ending past the requested offset, then walks successive
/// chunks until the request is satisfied. Implements [`Read`] and [`Seek`]
/// so a node can be served like a plain file.
pub struct FileReader<'a> {
    store: &'a BlobStore,
    refs: Vec<(u64, BlobHash)>,
    size: u64,
    pos: u64,
    cache: LruCache<BlobHash, Arc<Vec<u8>>>,
}

impl<'a> FileReader<'a> {
    /// Open a reader over a file node.
    pub fn new(store: &'a BlobStore, node: &Node) -> FiletreeResult<Self> {
        if !node.is_file() {
            return Err(FiletreeError::MalformedNode(format!(
                "node {:?} is not a file ({})",
                node.name, node.kind
            )));
        }
        Ok(FileReader {
            store,
            refs: node.indexed_refs()?,
            size: node.size,
            pos: 0,
            cache: LruCache::new(NonZeroUsize::new(CHUNK_CACHE_SIZE).expect("nonzero")),
        })
    }

    /// Total file size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read up to `n` bytes starting at `offset`. Returns fewer bytes only
    /// at end of file.
    pub fn read_at(&mut self, offset: u64, n: usize) -> FiletreeResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut offset = offset;

        while out.len() < n && offset < self.size {
            let idx = self.refs.partition_point(|(end, _)| *end <= offset);
            if idx >= self.refs.len() {
                return Err(FiletreeError::MalformedNode(format!(
                    "no chunk covers offset {offset} (size {})",
                    self.size
                )));
            }
            let (end, hash) = self.refs[idx];
            let chunk = self.fetch(&hash)?;

            let chunk_start = end - chunk.len() as u64;
            let inner = (offset - chunk_start) as usize;
            let take = (n - out.len()).min(chunk.len() - inner);
            out.extend_from_slice(&chunk[inner..inner + take]);
            offset += take as u64;
        }
        Ok(out)
    }

    fn fetch(&mut self, hash: &BlobHash) -> FiletreeResult<Arc<Vec<u8>>> {
        if let Some(chunk) = self.cache.get(hash) {
            return Ok(chunk.clone());
        }
        let chunk = Arc::new(self.store.get(hash)?);
        self.cache.put(*hash, chunk.clone());
        Ok(chunk)
    }
}

impl Read for FileReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let data = self
            .read_at(self.pos, buf.len())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        buf[..data.len()].copy_from_slice(&data);
        self.pos += data.len() as u64;
        Ok(data.len())
    }
}

impl Seek for FileReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.size as i64 + delta,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}
