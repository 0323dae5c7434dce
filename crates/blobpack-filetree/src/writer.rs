//! Streaming file writer: bytes → chunks → blobs → metadata node.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use blobpack_core::{BlobHash, Hasher};
use blobpack_store::BlobStore;
use tracing::debug;

use crate::chunker::{ChunkSplitter, ChunkerParams};
use crate::error::FiletreeResult;
use crate::node::Node;

/// Tees everything read from the inner reader into a running hash, so the
/// full-content hash costs no extra pass.
struct HashingReader<'a, R> {
    inner: R,
    hasher: &'a mut Hasher,
}

impl<R: Read> Read for HashingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Uploads byte streams into the store as chunked files.
pub struct FileWriter<'a> {
    store: &'a BlobStore,
    params: ChunkerParams,
}

impl<'a> FileWriter<'a> {
    /// A writer using the store's configured chunker polynomial and the
    /// default chunk sizes.
    pub fn new(store: &'a BlobStore) -> Self {
        FileWriter {
            store,
            params: ChunkerParams::new(store.config().chunker_polynomial),
        }
    }

    /// A writer with explicit chunker parameters.
    pub fn with_params(store: &'a BlobStore, params: ChunkerParams) -> Self {
        FileWriter { store, params }
    }

    /// Stream `reader` into the store under `name`: chunk, deduplicate,
    /// record refs, then store the metadata node. Returns the node with its
    /// hash filled in; the hash is the file handle.
    ///
    /// Reading the chunks back in ref order reproduces the stream exactly,
    /// and the node's `content_hash` is the hex BLAKE2b-256 of the stream.
    pub fn put_reader(
        &self,
        name: &str,
        reader: impl Read,
        extra: Option<BTreeMap<String, serde_json::Value>>,
    ) -> FiletreeResult<Node> {
        let mut node = Node::file(name);
        node.mod_time = unix_now();
        if let Some(extra) = extra {
            node.extra = extra;
        }
        self.write_reader(reader, &mut node)?;
        self.put_node(&mut node)?;
        Ok(node)
    }

    /// Upload the file at `path`, capturing its name, mode and mtime.
    pub fn put_file(&self, path: &Path) -> FiletreeResult<Node> {
        let meta = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut node = Node::file(&name);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            node.mode = meta.permissions().mode();
        }
        node.mod_time = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_else(unix_now);

        if meta.len() > 0 {
            let file = std::fs::File::open(path)?;
            self.write_reader(file, &mut node)?;
        }
        self.put_node(&mut node)?;
        Ok(node)
    }

    /// Serialize a node and store it (deduplicated like any blob), setting
    /// `node.hash`.
    pub fn put_node(&self, node: &mut Node) -> FiletreeResult<()> {
        let (hash, raw) = node.encode()?;
        if !self.store.stat(&hash)? {
            self.store.put(&hash, &raw)?;
        }
        node.hash = Some(hash);
        Ok(())
    }

    fn write_reader(&self, reader: impl Read, node: &mut Node) -> FiletreeResult<()> {
        let mut full_hash = Hasher::new();
        let tee = HashingReader {
            inner: reader,
            hasher: &mut full_hash,
        };

        let mut splitter = ChunkSplitter::new(tee, self.params)?;
        let mut offset_end = 0u64;
        let mut stored = 0u64;
        let mut skipped = 0u64;

        while let Some(chunk) = splitter.next_chunk()? {
            let hash = BlobHash::compute(&chunk.data);
            if self.store.stat(&hash)? {
                skipped += 1;
            } else {
                self.store.put(&hash, &chunk.data)?;
                stored += 1;
            }
            offset_end += chunk.len() as u64;
            node.add_indexed_ref(offset_end, hash);
        }
        drop(splitter);

        node.size = offset_end;
        node.content_hash = Some(full_hash.finalize().to_hex());
        debug!(
            name = %node.name,
            size = node.size,
            chunks_stored = stored,
            chunks_skipped = skipped,
            "stream written"
        );
        Ok(())
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
