//! File and directory metadata nodes.
//!
//! A node is a JSON blob stored like any other: its hash is the handle to
//! the file or directory it describes. File nodes reference their chunks as
//! `[offset_end, hash]` pairs sorted by offset; dir nodes reference child
//! nodes by bare hash. Content addressing makes the resulting graph a DAG:
//! a node's hash cannot appear inside its own bytes.

use std::collections::BTreeMap;

use blobpack_core::BlobHash;
use serde::{Deserialize, Serialize};

use crate::error::{FiletreeError, FiletreeResult};

/// Node type tag for regular files.
pub const NODE_TYPE_FILE: &str = "file";

/// Node type tag for directories.
pub const NODE_TYPE_DIR: &str = "dir";

/// A reference held by a node: files index their chunks by end offset,
/// directories point straight at child nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeRef {
    /// `[offset_end, chunk_hash]`: the chunk covering stream bytes
    /// `[offset_end - len, offset_end)`.
    Indexed(u64, BlobHash),
    /// A bare child-node hash (directory entry).
    Direct(BlobHash),
}

impl NodeRef {
    /// The referenced hash, whichever form the ref takes.
    pub fn hash(&self) -> &BlobHash {
        match self {
            NodeRef::Indexed(_, h) => h,
            NodeRef::Direct(h) => h,
        }
    }
}

/// A file or directory metadata node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// File or directory name.
    pub name: String,
    /// `"file"` or `"dir"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Total content size in bytes (files) or 0 (dirs).
    pub size: u64,
    /// Unix mode bits.
    #[serde(default)]
    pub mode: u32,
    /// Modification time, seconds since the Unix epoch.
    #[serde(rename = "mtime", default)]
    pub mod_time: i64,
    /// Chunk or child references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<NodeRef>,
    /// Hex BLAKE2b-256 of the complete file contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Caller-supplied metadata. A BTreeMap keeps the JSON encoding (and
    /// therefore the node's hash) deterministic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,

    /// Hash of the encoded node, filled in after a put. Never serialized.
    #[serde(skip)]
    pub hash: Option<BlobHash>,
}

impl Node {
    /// A fresh file node.
    pub fn file(name: &str) -> Self {
        Node {
            name: name.to_string(),
            kind: NODE_TYPE_FILE.to_string(),
            size: 0,
            mode: 0o644,
            mod_time: 0,
            refs: Vec::new(),
            content_hash: None,
            extra: BTreeMap::new(),
            hash: None,
        }
    }

    /// A directory node over the given children.
    pub fn dir(name: &str, children: Vec<BlobHash>) -> Self {
        Node {
            name: name.to_string(),
            kind: NODE_TYPE_DIR.to_string(),
            size: 0,
            mode: 0o755,
            mod_time: 0,
            refs: children.into_iter().map(NodeRef::Direct).collect(),
            content_hash: None,
            extra: BTreeMap::new(),
            hash: None,
        }
    }

    /// True for file nodes.
    pub fn is_file(&self) -> bool {
        self.kind == NODE_TYPE_FILE
    }

    /// True for directory nodes.
    pub fn is_dir(&self) -> bool {
        self.kind == NODE_TYPE_DIR
    }

    /// Append a chunk ref ending at `offset_end`.
    pub fn add_indexed_ref(&mut self, offset_end: u64, hash: BlobHash) {
        self.refs.push(NodeRef::Indexed(offset_end, hash));
    }

    /// Every hash this node references, for graph walkers (GC, sync).
    pub fn children(&self) -> Vec<BlobHash> {
        self.refs.iter().map(|r| *r.hash()).collect()
    }

    /// The sorted `(offset_end, hash)` chunk list of a file node.
    pub fn indexed_refs(&self) -> FiletreeResult<Vec<(u64, BlobHash)>> {
        self.refs
            .iter()
            .map(|r| match r {
                NodeRef::Indexed(end, h) => Ok((*end, *h)),
                NodeRef::Direct(_) => Err(FiletreeError::MalformedNode(format!(
                    "file node {:?} carries an unindexed ref",
                    self.name
                ))),
            })
            .collect()
    }

    /// Serialize the node and hash the encoding. The hash is the node's
    /// identity in the store.
    pub fn encode(&self) -> FiletreeResult<(BlobHash, Vec<u8>)> {
        let raw = serde_json::to_vec(self)?;
        Ok((BlobHash::compute(&raw), raw))
    }

    /// Decode a node blob.
    pub fn decode(raw: &[u8]) -> FiletreeResult<Node> {
        Ok(serde_json::from_slice(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut node = Node::file("report.pdf");
        node.size = 1234;
        node.mod_time = 1_700_000_000;
        node.add_indexed_ref(1000, BlobHash::compute(b"chunk-1"));
        node.add_indexed_ref(1234, BlobHash::compute(b"chunk-2"));
        node.content_hash = Some(BlobHash::compute(b"full").to_hex());

        let (hash, raw) = node.encode().unwrap();
        let decoded = Node::decode(&raw).unwrap();
        assert_eq!(decoded, node);
        // Re-encoding is deterministic, so the hash is stable.
        let (hash2, _) = decoded.encode().unwrap();
        assert_eq!(hash, hash2);
    }

    #[test]
    fn refs_serialize_as_pairs_and_strings() {
        let chunk = BlobHash::compute(b"c");
        let mut file = Node::file("f");
        file.add_indexed_ref(42, chunk);
        let js = serde_json::to_value(&file).unwrap();
        assert_eq!(
            js["refs"][0],
            serde_json::json!([42, chunk.to_hex()])
        );

        let child = BlobHash::compute(b"child");
        let dir = Node::dir("d", vec![child]);
        let js = serde_json::to_value(&dir).unwrap();
        assert_eq!(js["refs"][0], serde_json::json!(child.to_hex()));
        assert_eq!(js["type"], "dir");
    }

    #[test]
    fn children_covers_both_ref_kinds() {
        let a = BlobHash::compute(b"a");
        let b = BlobHash::compute(b"b");
        let mut file = Node::file("f");
        file.add_indexed_ref(10, a);
        file.add_indexed_ref(20, b);
        assert_eq!(file.children(), vec![a, b]);

        let dir = Node::dir("d", vec![a, b]);
        assert_eq!(dir.children(), vec![a, b]);
    }

    #[test]
    fn indexed_refs_rejects_dir_style_refs() {
        let mut node = Node::file("broken");
        node.refs.push(NodeRef::Direct(BlobHash::compute(b"x")));
        assert!(matches!(
            node.indexed_refs(),
            Err(FiletreeError::MalformedNode(_))
        ));
    }

    #[test]
    fn extra_metadata_round_trips() {
        let mut node = Node::file("tagged");
        node.extra
            .insert("owner".to_string(), serde_json::json!("alice"));
        let (_, raw) = node.encode().unwrap();
        let decoded = Node::decode(&raw).unwrap();
        assert_eq!(decoded.extra["owner"], serde_json::json!("alice"));
    }
}
