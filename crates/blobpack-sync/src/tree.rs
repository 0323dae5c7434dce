//! Two-level Merkle state tree over a namespace's blob-hash set.
//!
//! Hashes are routed to one of 256 buckets by their first two hex
//! characters. The bucket hash is the BLAKE2b-256 of every hex hash in the
//! bucket concatenated in lexicographic order; the root covers the whole
//! set the same way. Feeding the hashers in sorted order is what makes the
//! tree deterministic across replicas: the set is kept in a `BTreeSet` so
//! insertion order can never leak into the summaries.

use std::collections::{BTreeMap, BTreeSet};

use blobpack_core::{BlobHash, Hasher};
use serde::{Deserialize, Serialize};

/// Compact summary of one replica's hash set, exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Namespace the summary covers.
    pub namespace: String,
    /// Hex hash over the full sorted hash set.
    pub root: String,
    /// Number of hashes in the set.
    pub count: u64,
    /// Bucket prefix → bucket hash, for every non-empty bucket.
    pub leafs: BTreeMap<String, String>,
}

/// Full hash list of a single bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafState {
    /// Namespace the bucket belongs to.
    pub namespace: String,
    /// The two-hex-character bucket prefix.
    pub prefix: String,
    /// Number of hashes in the bucket.
    pub count: u64,
    /// Hex hashes in lexicographic order.
    pub hashes: Vec<String>,
}

/// Bucket-level comparison result returned to the posting peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResp {
    /// Buckets present on both sides with differing hashes.
    pub conflicted: Vec<String>,
    /// Buckets only the responder has; the poster should pull them.
    pub needed: Vec<String>,
    /// Buckets only the poster has; the poster should push them.
    pub missing: Vec<String>,
}

impl SyncResp {
    /// True when the comparison found nothing to exchange.
    pub fn is_empty(&self) -> bool {
        self.conflicted.is_empty() && self.needed.is_empty() && self.missing.is_empty()
    }
}

/// The tree itself: a sorted, deduplicated hash set with summaries
/// computed on demand.
#[derive(Debug, Clone)]
pub struct StateTree {
    namespace: String,
    hashes: BTreeSet<String>,
}

impl StateTree {
    /// An empty tree for `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        StateTree {
            namespace: namespace.into(),
            hashes: BTreeSet::new(),
        }
    }

    /// Route a hash into the tree. Duplicates are absorbed.
    pub fn add(&mut self, hash: &BlobHash) {
        self.hashes.insert(hash.to_hex());
    }

    /// Route an already-hex hash into the tree.
    pub fn add_hex(&mut self, hex: String) {
        self.hashes.insert(hex);
    }

    /// Number of distinct hashes.
    pub fn count(&self) -> u64 {
        self.hashes.len() as u64
    }

    /// Hex root hash over the full sorted set.
    pub fn root(&self) -> String {
        let mut hasher = Hasher::new();
        for hex in &self.hashes {
            hasher.update(hex.as_bytes());
        }
        hasher.finalize().to_hex()
    }

    /// Bucket prefix → bucket hash for every non-empty bucket.
    pub fn leafs(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let mut current: Option<(String, Hasher)> = None;

        for hex in &self.hashes {
            let prefix = &hex[..2];
            match &mut current {
                Some((p, hasher)) if p == prefix => hasher.update(hex.as_bytes()),
                _ => {
                    if let Some((p, hasher)) = current.take() {
                        out.insert(p, hasher.finalize().to_hex());
                    }
                    let mut hasher = Hasher::new();
                    hasher.update(hex.as_bytes());
                    current = Some((prefix.to_string(), hasher));
                }
            }
        }
        if let Some((p, hasher)) = current {
            out.insert(p, hasher.finalize().to_hex());
        }
        out
    }

    /// The sorted hash list of one bucket.
    pub fn bucket(&self, prefix: &str) -> Vec<String> {
        self.hashes
            .iter()
            .filter(|h| h.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// The exchangeable summary.
    pub fn state(&self) -> State {
        State {
            namespace: self.namespace.clone(),
            root: self.root(),
            count: self.count(),
            leafs: self.leafs(),
        }
    }

    /// The full list of one bucket as a wire body.
    pub fn leaf_state(&self, prefix: &str) -> LeafState {
        let hashes = self.bucket(prefix);
        LeafState {
            namespace: self.namespace.clone(),
            prefix: prefix.to_string(),
            count: hashes.len() as u64,
            hashes,
        }
    }
}

/// Compare the responder's summary (`ours`) against the posting peer's
/// (`theirs`). Naming follows the poster's point of view: `missing` buckets
/// exist only on the poster's side, `needed` buckets only on the
/// responder's.
pub fn diff(ours: &State, theirs: &State) -> SyncResp {
    let mut resp = SyncResp::default();

    for (prefix, their_hash) in &theirs.leafs {
        match ours.leafs.get(prefix) {
            Some(our_hash) if our_hash != their_hash => {
                resp.conflicted.push(prefix.clone());
            }
            Some(_) => {}
            None => resp.missing.push(prefix.clone()),
        }
    }
    for prefix in ours.leafs.keys() {
        if !theirs.leafs.contains_key(prefix) {
            resp.needed.push(prefix.clone());
        }
    }
    resp
}
