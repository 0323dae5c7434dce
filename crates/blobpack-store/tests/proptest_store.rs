//! Property-based tests for the packed-file store.
//!
//! These verify the store's core invariants over arbitrary blob contents:
//! round-tripping, idempotence, and index rebuildability.

use blobpack_core::BlobHash;
use blobpack_store::{BlobStore, StoreConfig};
use proptest::prelude::*;

/// Strategy for blob payloads of assorted sizes, including empty.
fn any_blob() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..2048)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// put then get returns the original bytes, with and without compression.
    #[test]
    fn prop_put_get_round_trip(blobs in proptest::collection::vec(any_blob(), 1..8), compress in any::<bool>()) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path()).with_compression(compress);
        let store = BlobStore::open(config).unwrap();

        for data in &blobs {
            let hash = BlobHash::compute(data);
            store.put(&hash, data).unwrap();
        }
        for data in &blobs {
            let hash = BlobHash::compute(data);
            prop_assert!(store.stat(&hash).unwrap());
            prop_assert_eq!(store.get(&hash).unwrap(), data.clone());
        }
    }

    /// Double put leaves the store byte-identical on disk.
    #[test]
    fn prop_put_is_idempotent(data in any_blob()) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(StoreConfig::new(dir.path())).unwrap();

        let hash = BlobHash::compute(&data);
        store.put(&hash, &data).unwrap();
        let container = dir.path().join("blobs-00000");
        let first = std::fs::read(&container).unwrap();

        store.put(&hash, &data).unwrap();
        let second = std::fs::read(&container).unwrap();

        prop_assert_eq!(first, second);
        prop_assert_eq!(store.blob_count().unwrap(), 1);
    }

    /// A wiped index rebuilt by reindex() lists the same hashes.
    #[test]
    fn prop_reindex_restores_contents(blobs in proptest::collection::vec(any_blob(), 1..8)) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path()).with_max_container_size(4096);
        let store = BlobStore::open(config).unwrap();

        for data in &blobs {
            let hash = BlobHash::compute(data);
            store.put(&hash, data).unwrap();
        }
        let before: Vec<BlobHash> = store.enumerate().unwrap().map(|r| r.hash).collect();

        store.wipe_index().unwrap();
        store.reindex().unwrap();

        let after: Vec<BlobHash> = store.enumerate().unwrap().map(|r| r.hash).collect();
        prop_assert_eq!(before, after);

        for data in &blobs {
            let hash = BlobHash::compute(data);
            prop_assert_eq!(store.get(&hash).unwrap(), data.clone());
        }
    }
}
