//! End-to-end filetree tests: stream in, read back, deduplicate.

use blobpack_core::BlobHash;
use blobpack_filetree::{ChunkerParams, FileReader, FileWriter, Node, Pol};
use blobpack_store::{BlobStore, StoreConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn small_params() -> ChunkerParams {
    ChunkerParams {
        pol: Pol(blobpack_store::DEFAULT_CHUNKER_POLYNOMIAL),
        min_size: 1024,
        max_size: 16 * 1024,
        avg_bits: 11,
    }
}

fn random_data(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

#[test]
fn stream_round_trip_with_content_hash() {
    let dir = tempfile::tempdir().unwrap();
    let store = BlobStore::open(StoreConfig::new(dir.path())).unwrap();
    let writer = FileWriter::with_params(&store, small_params());

    let data = random_data(1 << 20, 42);
    let node = writer.put_reader("big.bin", &data[..], None).unwrap();

    assert_eq!(node.size, data.len() as u64);
    assert_eq!(
        node.content_hash.as_deref(),
        Some(BlobHash::compute(&data).to_hex().as_str())
    );

    let mut reader = FileReader::new(&store, &node).unwrap();
    assert_eq!(reader.read_at(0, data.len()).unwrap(), data);
}

#[test]
fn node_survives_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let data = random_data(200_000, 43);

    let node_hash = {
        let store = BlobStore::open(StoreConfig::new(dir.path())).unwrap();
        let writer = FileWriter::with_params(&store, small_params());
        let node = writer.put_reader("persisted", &data[..], None).unwrap();
        node.hash.unwrap()
    };

    let store = BlobStore::open(StoreConfig::new(dir.path())).unwrap();
    let node = Node::decode(&store.get(&node_hash).unwrap()).unwrap();
    let mut reader = FileReader::new(&store, &node).unwrap();
    assert_eq!(reader.read_at(0, data.len()).unwrap(), data);
}

#[test]
fn appending_shares_the_common_prefix_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let store = BlobStore::open(StoreConfig::new(dir.path())).unwrap();
    let writer = FileWriter::with_params(&store, small_params());

    let mut data = random_data(500_000, 44);
    let original = writer.put_reader("v1", &data[..], None).unwrap();

    // Append to the stream: content-defined boundaries keep every earlier
    // chunk identical, so only the tail is new.
    data.extend_from_slice(&random_data(10_000, 45));
    let extended = writer.put_reader("v2", &data[..], None).unwrap();

    let original_refs: Vec<BlobHash> = original
        .indexed_refs()
        .unwrap()
        .into_iter()
        .map(|(_, h)| h)
        .collect();
    let extended_refs: Vec<BlobHash> = extended
        .indexed_refs()
        .unwrap()
        .into_iter()
        .map(|(_, h)| h)
        .collect();

    let shared = original_refs
        .iter()
        .filter(|h| extended_refs.contains(h))
        .count();
    assert!(
        shared >= original_refs.len() - 1,
        "expected all but the final chunk shared, got {shared}/{}",
        original_refs.len()
    );

    let mut reader = FileReader::new(&store, &extended).unwrap();
    assert_eq!(reader.read_at(0, data.len()).unwrap(), data);
}

#[test]
fn compressed_store_round_trips_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new(dir.path()).with_compression(true);
    let store = BlobStore::open(config).unwrap();
    let writer = FileWriter::with_params(&store, small_params());

    // Compressible content exercises the Snappy path end to end.
    let data: Vec<u8> = b"abcdefgh".repeat(40_000);
    let node = writer.put_reader("text", &data[..], None).unwrap();

    let mut reader = FileReader::new(&store, &node).unwrap();
    assert_eq!(reader.read_at(0, data.len()).unwrap(), data);
}
