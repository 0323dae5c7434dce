//! Live two-replica reconciliation over ephemeral-port HTTP servers.

use std::collections::HashSet;
use std::sync::Arc;

use blobpack_core::BlobHash;
use blobpack_store::{BlobStore, StoreConfig};
use blobpack_sync::{StateTree, SyncApi, SyncClient};

async fn spawn_replica(namespace: &str) -> (tempfile::TempDir, Arc<BlobStore>, String) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BlobStore::open(StoreConfig::new(dir.path())).unwrap());
    let api = Arc::new(SyncApi::new(store.clone(), namespace, None));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = api.router();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .unwrap();
    });

    (dir, store, format!("http://{addr}"))
}

/// Payloads whose hashes land in pairwise-distinct buckets.
fn distinct_prefix_payloads(n: usize) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut i = 0u64;
    while out.len() < n {
        let payload = format!("payload-{i}").into_bytes();
        if seen.insert(BlobHash::compute(&payload).hex_prefix()) {
            out.push(payload);
        }
        i += 1;
    }
    out
}

/// Two payloads sharing a bucket, plus one in a different bucket.
fn shared_prefix_payloads() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let mut by_prefix: std::collections::HashMap<String, Vec<u8>> =
        std::collections::HashMap::new();
    let mut i = 0u64;
    loop {
        let payload = format!("pair-{i}").into_bytes();
        let prefix = BlobHash::compute(&payload).hex_prefix();
        if let Some(first) = by_prefix.get(&prefix) {
            let (a, b) = (first.clone(), payload);
            // A third payload from any other bucket.
            let mut j = 0u64;
            loop {
                let other = format!("other-{j}").into_bytes();
                if BlobHash::compute(&other).hex_prefix() != prefix {
                    return (a, b, other);
                }
                j += 1;
            }
        }
        by_prefix.insert(prefix, payload);
        i += 1;
    }
}

fn put(store: &BlobStore, payload: &[u8]) -> BlobHash {
    let hash = BlobHash::compute(payload);
    store.put(&hash, payload).unwrap();
    hash
}

fn hashes(store: &BlobStore) -> Vec<String> {
    store
        .enumerate()
        .unwrap()
        .map(|r| r.hash.to_hex())
        .collect()
}

fn root_of(store: &BlobStore, ns: &str) -> String {
    let mut tree = StateTree::new(ns);
    for blob in store.enumerate().unwrap() {
        tree.add(&blob.hash);
    }
    tree.root()
}

#[tokio::test]
async fn disjoint_buckets_exchange_and_converge() {
    let payloads = distinct_prefix_payloads(4);
    let (_dir_a, store_a, _url_a) = spawn_replica("ns").await;
    let (_dir_b, store_b, url_b) = spawn_replica("ns").await;

    // A: {p0, p1, p2}; B: {p1, p2, p3}.
    let h0 = put(&store_a, &payloads[0]);
    put(&store_a, &payloads[1]);
    put(&store_a, &payloads[2]);
    put(&store_b, &payloads[1]);
    put(&store_b, &payloads[2]);
    let h3 = put(&store_b, &payloads[3]);

    let client = SyncClient::new(&url_b, "ns", None);

    // The comparison names exactly the A-only bucket as missing and the
    // B-only bucket as needed.
    let mut tree = StateTree::new("ns");
    for blob in store_a.enumerate().unwrap() {
        tree.add(&blob.hash);
    }
    let resp = client.post_state(&tree.state()).await.unwrap().unwrap();
    assert_eq!(resp.missing, vec![h0.hex_prefix()]);
    assert_eq!(resp.needed, vec![h3.hex_prefix()]);
    assert!(resp.conflicted.is_empty());

    // One round makes the replicas identical.
    let stats = client.replicate(&store_a).await.unwrap();
    assert_eq!(stats.pushed, 1);
    assert_eq!(stats.pulled, 1);
    assert!(!stats.in_sync);

    assert_eq!(hashes(&store_a), hashes(&store_b));
    assert_eq!(root_of(&store_a, "ns"), root_of(&store_b, "ns"));

    // And the next round is a no-op.
    let stats = client.replicate(&store_a).await.unwrap();
    assert!(stats.in_sync);
}

#[tokio::test]
async fn conflicted_bucket_reconciles_by_set_difference() {
    let (shared_a, shared_b, common) = shared_prefix_payloads();
    let (_dir_a, store_a, _url_a) = spawn_replica("ns").await;
    let (_dir_b, store_b, url_b) = spawn_replica("ns").await;

    // A: {common, shared_a}; B: {common, shared_b}; the shared_* pair
    // collides on a bucket prefix.
    put(&store_a, &common);
    let ha = put(&store_a, &shared_a);
    put(&store_b, &common);
    put(&store_b, &shared_b);

    let client = SyncClient::new(&url_b, "ns", None);

    let mut tree = StateTree::new("ns");
    for blob in store_a.enumerate().unwrap() {
        tree.add(&blob.hash);
    }
    let resp = client.post_state(&tree.state()).await.unwrap().unwrap();
    assert_eq!(resp.conflicted, vec![ha.hex_prefix()]);

    let stats = client.replicate(&store_a).await.unwrap();
    assert_eq!(stats.pushed, 1);
    assert_eq!(stats.pulled, 1);
    assert_eq!(hashes(&store_a), hashes(&store_b));

    // Convergence: the peer now answers 204.
    let mut tree = StateTree::new("ns");
    for blob in store_a.enumerate().unwrap() {
        tree.add(&blob.hash);
    }
    assert!(client.post_state(&tree.state()).await.unwrap().is_none());
}

#[tokio::test]
async fn empty_replicas_are_in_sync() {
    let (_dir_a, store_a, _url_a) = spawn_replica("ns").await;
    let (_dir_b, _store_b, url_b) = spawn_replica("ns").await;

    let client = SyncClient::new(&url_b, "ns", None);
    let stats = client.replicate(&store_a).await.unwrap();
    assert!(stats.in_sync);
}

#[tokio::test]
async fn trigger_endpoint_runs_a_round() {
    let payloads = distinct_prefix_payloads(2);
    let (_dir_a, store_a, url_a) = spawn_replica("ns").await;
    let (_dir_b, store_b, url_b) = spawn_replica("ns").await;

    put(&store_a, &payloads[0]);
    put(&store_b, &payloads[1]);

    // Ask A to reconcile against B.
    let response = reqwest::Client::new()
        .post(format!("{url_a}/api/sync/v1/_trigger/ns"))
        .query(&[("url", url_b.as_str())])
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let stats: blobpack_sync::SyncStats = response.json().await.unwrap();
    assert_eq!(stats.pushed, 1);
    assert_eq!(stats.pulled, 1);
    assert_eq!(hashes(&store_a), hashes(&store_b));
}

#[tokio::test]
async fn blob_transport_round_trip() {
    let (_dir_b, store_b, url_b) = spawn_replica("ns").await;
    let client = SyncClient::new(&url_b, "ns", None);

    let payload = b"transported blob".to_vec();
    let hash = BlobHash::compute(&payload);

    assert!(!client.head_blob(&hash).await.unwrap());
    assert!(client.get_blob(&hash).await.unwrap().is_none());

    client.put_blob(&hash, payload.clone()).await.unwrap();
    assert!(client.head_blob(&hash).await.unwrap());
    assert_eq!(client.get_blob(&hash).await.unwrap(), Some(payload.clone()));
    assert_eq!(store_b.get(&hash).unwrap(), payload);
}
