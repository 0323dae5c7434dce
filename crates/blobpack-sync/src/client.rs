//! Client side of the sync protocol: talks to a peer's sync and blob
//! transport endpoints and drives reconciliation rounds.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use blobpack_core::BlobHash;
use blobpack_store::BlobStore;

use crate::error::{SyncError, SyncResult};
use crate::tree::{LeafState, State, StateTree, SyncResp};

/// Outcome of one replication round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    /// Blobs uploaded to the peer.
    pub pushed: u64,
    /// Blobs fetched from the peer.
    pub pulled: u64,
    /// True when the roots already matched and nothing was exchanged.
    pub in_sync: bool,
}

/// HTTP client for one peer and one namespace.
pub struct SyncClient {
    http: reqwest::Client,
    base_url: String,
    namespace: String,
    api_key: Option<String>,
}

impl SyncClient {
    /// A client for the peer at `base_url` (scheme + host + port).
    pub fn new(
        base_url: impl Into<String>,
        namespace: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        SyncClient {
            http: reqwest::Client::new(),
            base_url,
            namespace: namespace.into(),
            api_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header(reqwest::header::USER_AGENT, "blobpack-sync");
        if let Some(key) = &self.api_key {
            builder = builder.basic_auth("", Some(key));
        }
        builder
    }

    async fn unexpected(response: reqwest::Response) -> SyncError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        SyncError::Remote { status, body }
    }

    /// The peer's full tree summary.
    pub async fn state(&self) -> SyncResult<State> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/sync/v1/_state/{}", self.namespace),
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response).await);
        }
        Ok(response.json().await?)
    }

    /// The peer's hash list for one bucket.
    pub async fn leafs(&self, prefix: &str) -> SyncResult<LeafState> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/sync/v1/_state/{}/leafs/{prefix}", self.namespace),
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response).await);
        }
        Ok(response.json().await?)
    }

    /// POST our summary; `None` means the peer's root matches ours.
    pub async fn post_state(&self, state: &State) -> SyncResult<Option<SyncResp>> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/sync/v1/{}", self.namespace),
            )
            .json(state)
            .send()
            .await?;
        match response.status() {
            reqwest::StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            _ => Err(Self::unexpected(response).await),
        }
    }

    /// True when the peer holds the blob. Index lookup only on their side.
    pub async fn head_blob(&self, hash: &BlobHash) -> SyncResult<bool> {
        let response = self
            .request(
                reqwest::Method::HEAD,
                &format!("/api/blobstore/blob/{}", hash.to_hex()),
            )
            .send()
            .await?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(Self::unexpected(response).await),
        }
    }

    /// Fetch a blob; `None` when the peer does not hold it.
    pub async fn get_blob(&self, hash: &BlobHash) -> SyncResult<Option<Vec<u8>>> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/blobstore/blob/{}", hash.to_hex()),
            )
            .send()
            .await?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            _ => Err(Self::unexpected(response).await),
        }
    }

    /// Upload one blob via the multipart transport.
    pub async fn put_blob(&self, hash: &BlobHash, data: Vec<u8>) -> SyncResult<()> {
        let hex = hash.to_hex();
        let part = reqwest::multipart::Part::bytes(data).file_name(hex.clone());
        let form = reqwest::multipart::Form::new().part(hex, part);

        let response = self
            .request(reqwest::Method::POST, "/api/blobstore/upload")
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response).await);
        }
        Ok(())
    }

    /// Run one reconciliation round of `store` against the peer.
    ///
    /// Buckets the peer lacks are pushed wholesale, buckets we lack are
    /// pulled wholesale, and buckets that disagree are reconciled by set
    /// difference over their hash lists. Safe to interrupt and retry:
    /// every transfer is an idempotent put.
    pub async fn replicate(&self, store: &BlobStore) -> SyncResult<SyncStats> {
        let mut tree = StateTree::new(&self.namespace);
        for blob in store.enumerate()? {
            tree.add(&blob.hash);
        }
        let local = tree.state();

        let Some(resp) = self.post_state(&local).await? else {
            debug!(namespace = %self.namespace, "replicas already in sync");
            return Ok(SyncStats {
                in_sync: true,
                ..SyncStats::default()
            });
        };

        let mut stats = SyncStats::default();

        // Buckets only we have: upload everything in them.
        for prefix in &resp.missing {
            for hex in tree.bucket(prefix) {
                let hash = BlobHash::from_hex(&hex)?;
                let data = store.get(&hash)?;
                self.put_blob(&hash, data).await?;
                stats.pushed += 1;
            }
        }

        // Buckets only the peer has: fetch their list and pull every blob.
        for prefix in &resp.needed {
            let leaf = self.leafs(prefix).await?;
            for hex in &leaf.hashes {
                let hash = BlobHash::from_hex(hex)?;
                if store.stat(&hash)? {
                    continue;
                }
                if let Some(data) = self.get_blob(&hash).await? {
                    self.store_verified(store, &hash, &data)?;
                    stats.pulled += 1;
                }
            }
        }

        // Buckets that disagree: reconcile by symmetric difference.
        for prefix in &resp.conflicted {
            let leaf = self.leafs(prefix).await?;
            let remote: std::collections::BTreeSet<String> =
                leaf.hashes.into_iter().collect();
            let local: std::collections::BTreeSet<String> =
                tree.bucket(prefix).into_iter().collect();

            for hex in remote.difference(&local) {
                let hash = BlobHash::from_hex(hex)?;
                if let Some(data) = self.get_blob(&hash).await? {
                    self.store_verified(store, &hash, &data)?;
                    stats.pulled += 1;
                }
            }
            for hex in local.difference(&remote) {
                let hash = BlobHash::from_hex(hex)?;
                let data = store.get(&hash)?;
                self.put_blob(&hash, data).await?;
                stats.pushed += 1;
            }
        }

        info!(
            namespace = %self.namespace,
            pushed = stats.pushed,
            pulled = stats.pulled,
            "replication round complete"
        );
        Ok(stats)
    }

    fn store_verified(
        &self,
        store: &BlobStore,
        hash: &BlobHash,
        data: &[u8],
    ) -> SyncResult<()> {
        if BlobHash::compute(data) != *hash {
            return Err(SyncError::BlobVerification { hash: *hash });
        }
        store.put(hash, data)?;
        Ok(())
    }
}
