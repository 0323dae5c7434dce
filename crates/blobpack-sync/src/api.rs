//! HTTP surface for anti-entropy sync and blob transport.
//!
//! Sync endpoints (JSON bodies):
//! - `GET  /api/sync/v1/_state/{ns}` returns the namespace's tree summary.
//! - `GET  /api/sync/v1/_state/{ns}/leafs/{prefix}` lists one bucket's hashes.
//! - `POST /api/sync/v1/{ns}` compares the poster's summary against ours;
//!   `204` when the roots match, else the bucket-level diff.
//! - `POST /api/sync/v1/_trigger/{ns}?url=...` runs a replication round
//!   against a remote peer.
//!
//! Blob transport:
//! - `GET|HEAD /api/blobstore/blob/{hash}`, multipart
//!   `POST /api/blobstore/upload`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use tracing::{info, warn};

use blobpack_core::BlobHash;
use blobpack_store::{BlobStore, StoreError};

use crate::client::SyncClient;
use crate::error::SyncResult;
use crate::tree::{diff, State as TreeState, StateTree};

/// Shared state behind the sync and blob-transport routes.
pub struct SyncApi {
    store: Arc<BlobStore>,
    namespace: String,
    api_key: Option<String>,
}

impl SyncApi {
    /// A new API over one store serving one namespace. When `api_key` is
    /// set, every route requires it as a Basic password.
    pub fn new(store: Arc<BlobStore>, namespace: impl Into<String>, api_key: Option<String>) -> Self {
        SyncApi {
            store,
            namespace: namespace.into(),
            api_key,
        }
    }

    /// Build the state tree from the store's current hash set.
    fn tree(&self) -> SyncResult<StateTree> {
        let mut tree = StateTree::new(&self.namespace);
        for blob in self.store.enumerate()? {
            tree.add(&blob.hash);
        }
        Ok(tree)
    }

    /// The full router, auth applied.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/api/sync/v1/_state/{ns}", get(state_handler))
            .route("/api/sync/v1/_state/{ns}/leafs/{prefix}", get(leafs_handler))
            .route("/api/sync/v1/_trigger/{ns}", post(trigger_handler))
            .route("/api/sync/v1/{ns}", post(sync_handler))
            .route(
                "/api/blobstore/blob/{hash}",
                get(get_blob_handler).head(head_blob_handler),
            )
            .route("/api/blobstore/upload", post(upload_handler))
            .layer(axum::middleware::from_fn_with_state(
                self.clone(),
                auth_middleware,
            ))
            .with_state(self)
    }

    /// Bind and serve until the task is dropped.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "sync API listening");
        axum::serve(listener, router.into_make_service()).await?;
        Ok(())
    }
}

async fn auth_middleware(
    State(api): State<Arc<SyncApi>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = &api.api_key else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|b64| BASE64.decode(b64).ok())
        .and_then(|raw| String::from_utf8(raw).ok())
        .and_then(|cred| cred.split_once(':').map(|(_, pw)| pw == expected))
        .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
    }
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    warn!(error = %e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

async fn state_handler(
    State(api): State<Arc<SyncApi>>,
    Path(ns): Path<String>,
) -> Response {
    if ns != api.namespace {
        return StatusCode::NOT_FOUND.into_response();
    }
    match api.tree() {
        Ok(tree) => Json(tree.state()).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn leafs_handler(
    State(api): State<Arc<SyncApi>>,
    Path((ns, prefix)): Path<(String, String)>,
) -> Response {
    if ns != api.namespace {
        return StatusCode::NOT_FOUND.into_response();
    }
    match api.tree() {
        Ok(tree) => Json(tree.leaf_state(&prefix)).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn sync_handler(
    State(api): State<Arc<SyncApi>>,
    Path(ns): Path<String>,
    Json(remote): Json<TreeState>,
) -> Response {
    if ns != api.namespace {
        return StatusCode::NOT_FOUND.into_response();
    }
    let local = match api.tree() {
        Ok(tree) => tree.state(),
        Err(e) => return internal_error(e),
    };

    if local.root == remote.root {
        info!(%ns, root = %local.root, "replicas in sync");
        return StatusCode::NO_CONTENT.into_response();
    }

    let resp = diff(&local, &remote);
    info!(
        %ns,
        conflicted = resp.conflicted.len(),
        needed = resp.needed.len(),
        missing = resp.missing.len(),
        "state comparison"
    );
    Json(resp).into_response()
}

#[derive(Debug, Deserialize)]
struct TriggerQuery {
    url: String,
    api_key: Option<String>,
}

async fn trigger_handler(
    State(api): State<Arc<SyncApi>>,
    Path(ns): Path<String>,
    Query(query): Query<TriggerQuery>,
) -> Response {
    if ns != api.namespace {
        return StatusCode::NOT_FOUND.into_response();
    }
    info!(%ns, url = %query.url, "sync triggered");
    let client = SyncClient::new(&query.url, &ns, query.api_key);
    match client.replicate(&api.store).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn get_blob_handler(
    State(api): State<Arc<SyncApi>>,
    Path(hash): Path<String>,
) -> Response {
    let hash = match BlobHash::from_hex(&hash) {
        Ok(h) => h,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    match api.store.get(&hash) {
        Ok(data) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            data,
        )
            .into_response(),
        Err(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error(e),
    }
}

async fn head_blob_handler(
    State(api): State<Arc<SyncApi>>,
    Path(hash): Path<String>,
) -> Response {
    let hash = match BlobHash::from_hex(&hash) {
        Ok(h) => h,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    match api.store.stat(&hash) {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error(e),
    }
}

async fn upload_handler(
    State(api): State<Arc<SyncApi>>,
    mut multipart: Multipart,
) -> Response {
    let mut stored = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        };
        let claimed = field.name().map(str::to_string);
        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        };

        let hash = BlobHash::compute(&data);
        if let Some(claimed) = claimed {
            match BlobHash::from_hex(&claimed) {
                Ok(h) if h == hash => {}
                _ => {
                    return (
                        StatusCode::BAD_REQUEST,
                        format!("field {claimed} does not match content hash {hash}"),
                    )
                        .into_response();
                }
            }
        }
        if let Err(e) = api.store.put(&hash, &data) {
            return internal_error(e);
        }
        stored.push(hash.to_hex());
    }
    Json(serde_json::json!({ "stored": stored })).into_response()
}
