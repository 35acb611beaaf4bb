//! Content-addressed blob stores.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::http_client;

/// The blob store as the swarm uses it.
pub trait BlobStore: Send + Sync + 'static {
    /// Store bytes, returning their content identifier.
    fn add(&self, data: Bytes) -> impl Future<Output = StorageResult<String>> + Send;

    fn pin(&self, cid: &str) -> impl Future<Output = StorageResult<()>> + Send;

    /// Read content directly from the local node.
    fn cat(&self, cid: &str) -> impl Future<Output = StorageResult<Bytes>> + Send;

    fn swarm_connect(&self, peer: &str) -> impl Future<Output = StorageResult<()>> + Send;

    fn swarm_peers(&self) -> impl Future<Output = StorageResult<Vec<String>>> + Send;
}

// ── IPFS HTTP API ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Deserialize)]
struct PeersResponse {
    #[serde(rename = "Peers", default)]
    peers: Option<Vec<PeerEntry>>,
}

#[derive(Deserialize)]
struct PeerEntry {
    #[serde(rename = "Addr")]
    addr: String,
    #[serde(rename = "Peer")]
    peer: String,
}

/// Client for an IPFS node's `/api/v0` HTTP API.
#[derive(Debug, Clone)]
pub struct IpfsHttpStore {
    api: String,
    timeout: Duration,
}

impl IpfsHttpStore {
    /// `api` is `host:port` of the node's API listener.
    pub fn new(api: &str) -> Self {
        Self {
            api: api.strip_prefix("http://").unwrap_or(api).trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call(&self, path: &str, content_type: Option<&str>, body: Bytes) -> StorageResult<Bytes> {
        http_client::request(http::Method::POST, &self.api, path, content_type, body, self.timeout).await
    }
}

/// Encode `data` as a single-file `multipart/form-data` body.
fn multipart(data: &[u8]) -> (String, Bytes) {
    let digest = Sha256::digest(data);
    let boundary = format!("swarmgrid-{}", hex::encode(&digest[..12]));
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"result\"\r\n");
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), Bytes::from(body))
}

impl BlobStore for IpfsHttpStore {
    async fn add(&self, data: Bytes) -> StorageResult<String> {
        let (content_type, body) = multipart(&data);
        let resp = self
            .call("/api/v0/add?pin=false", Some(&content_type), body)
            .await?;
        let parsed: AddResponse =
            serde_json::from_slice(&resp).map_err(|e| StorageError::InvalidResponse(e.to_string()))?;
        info!(cid = %parsed.hash, bytes = data.len(), "blob added");
        Ok(parsed.hash)
    }

    async fn pin(&self, cid: &str) -> StorageResult<()> {
        self.call(&format!("/api/v0/pin/add?arg={cid}"), None, Bytes::new())
            .await?;
        debug!(%cid, "pinned");
        Ok(())
    }

    async fn cat(&self, cid: &str) -> StorageResult<Bytes> {
        self.call(&format!("/api/v0/cat?arg={cid}"), None, Bytes::new())
            .await
    }

    async fn swarm_connect(&self, peer: &str) -> StorageResult<()> {
        self.call(&format!("/api/v0/swarm/connect?arg={peer}"), None, Bytes::new())
            .await?;
        debug!(%peer, "swarm connected");
        Ok(())
    }

    async fn swarm_peers(&self) -> StorageResult<Vec<String>> {
        let resp = self.call("/api/v0/swarm/peers", None, Bytes::new()).await?;
        let parsed: PeersResponse =
            serde_json::from_slice(&resp).map_err(|e| StorageError::InvalidResponse(e.to_string()))?;
        Ok(parsed
            .peers
            .unwrap_or_default()
            .into_iter()
            .map(|p| format!("{}/p2p/{}", p.addr, p.peer))
            .collect())
    }
}

// ── In-memory store ────────────────────────────────────────────────

/// Content-addressed by hex SHA-256; for tests and single-host runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Bytes>>,
    pins: Mutex<HashSet<String>>,
    peers: Mutex<Vec<String>>,
    pin_calls: AtomicU64,
    connect_calls: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cid_of(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    pub fn is_pinned(&self, cid: &str) -> bool {
        self.pins.lock().unwrap_or_else(|p| p.into_inner()).contains(cid)
    }

    pub fn pin_calls(&self) -> u64 {
        self.pin_calls.load(Ordering::Relaxed)
    }

    pub fn connect_calls(&self) -> u64 {
        self.connect_calls.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    async fn add(&self, data: Bytes) -> StorageResult<String> {
        let cid = Self::cid_of(&data);
        self.blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(cid.clone(), data);
        Ok(cid)
    }

    async fn pin(&self, cid: &str) -> StorageResult<()> {
        self.pin_calls.fetch_add(1, Ordering::Relaxed);
        if !self.blobs.lock().unwrap_or_else(|p| p.into_inner()).contains_key(cid) {
            return Err(StorageError::NotFound(cid.to_string()));
        }
        self.pins
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(cid.to_string());
        Ok(())
    }

    async fn cat(&self, cid: &str) -> StorageResult<Bytes> {
        self.blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(cid)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(cid.to_string()))
    }

    async fn swarm_connect(&self, peer: &str) -> StorageResult<()> {
        self.connect_calls.fetch_add(1, Ordering::Relaxed);
        let mut peers = self.peers.lock().unwrap_or_else(|p| p.into_inner());
        if !peers.iter().any(|p| p == peer) {
            peers.push(peer.to_string());
        }
        Ok(())
    }

    async fn swarm_peers(&self) -> StorageResult<Vec<String>> {
        Ok(self.peers.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::testing;

    #[tokio::test]
    async fn memory_store_is_content_addressed() {
        let store = MemoryBlobStore::new();
        let cid = store.add(Bytes::from_static(b"png")).await.unwrap();
        assert_eq!(cid, MemoryBlobStore::cid_of(b"png"));
        assert_eq!(store.cat(&cid).await.unwrap(), Bytes::from_static(b"png"));
        store.pin(&cid).await.unwrap();
        assert!(store.is_pinned(&cid));
        assert!(matches!(store.pin("nope").await, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn multipart_wraps_payload() {
        let (content_type, body) = multipart(b"DATA");
        let boundary = content_type.split("boundary=").nth(1).unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with(&format!("--{boundary}\r\n")));
        assert!(text.contains("\r\n\r\nDATA\r\n"));
        assert!(text.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[tokio::test]
    async fn ipfs_client_parses_api_responses() {
        let mut routes = HashMap::new();
        routes.insert(
            "/api/v0/add?pin=false".to_string(),
            (200, br#"{"Name":"result","Hash":"QmResult","Size":"9"}"#.to_vec()),
        );
        routes.insert("/api/v0/pin/add?arg=QmResult".to_string(), (200, br#"{"Pins":["QmResult"]}"#.to_vec()));
        routes.insert(
            "/api/v0/swarm/peers".to_string(),
            (200, br#"{"Peers":[{"Addr":"/ip4/10.0.0.2/tcp/4001","Peer":"QmPeer"}]}"#.to_vec()),
        );
        let (addr, _) = testing::serve(routes).await;
        let store = IpfsHttpStore::new(&addr).with_timeout(Duration::from_secs(5));

        assert_eq!(store.add(Bytes::from_static(b"image-bytes")).await.unwrap(), "QmResult");
        store.pin("QmResult").await.unwrap();
        assert_eq!(
            store.swarm_peers().await.unwrap(),
            vec!["/ip4/10.0.0.2/tcp/4001/p2p/QmPeer".to_string()]
        );
        assert!(matches!(
            store.cat("QmMissing").await,
            Err(StorageError::Status { status: 404, .. })
        ));
    }
}
