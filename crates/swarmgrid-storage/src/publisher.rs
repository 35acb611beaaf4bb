//! Publishing results and resolving inputs.

use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, select_ok};
use swarm_core::config::StorageConfig;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::http_client;
use crate::store::BlobStore;
use crate::ttl_cache::TtlCache;

pub struct ResultPublisher<S: BlobStore> {
    store: S,
    gateways: Vec<String>,
    attempts: u32,
    backoff: Duration,
    gateway_timeout: Duration,
    pins: Mutex<TtlCache>,
    peers: Mutex<TtlCache>,
}

impl<S: BlobStore> ResultPublisher<S> {
    pub fn new(store: S, config: &StorageConfig) -> Self {
        let ttl = config.pin_ttl();
        Self {
            store,
            gateways: config.gateways.clone(),
            attempts: config.fetch_attempts.max(1),
            backoff: Duration::from_millis(500),
            gateway_timeout: Duration::from_secs(20),
            pins: Mutex::new(TtlCache::new(ttl)),
            peers: Mutex::new(TtlCache::new(ttl)),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Upload and pin, returning the content identifier.
    ///
    /// A CID pinned within the cache lifetime is not pinned again.
    pub async fn publish(&self, data: Bytes) -> StorageResult<String> {
        let size = data.len();
        let cid = self.store.add(data).await?;
        if self.pins.lock().unwrap_or_else(|p| p.into_inner()).contains(&cid) {
            debug!(%cid, "already pinned");
        } else {
            self.store.pin(&cid).await?;
            self.pins.lock().unwrap_or_else(|p| p.into_inner()).insert(&cid);
        }
        info!(%cid, bytes = size, "result published");
        Ok(cid)
    }

    /// Resolve content from the local node and every mirror at once.
    ///
    /// The first response accepted by `validate` wins. After
    /// `fetch_attempts` rounds without one the content is unresolvable.
    pub async fn fetch<F>(&self, cid: &str, validate: F) -> StorageResult<Bytes>
    where
        F: Fn(&[u8]) -> bool + Send + Sync,
    {
        for attempt in 1..=self.attempts {
            let mut sources: Vec<BoxFuture<'_, StorageResult<Bytes>>> = Vec::new();
            let validate = &validate;
            sources.push(
                async move {
                    let body = self.store.cat(cid).await?;
                    accept(body, validate, "local node")
                }
                .boxed(),
            );
            for template in &self.gateways {
                let url = gateway_url(template, cid);
                let timeout = self.gateway_timeout;
                sources.push(
                    async move {
                        let body = http_client::get(&url, timeout).await?;
                        accept(body, validate, &url)
                    }
                    .boxed(),
                );
            }

            match select_ok(sources).await {
                Ok((body, _rest)) => {
                    debug!(%cid, attempt, bytes = body.len(), "content resolved");
                    return Ok(body);
                }
                Err(e) => {
                    warn!(%cid, attempt, error = %e, "fetch round failed");
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
            }
        }
        Err(StorageError::UnresolvableContent(cid.to_string()))
    }

    /// Connect to peers not connected recently; returns how many were dialed.
    pub async fn connect_peers(&self, peers: &[String]) -> usize {
        let mut dialed = 0;
        for peer in peers {
            if self.peers.lock().unwrap_or_else(|p| p.into_inner()).contains(peer) {
                continue;
            }
            match self.store.swarm_connect(peer).await {
                Ok(()) => {
                    self.peers.lock().unwrap_or_else(|p| p.into_inner()).insert(peer);
                    dialed += 1;
                }
                Err(e) => warn!(%peer, error = %e, "swarm connect failed"),
            }
        }
        dialed
    }

    /// Seed the peer cache from the node's current connections.
    pub async fn refresh_peers(&self) -> StorageResult<usize> {
        let peers = self.store.swarm_peers().await?;
        let mut cache = self.peers.lock().unwrap_or_else(|p| p.into_inner());
        cache.purge_expired();
        for peer in &peers {
            cache.insert(peer);
        }
        Ok(peers.len())
    }
}

fn accept(body: Bytes, validate: &(dyn Fn(&[u8]) -> bool + Send + Sync), source: &str) -> StorageResult<Bytes> {
    if validate(&body) {
        Ok(body)
    } else {
        Err(StorageError::InvalidResponse(format!("undecodable content from {source}")))
    }
}

/// Expand a mirror template; templates without `{cid}` get it appended.
pub fn gateway_url(template: &str, cid: &str) -> String {
    if template.contains("{cid}") {
        template.replace("{cid}", cid)
    } else {
        format!("{}/{cid}", template.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::testing;
    use crate::store::MemoryBlobStore;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    fn config(gateways: Vec<String>) -> StorageConfig {
        StorageConfig {
            gateways,
            fetch_attempts: 2,
            ..StorageConfig::default()
        }
    }

    #[test]
    fn template_expansion() {
        assert_eq!(gateway_url("gw:8080/ipfs/{cid}", "Qm1"), "gw:8080/ipfs/Qm1");
        assert_eq!(gateway_url("http://gw/ipfs/", "Qm1"), "http://gw/ipfs/Qm1");
    }

    #[tokio::test]
    async fn publish_pins_once_per_ttl() {
        let publisher = ResultPublisher::new(MemoryBlobStore::new(), &config(vec![]));
        let a = publisher.publish(Bytes::from_static(b"img")).await.unwrap();
        let b = publisher.publish(Bytes::from_static(b"img")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(publisher.store().pin_calls(), 1);
        assert!(publisher.store().is_pinned(&a));
    }

    #[tokio::test]
    async fn fetch_prefers_any_valid_mirror() {
        let mut routes = HashMap::new();
        routes.insert("/ipfs/QmInput".to_string(), (200, b"PNG-input".to_vec()));
        let (good, _) = testing::serve(routes).await;
        let (bad, _) = testing::serve(HashMap::new()).await;

        let publisher = ResultPublisher::new(
            MemoryBlobStore::new(),
            &config(vec![format!("{bad}/ipfs/{{cid}}"), format!("{good}/ipfs/{{cid}}")]),
        );
        let body = publisher
            .fetch("QmInput", |b| b.starts_with(b"PNG"))
            .await
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"PNG-input"));
    }

    #[tokio::test]
    async fn undecodable_content_is_rejected() {
        let mut routes = HashMap::new();
        routes.insert("/ipfs/QmJunk".to_string(), (200, b"<html>".to_vec()));
        let (gw, hits) = testing::serve(routes).await;

        let publisher = ResultPublisher::new(MemoryBlobStore::new(), &config(vec![format!("{gw}/ipfs/{{cid}}")]))
            .with_backoff(Duration::from_millis(1));
        let err = publisher.fetch("QmJunk", |b| b.starts_with(b"PNG")).await.unwrap_err();
        assert!(matches!(err, StorageError::UnresolvableContent(cid) if cid == "QmJunk"));
        assert_eq!(hits.load(Ordering::SeqCst), 2, "one request per attempt");
    }

    #[tokio::test]
    async fn local_node_satisfies_fetch() {
        let publisher = ResultPublisher::new(MemoryBlobStore::new(), &config(vec![]));
        let cid = publisher.publish(Bytes::from_static(b"PNG-local")).await.unwrap();
        let body = publisher.fetch(&cid, |_| true).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"PNG-local"));
    }

    #[tokio::test]
    async fn known_peers_are_not_redialed() {
        let publisher = ResultPublisher::new(MemoryBlobStore::new(), &config(vec![]));
        let peers = vec!["/ip4/10.0.0.2/tcp/4001/p2p/QmA".to_string()];
        assert_eq!(publisher.connect_peers(&peers).await, 1);
        assert_eq!(publisher.connect_peers(&peers).await, 0);
        assert_eq!(publisher.store().connect_calls(), 1);
        assert_eq!(publisher.refresh_peers().await.unwrap(), 1);
    }
}
