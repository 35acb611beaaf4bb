//! Minimal HTTP/1 client over a fresh TCP connection per request.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// `host:port` and path of a `http://` URL or bare `host:port/path`.
pub fn split_url(url: &str) -> (&str, String) {
    let rest = url.strip_prefix("http://").unwrap_or(url);
    match rest.find('/') {
        Some(idx) => (&rest[..idx], rest[idx..].to_string()),
        None => (rest, "/".to_string()),
    }
}

/// Send one request and return the body of a 2xx response.
pub async fn request(
    method: http::Method,
    address: &str,
    path: &str,
    content_type: Option<&str>,
    body: Bytes,
    timeout: Duration,
) -> StorageResult<Bytes> {
    let uri = format!("http://{address}{path}");
    let exchange = async {
        let stream = tokio::net::TcpStream::connect(address).await?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| StorageError::Http(e.to_string()))?;

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = http::Request::builder()
            .method(method)
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "swarmgrid-storage/0.1");
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        let req = builder
            .body(Full::new(body))
            .map_err(|e| StorageError::Http(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| StorageError::Http(e.to_string()))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| StorageError::Http(e.to_string()))?
            .to_bytes();
        if !status.is_success() {
            debug!(%status, %uri, "non-2xx response");
            return Err(StorageError::Status {
                url: uri.clone(),
                status: status.as_u16(),
            });
        }
        Ok::<_, StorageError>(bytes)
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(uri)),
    }
}

pub async fn get(url: &str, timeout: Duration) -> StorageResult<Bytes> {
    let (address, path) = split_url(url);
    request(http::Method::GET, address, &path, None, Bytes::new(), timeout).await
}
