//! Adapter client — the verification call made during a registration
//! handshake.
//!
//! The negotiator only depends on [`AdapterClient`], so tests and the
//! end-to-end suite can swap in a stub for the HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("invalid adapter address `{0}`")]
    InvalidAddress(String),

    #[error("adapter connection failed: {0}")]
    Connect(String),

    #[error("adapter request failed: {0}")]
    Request(String),

    #[error("adapter answered {0}")]
    Status(u16),

    #[error("adapter did not answer within {0:?}")]
    Timeout(Duration),
}

/// Calls a physical database adapter.
#[async_trait]
pub trait AdapterClient: Send + Sync {
    /// Verify the adapter at `address` is reachable and healthy.
    async fn probe(&self, address: &str) -> Result<(), AdapterError>;
}

/// Plain HTTP/1 probe: `GET {address}{probe_path}`, 2xx means healthy.
#[derive(Debug, Clone)]
pub struct HttpAdapterClient {
    probe_path: String,
    timeout: Duration,
}

impl HttpAdapterClient {
    pub fn new(probe_path: &str, timeout: Duration) -> Self {
        let probe_path = if probe_path.starts_with('/') {
            probe_path.to_string()
        } else {
            format!("/{probe_path}")
        };
        Self { probe_path, timeout }
    }
}

#[async_trait]
impl AdapterClient for HttpAdapterClient {
    async fn probe(&self, address: &str) -> Result<(), AdapterError> {
        let authority = authority_of(address)?;
        let uri = format!("http://{authority}{}", self.probe_path);

        let result = tokio::time::timeout(self.timeout, async {
            let stream = tokio::net::TcpStream::connect(authority.as_str())
                .await
                .map_err(|e| AdapterError::Connect(e.to_string()))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| AdapterError::Connect(e.to_string()))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method("GET")
                .uri(&uri)
                .header("host", &authority)
                .header("user-agent", "dbaas-registry/0.1")
                .body(http_body_util::Empty::<bytes::Bytes>::new())
                .map_err(|e| AdapterError::Request(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| AdapterError::Request(e.to_string()))?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(AdapterError::Status(resp.status().as_u16()))
            }
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!(error = %e, %uri, "adapter probe failed");
                Err(e)
            }
            Err(_) => {
                debug!(%uri, "adapter probe timed out");
                Err(AdapterError::Timeout(self.timeout))
            }
        }
    }
}

/// `host:port` to connect to. Accepts `http://host[:port][/...]` or a bare
/// `host:port`; the port defaults to 80.
fn authority_of(address: &str) -> Result<String, AdapterError> {
    let invalid = || AdapterError::InvalidAddress(address.to_string());
    let uri: http::Uri = address.trim().parse().map_err(|_| invalid())?;
    if uri.scheme_str().is_some_and(|s| s != "http") {
        return Err(invalid());
    }
    let authority = uri.authority().ok_or_else(invalid)?;
    if authority.host().is_empty() {
        return Err(invalid());
    }
    Ok(format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80)))
}
