//! Transport layer for Agent communication.
//!
//! Provides the [`Transport`] trait for abstracting over how documents are
//! fetched, and [`HttpTransport`], the `reqwest`-backed implementation used by
//! default.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use url::Url;

use crate::error::{MTConnectError, MTConnectResult};

/// A stream of raw body chunks from a long-lived response.
pub type ByteStream = Pin<Box<dyn Stream<Item = MTConnectResult<Bytes>> + Send>>;

/// Transport abstraction for Agent requests.
///
/// Implementations perform HTTP GETs. Non-2xx responses must surface as
/// [`MTConnectError::Http`] carrying the body, so the caller can try to decode
/// it as an Agent error document.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch a complete response body.
    async fn get(&self, url: &Url, accept: &str) -> MTConnectResult<Bytes>;

    /// Open a streaming response and return its body as a chunk stream once
    /// the response headers have been accepted.
    async fn get_stream(&self, url: &Url, accept: &str) -> MTConnectResult<ByteStream>;
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout of one-shot requests. Defaults to 30 seconds.
    pub timeout: Duration,
    /// Connection timeout, also applied to streaming requests. Defaults to 10 seconds.
    pub connect_timeout: Duration,
    /// Additional HTTP headers to include on every request.
    pub headers: HashMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            headers: HashMap::new(),
        }
    }
}

/// HTTP transport using `reqwest`.
///
/// The underlying `reqwest::Client` is a pooled handle; clones share the pool.
/// One-shot requests carry a per-request timeout, while streaming requests
/// are bounded only by the connect timeout (the stream reader runs its own
/// watchdog).
///
/// # Example
///
/// ```no_run
/// use mtconnect_rs::client::HttpTransport;
///
/// let transport = HttpTransport::new();
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with the default configuration.
    pub fn new() -> Self {
        Self::with_config(TransportConfig::default())
    }

    /// Create a transport with a custom configuration.
    pub fn with_config(config: TransportConfig) -> Self {
        let mut default_headers = HeaderMap::new();
        for (key, value) in &config.headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                default_headers.insert(name, val);
            } else {
                tracing::warn!(header = %key, "ignoring invalid HTTP header");
            }
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(default_headers)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            timeout: config.timeout,
        }
    }

    /// Create a transport around an existing `reqwest::Client`.
    ///
    /// Useful to share a connection pool or configure TLS externally.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn send(
        &self,
        url: &Url,
        accept: &str,
        timeout: Option<Duration>,
    ) -> MTConnectResult<reqwest::Response> {
        let mut request = self.client.get(url.clone()).header(ACCEPT, accept);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MTConnectError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url, accept: &str) -> MTConnectResult<Bytes> {
        let response = self.send(url, accept, Some(self.timeout)).await?;
        response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(url, e))
    }

    async fn get_stream(&self, url: &Url, accept: &str) -> MTConnectResult<ByteStream> {
        let response = self.send(url, accept, None).await?;
        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| MTConnectError::Transport(format!("error reading stream: {e}")))
        });
        Ok(Box::pin(stream))
    }
}

fn map_reqwest_error(url: &Url, e: reqwest::Error) -> MTConnectError {
    if e.is_timeout() {
        MTConnectError::Timeout(format!("request to {url} timed out: {e}"))
    } else if e.is_connect() {
        MTConnectError::Transport(format!("connection to {url} failed: {e}"))
    } else {
        MTConnectError::Transport(format!("request to {url} failed: {e}"))
    }
}
