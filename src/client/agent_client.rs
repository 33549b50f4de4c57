//! One-shot requests against an Agent's non-streaming endpoints.
//!
//! [`AgentClient`] builds request URLs, performs the GET through a
//! [`Transport`], and decodes the body as the expected document. Bodies that
//! do not decode are retried as an `MTConnectError` document before giving up.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{MTConnectError, MTConnectResult};
use crate::format::DocumentParser;
use crate::types::{AssetsDocument, DevicesDocument, DocumentFormat, StreamsDocument};

use super::transport::{ByteStream, Transport};

/// Parameters of a `sample` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRequest {
    /// First sequence to return.
    pub from: Option<u64>,
    /// Sequence to stop before.
    pub to: Option<u64>,
    /// Maximum observations.
    pub count: Option<u64>,
    /// Streaming interval; turns the request into a long-lived stream.
    pub interval: Option<Duration>,
    /// Heartbeat for an idle stream.
    pub heartbeat: Option<Duration>,
    /// XPath filter.
    pub path: Option<String>,
}

impl SampleRequest {
    /// An empty request (Agent defaults).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `from`.
    pub fn from(mut self, sequence: u64) -> Self {
        self.from = Some(sequence);
        self
    }

    /// Sets `to`.
    pub fn to(mut self, sequence: u64) -> Self {
        self.to = Some(sequence);
        self
    }

    /// Sets `count`.
    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets `interval`.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Sets `heartbeat`.
    pub fn heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Sets `path`.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Stateless client for the probe, current, sample and assets endpoints.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use mtconnect_rs::client::{AgentClient, HttpTransport};
/// use mtconnect_rs::format::XmlParser;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = AgentClient::new(
///     "http://localhost:5000".parse()?,
///     None,
///     Arc::new(HttpTransport::new()),
///     Arc::new(XmlParser),
/// )?;
/// let devices = client.probe().await?;
/// println!("{} devices", devices.devices.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AgentClient {
    base_url: Url,
    device: Option<String>,
    transport: Arc<dyn Transport>,
    parser: Arc<dyn DocumentParser>,
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClient")
            .field("base_url", &self.base_url.as_str())
            .field("device", &self.device)
            .field("format", &self.parser.format())
            .finish_non_exhaustive()
    }
}

impl AgentClient {
    /// Create a client for the Agent at `base_url`, optionally scoped to one
    /// device.
    ///
    /// # Errors
    ///
    /// Returns [`MTConnectError::InvalidConfig`] if `base_url` cannot carry a
    /// path (e.g. `mailto:` URLs).
    pub fn new(
        base_url: Url,
        device: Option<String>,
        transport: Arc<dyn Transport>,
        parser: Arc<dyn DocumentParser>,
    ) -> MTConnectResult<Self> {
        if base_url.cannot_be_a_base() {
            return Err(MTConnectError::InvalidConfig(format!(
                "'{base_url}' cannot be used as a base URL"
            )));
        }
        Ok(Self {
            base_url,
            device,
            transport,
            parser,
        })
    }

    /// The document format in use.
    pub fn format(&self) -> DocumentFormat {
        self.parser.format()
    }

    /// The parser in use.
    pub fn parser(&self) -> &Arc<dyn DocumentParser> {
        &self.parser
    }

    // ──────────────────────────────────────────────────
    // URL construction
    // ──────────────────────────────────────────────────

    /// URL of the `probe` request.
    pub fn probe_url(&self) -> Url {
        let mut url = self.endpoint(&["probe"], true);
        self.push_format(&mut url);
        url
    }

    /// URL of a `current` request.
    pub fn current_url(&self, at: Option<u64>, path: Option<&str>, interval: Option<Duration>) -> Url {
        let mut url = self.endpoint(&["current"], true);
        {
            let mut query = url.query_pairs_mut();
            if let Some(at) = at {
                query.append_pair("at", &at.to_string());
            }
            if let Some(path) = path {
                query.append_pair("path", path);
            }
            if let Some(interval) = interval {
                query.append_pair("interval", &interval.as_millis().to_string());
            }
        }
        self.push_format(&mut url);
        url
    }

    /// URL of a `sample` request.
    pub fn sample_url(&self, request: &SampleRequest) -> Url {
        let mut url = self.endpoint(&["sample"], true);
        {
            let mut query = url.query_pairs_mut();
            if let Some(from) = request.from {
                query.append_pair("from", &from.to_string());
            }
            if let Some(to) = request.to {
                query.append_pair("to", &to.to_string());
            }
            if let Some(count) = request.count {
                query.append_pair("count", &count.to_string());
            }
            if let Some(interval) = request.interval {
                query.append_pair("interval", &interval.as_millis().to_string());
            }
            if let Some(heartbeat) = request.heartbeat {
                query.append_pair("heartbeat", &heartbeat.as_millis().to_string());
            }
            if let Some(path) = &request.path {
                query.append_pair("path", path);
            }
        }
        self.push_format(&mut url);
        url
    }

    /// URL of an `assets` request. Assets are not scoped by device path.
    pub fn assets_url(&self, asset_type: Option<&str>, count: Option<u64>) -> Url {
        let mut url = self.endpoint(&["assets"], false);
        {
            let mut query = url.query_pairs_mut();
            if let Some(asset_type) = asset_type {
                query.append_pair("type", asset_type);
            }
            if let Some(count) = count {
                query.append_pair("count", &count.to_string());
            }
        }
        self.push_format(&mut url);
        url
    }

    /// URL of a single-asset request.
    pub fn asset_url(&self, asset_id: &str) -> Url {
        let mut url = self.endpoint(&["assets", asset_id], false);
        self.push_format(&mut url);
        url
    }

    fn endpoint(&self, segments: &[&str], scoped: bool) -> Url {
        let mut url = self.base_url.clone();
        url.set_query(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            if scoped {
                if let Some(device) = &self.device {
                    path.push(device);
                }
            }
            path.extend(segments);
        }
        url
    }

    /// XML is the Agent default and needs no parameter.
    fn push_format(&self, url: &mut Url) {
        let format = self.parser.format();
        if format != DocumentFormat::Xml {
            url.query_pairs_mut()
                .append_pair("documentFormat", format.as_str());
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
    }

    // ──────────────────────────────────────────────────
    // Requests
    // ──────────────────────────────────────────────────

    /// Fetch the device model (`probe`).
    pub async fn probe(&self) -> MTConnectResult<DevicesDocument> {
        let body = self.fetch(&self.probe_url()).await?;
        self.decode(&body, |p, b| p.parse_devices(b))
    }

    /// Fetch a snapshot (`current`), optionally at a past sequence.
    pub async fn current(&self, at: Option<u64>, path: Option<&str>) -> MTConnectResult<StreamsDocument> {
        let body = self.fetch(&self.current_url(at, path, None)).await?;
        self.decode(&body, |p, b| p.parse_streams(b))
    }

    /// Fetch one sample document. `request.interval` must be unset; use
    /// [`open_stream`](Self::open_stream) for streaming.
    pub async fn sample(&self, request: &SampleRequest) -> MTConnectResult<StreamsDocument> {
        let body = self.fetch(&self.sample_url(request)).await?;
        self.decode(&body, |p, b| p.parse_streams(b))
    }

    /// Fetch assets, optionally filtered by type and count.
    pub async fn assets(&self, asset_type: Option<&str>, count: Option<u64>) -> MTConnectResult<AssetsDocument> {
        let body = self.fetch(&self.assets_url(asset_type, count)).await?;
        self.decode(&body, |p, b| p.parse_assets(b))
    }

    /// Fetch one asset by id.
    pub async fn asset(&self, asset_id: &str) -> MTConnectResult<AssetsDocument> {
        let body = self.fetch(&self.asset_url(asset_id)).await?;
        self.decode(&body, |p, b| p.parse_assets(b))
    }

    /// Open a streaming request at `url`.
    pub async fn open_stream(&self, url: &Url) -> MTConnectResult<ByteStream> {
        tracing::debug!(%url, "opening stream");
        self.transport
            .get_stream(url, self.parser.format().content_type())
            .await
            .map_err(|e| self.protocol_error_from_status(e))
    }

    /// Decode a body as the expected document, falling back to an error
    /// document.
    ///
    /// # Errors
    ///
    /// [`MTConnectError::Protocol`] if the body is an Agent error document,
    /// [`MTConnectError::Decode`] if it is neither.
    pub fn decode<T>(
        &self,
        body: &[u8],
        expected: impl FnOnce(&dyn DocumentParser, &[u8]) -> MTConnectResult<T>,
    ) -> MTConnectResult<T> {
        let parser = self.parser.as_ref();
        match expected(parser, body) {
            Ok(doc) => Ok(doc),
            Err(expected_err) => match parser.parse_error(body) {
                Ok(error_doc) => Err(MTConnectError::Protocol(Arc::new(error_doc))),
                Err(_) => Err(match expected_err {
                    MTConnectError::Decode(msg) => MTConnectError::Decode(msg),
                    other => MTConnectError::Decode(other.to_string()),
                }),
            },
        }
    }

    async fn fetch(&self, url: &Url) -> MTConnectResult<bytes::Bytes> {
        tracing::debug!(%url, "requesting document");
        self.transport
            .get(url, self.parser.format().content_type())
            .await
            .map_err(|e| self.protocol_error_from_status(e))
    }

    /// Agents answer bad requests with a 4xx status and an error document.
    fn protocol_error_from_status(&self, err: MTConnectError) -> MTConnectError {
        match err {
            MTConnectError::Http { status, body } => match self.parser.parse_error(body.as_bytes()) {
                Ok(doc) => MTConnectError::Protocol(Arc::new(doc)),
                Err(_) => MTConnectError::Http { status, body },
            },
            other => other,
        }
    }
}
