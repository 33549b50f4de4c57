//! Builder for the streaming client session.

use std::sync::Arc;
use std::time::Duration;

use crate::client::{
    AgentClient, ClientConfig, HttpTransport, MTConnectClient, Transport, TransportConfig,
    DEFAULT_EVENT_CAPACITY,
};
use crate::error::MTConnectResult;
use crate::format::{parser_for, DocumentParser};
use crate::types::DocumentFormat;

/// Builder for an [`MTConnectClient`].
///
/// Wraps a [`ClientConfig`] and lets the transport and document parser be
/// replaced. By default the client talks HTTP through [`HttpTransport`] and
/// decodes with the built-in parser for the configured format.
///
/// # Example
///
/// ```no_run
/// use mtconnect_rs::builders::ClientBuilder;
/// use mtconnect_rs::types::DocumentFormat;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClientBuilder::new("http://localhost:5000")
///     .with_device("mill-01")
///     .with_format(DocumentFormat::Json)
///     .with_retry_interval(Duration::from_secs(5))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    parser: Option<Arc<dyn DocumentParser>>,
    event_capacity: usize,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .field("custom_parser", &self.parser.is_some())
            .field("event_capacity", &self.event_capacity)
            .finish()
    }
}

impl ClientBuilder {
    /// Create a builder for the Agent at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::from_config(ClientConfig::new(base_url))
    }

    /// Create a builder from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            parser: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Restrict requests to one device (name or UUID).
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.config = self.config.with_device(device);
        self
    }

    /// Set the document format.
    pub fn with_format(mut self, format: DocumentFormat) -> Self {
        self.config = self.config.with_format(format);
        self
    }

    /// Set the streaming / polling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_interval(interval);
        self
    }

    /// Set the heartbeat requested for idle streams.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.config = self.config.with_heartbeat(heartbeat);
        self
    }

    /// Set the wait between a failure and the next attempt.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.config = self.config.with_retry_interval(retry_interval);
        self
    }

    /// Set the maximum observations per sample document.
    pub fn with_max_sample_count(mut self, count: u64) -> Self {
        self.config = self.config.with_max_sample_count(count);
        self
    }

    /// Stream `current` snapshots instead of `sample` deltas.
    pub fn with_current_only(mut self, current_only: bool) -> Self {
        self.config = self.config.with_current_only(current_only);
        self
    }

    /// Enable or disable streaming. When disabled, the client polls.
    pub fn with_streaming(mut self, use_streaming: bool) -> Self {
        self.config = self.config.with_streaming(use_streaming);
        self
    }

    /// Set the XPath filter applied to `current` and `sample`.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.config = self.config.with_path(path);
        self
    }

    /// Set the timeout of one-shot requests.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_request_timeout(timeout);
        self
    }

    /// Set the stream watchdog timeout.
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_stream_timeout(timeout);
        self
    }

    /// Set the limit on text buffered while waiting for a document to close.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.config = self.config.with_max_frame_size(size);
        self
    }

    /// Add a custom HTTP header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config = self.config.with_header(key, value);
        self
    }

    /// Add an Authorization header with a bearer token.
    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        let value = format!("Bearer {}", token.into());
        self.with_header("Authorization", value)
    }

    /// Use a custom transport. Header and timeout settings are then the
    /// transport's responsibility.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom document parser instead of the built-in one.
    pub fn with_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Set how many events a subscriber may fall behind before it lags.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the configuration and build the client. The client is idle
    /// until [`MTConnectClient::start`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`MTConnectError::InvalidConfig`](crate::error::MTConnectError::InvalidConfig)
    /// for an invalid configuration.
    pub fn build(self) -> MTConnectResult<MTConnectClient> {
        let base_url = self.config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::with_config(TransportConfig {
                timeout: self.config.request_timeout,
                headers: self.config.headers.clone(),
                ..TransportConfig::default()
            })),
        };
        let parser = self
            .parser
            .unwrap_or_else(|| parser_for(self.config.format));

        let agent = AgentClient::new(base_url, self.config.device.clone(), transport, parser)?;
        Ok(MTConnectClient::new(self.config, agent, self.event_capacity))
    }
}
