//! Session configuration for the streaming client.

use std::collections::HashMap;
use std::time::Duration;

use url::Url;

use crate::error::{MTConnectError, MTConnectResult};
use crate::types::DocumentFormat;
use crate::utils::constants::DEFAULT_MAX_FRAME_SIZE;

/// Configuration of one client session. Immutable once the client is built.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Agent base URL, e.g. `http://localhost:5000`.
    pub base_url: String,
    /// Restrict requests to one device (name or UUID).
    pub device: Option<String>,
    /// Document format requested from the Agent.
    pub format: DocumentFormat,
    /// Streaming / polling interval.
    pub interval: Duration,
    /// Heartbeat requested for idle streams.
    pub heartbeat: Duration,
    /// Wait between a failure and the next connection attempt.
    pub retry_interval: Duration,
    /// Maximum observations per sample document (`count`).
    pub max_sample_count: u64,
    /// Stream `current` snapshots instead of `sample` deltas.
    pub current_only: bool,
    /// Use a long-lived streaming connection; when `false`, poll `sample`.
    pub use_streaming: bool,
    /// Optional XPath filter (`path`).
    pub path: Option<String>,
    /// Timeout of one-shot requests.
    pub request_timeout: Duration,
    /// Maximum silence on the stream before it is considered dead.
    pub stream_timeout: Duration,
    /// Maximum text buffered while waiting for a document to close.
    pub max_frame_size: usize,
    /// Extra HTTP headers sent with every request.
    pub headers: HashMap<String, String>,
}

impl ClientConfig {
    /// Create a configuration with defaults for the given Agent URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            device: None,
            format: DocumentFormat::Xml,
            interval: Duration::from_millis(500),
            heartbeat: Duration::from_secs(10),
            retry_interval: Duration::from_secs(10),
            max_sample_count: 1000,
            current_only: false,
            use_streaming: true,
            path: None,
            request_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(30),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            headers: HashMap::new(),
        }
    }

    /// Restrict requests to one device.
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Sets the document format.
    pub fn with_format(mut self, format: DocumentFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the streaming / polling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the stream heartbeat.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Sets the retry interval.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Sets the maximum observations per sample document.
    pub fn with_max_sample_count(mut self, count: u64) -> Self {
        self.max_sample_count = count;
        self
    }

    /// Stream `current` snapshots only.
    pub fn with_current_only(mut self, current_only: bool) -> Self {
        self.current_only = current_only;
        self
    }

    /// Enable or disable the streaming connection (polling when disabled).
    pub fn with_streaming(mut self, use_streaming: bool) -> Self {
        self.use_streaming = use_streaming;
        self
    }

    /// Sets the XPath filter.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the one-shot request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the stream watchdog timeout.
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    /// Sets the frame buffer limit.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Adds an HTTP header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Checks the configuration and returns the parsed base URL.
    ///
    /// # Errors
    ///
    /// Returns [`MTConnectError::InvalidConfig`] for an unparsable or
    /// non-hierarchical base URL, a zero interval, a zero sample count, or a
    /// stream timeout not longer than the heartbeat.
    pub fn validate(&self) -> MTConnectResult<Url> {
        let url = Url::parse(&self.base_url)?;
        if url.cannot_be_a_base() {
            return Err(MTConnectError::InvalidConfig(format!(
                "'{}' cannot be used as a base URL",
                self.base_url
            )));
        }
        if self.interval.is_zero() || self.retry_interval.is_zero() {
            return Err(MTConnectError::InvalidConfig(
                "interval and retry interval must be non-zero".to_string(),
            ));
        }
        if self.max_sample_count == 0 {
            return Err(MTConnectError::InvalidConfig(
                "max sample count must be non-zero".to_string(),
            ));
        }
        if self.use_streaming && self.stream_timeout <= self.heartbeat {
            return Err(MTConnectError::InvalidConfig(format!(
                "stream timeout ({:?}) must exceed the heartbeat ({:?})",
                self.stream_timeout, self.heartbeat
            )));
        }
        Ok(url)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:5000")
    }
}
