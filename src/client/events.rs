//! Client notifications and their fan-out.
//!
//! Every notification the session raises is a [`ClientEvent`] published on a
//! `tokio::sync::broadcast` channel. Publishing never waits for subscribers:
//! a slow subscriber lags (and sees `RecvError::Lagged`) instead of stalling
//! the stream.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;
use url::Url;

use crate::error::MTConnectError;
use crate::types::{AssetsDocument, DevicesDocument, ErrorDocument, StreamsDocument};

/// Default channel capacity for the event bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// States of the session state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Not started, or stopped and restartable.
    #[default]
    Idle,
    /// Requesting the device model.
    Probing,
    /// Requesting the asset documents.
    FetchingAssets,
    /// Requesting the snapshot that seeds the sequence.
    FetchingCurrent,
    /// Opening the streaming connection.
    Connecting,
    /// Reading documents from the streaming connection.
    Streaming,
    /// Polling `sample` because streaming is disabled.
    Polling,
    /// Waiting out the retry interval after a failure.
    Backoff,
    /// Stopped by the caller.
    Stopped,
}

impl ClientState {
    /// Lower-case name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Probing => "probing",
            Self::FetchingAssets => "fetching_assets",
            Self::FetchingCurrent => "fetching_current",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Polling => "polling",
            Self::Backoff => "backoff",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification raised by the client session.
///
/// Documents are shared behind `Arc` so every subscriber receives the same
/// allocation.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// `start()` was called.
    ClientStarting,
    /// The worker is running.
    ClientStarted,
    /// `stop()` was called.
    ClientStopping,
    /// The worker has exited.
    ClientStopped,
    /// The state machine moved to a new state.
    StateChanged(ClientState),
    /// Device model from `probe`.
    ProbeReceived(Arc<DevicesDocument>),
    /// Snapshot from `current`, either the seeding request or a streamed
    /// current-only document.
    CurrentReceived(Arc<StreamsDocument>),
    /// Incremental observations from `sample`.
    SampleReceived(Arc<StreamsDocument>),
    /// Asset documents, from the initial fetch or an asset-change fetch.
    AssetsReceived(Arc<AssetsDocument>),
    /// An `AssetRemoved` observation.
    AssetRemoved {
        /// Device the asset belonged to, when known.
        device_uuid: Option<String>,
        /// Removed asset.
        asset_id: String,
    },
    /// The Agent answered with an error document.
    ProtocolError(Arc<ErrorDocument>),
    /// Network, HTTP status or watchdog failure.
    ConnectionError(MTConnectError),
    /// A response that could not be decoded, or a framing failure.
    InternalError(MTConnectError),
    /// A successful exchange with the Agent.
    ResponseReceived {
        /// When the response was processed.
        at: DateTime<Utc>,
    },
    /// The streaming connection was accepted.
    StreamStarted {
        /// Stream request URL.
        url: Url,
    },
    /// The streaming connection ended.
    StreamStopped {
        /// Stream request URL.
        url: Url,
    },
    /// The Agent restarted; the session resynchronizes.
    InstanceChanged {
        /// Instance id before the restart.
        previous: u64,
        /// Instance id after the restart.
        current: u64,
    },
}

impl ClientEvent {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientStarting => "client_starting",
            Self::ClientStarted => "client_started",
            Self::ClientStopping => "client_stopping",
            Self::ClientStopped => "client_stopped",
            Self::StateChanged(_) => "state_changed",
            Self::ProbeReceived(_) => "probe_received",
            Self::CurrentReceived(_) => "current_received",
            Self::SampleReceived(_) => "sample_received",
            Self::AssetsReceived(_) => "assets_received",
            Self::AssetRemoved { .. } => "asset_removed",
            Self::ProtocolError(_) => "protocol_error",
            Self::ConnectionError(_) => "connection_error",
            Self::InternalError(_) => "internal_error",
            Self::ResponseReceived { .. } => "response_received",
            Self::StreamStarted { .. } => "stream_started",
            Self::StreamStopped { .. } => "stream_stopped",
            Self::InstanceChanged { .. } => "instance_changed",
        }
    }

    /// Wrap a failure in the notification matching its kind.
    ///
    /// Returns `None` for cancellation, which is never reported.
    pub fn from_error(error: MTConnectError) -> Option<Self> {
        match error {
            MTConnectError::Cancelled => None,
            MTConnectError::Protocol(document) => Some(Self::ProtocolError(document)),
            e @ (MTConnectError::Decode(_)
            | MTConnectError::FrameTooLarge { .. }
            | MTConnectError::InvalidConfig(_)) => Some(Self::InternalError(e)),
            e => Some(Self::ConnectionError(e)),
        }
    }
}

/// Broadcast channel carrying [`ClientEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ClientEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            debug!(kind, "no subscribers for client event");
        }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(ClientEvent::StateChanged(ClientState::Probing));

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                ClientEvent::StateChanged(state) => assert_eq!(state, ClientState::Probing),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(ClientEvent::ClientStarting);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn errors_map_to_their_channel() {
        assert!(ClientEvent::from_error(MTConnectError::Cancelled).is_none());
        assert_eq!(
            ClientEvent::from_error(MTConnectError::Timeout("x".into()))
                .unwrap()
                .kind(),
            "connection_error"
        );
        assert_eq!(
            ClientEvent::from_error(MTConnectError::Decode("x".into()))
                .unwrap()
                .kind(),
            "internal_error"
        );
        let document = Arc::new(ErrorDocument::default());
        assert_eq!(
            ClientEvent::from_error(MTConnectError::Protocol(document))
                .unwrap()
                .kind(),
            "protocol_error"
        );
    }
}
