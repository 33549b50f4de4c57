//! The streaming client session.
//!
//! [`MTConnectClient`] runs one background worker per session. The worker
//! walks the state machine
//!
//! ```text
//! Idle → Probing → FetchingAssets → FetchingCurrent → Connecting → Streaming
//!                     ↑                                               │
//!                     └──────────── Backoff ←── any failure ──────────┘
//! ```
//!
//! and reports everything it sees on the session's [`EventBus`]. Failures are
//! never returned to the caller: they are published as events and followed by
//! a cancellable wait of `retry_interval` before the next attempt. Only
//! [`stop`](MTConnectClient::stop) ends the session.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::agent_client::{AgentClient, SampleRequest};
use super::assets::AssetChangeWatcher;
use super::config::ClientConfig;
use super::events::{ClientEvent, ClientState, EventBus};
use super::sequence::{HeaderCheck, SequenceTracker, StartPosition, SyncState};
use super::stream::StreamReader;
use crate::error::{MTConnectError, MTConnectResult};
use crate::types::StreamsDocument;

/// State shared between the client handle and its worker.
#[derive(Debug)]
struct Shared {
    events: EventBus,
    state: watch::Sender<ClientState>,
    sync: watch::Sender<SyncState>,
    reset_requested: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: ClientState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "client state changed");
            self.events.publish(ClientEvent::StateChanged(state));
        }
    }

    fn publish_sync(&self, sync: &SyncState) {
        self.sync.send_replace(*sync);
    }

    fn report(&self, error: MTConnectError) {
        if let Some(event) = ClientEvent::from_error(error) {
            self.events.publish(event);
        }
    }
}

#[derive(Debug)]
enum WorkerSlot {
    Idle(SequenceTracker),
    Running {
        handle: JoinHandle<SequenceTracker>,
        cancel: CancellationToken,
    },
}

/// A long-running session synchronizing with one MTConnect Agent.
///
/// Build one with [`ClientBuilder`](crate::builders::ClientBuilder).
///
/// # Example
///
/// ```no_run
/// use mtconnect_rs::builders::ClientBuilder;
/// use mtconnect_rs::client::ClientEvent;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClientBuilder::new("http://localhost:5000")
///     .with_device("mill-01")
///     .build()?;
///
/// let mut events = client.subscribe();
/// client.start().await;
///
/// while let Ok(event) = events.recv().await {
///     if let ClientEvent::SampleReceived(doc) = event {
///         println!("{} observations", doc.observation_count());
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MTConnectClient {
    config: Arc<ClientConfig>,
    agent: Arc<AgentClient>,
    shared: Arc<Shared>,
    worker: Mutex<WorkerSlot>,
}

impl MTConnectClient {
    pub(crate) fn new(config: ClientConfig, agent: AgentClient, event_capacity: usize) -> Self {
        let (state, _) = watch::channel(ClientState::Idle);
        let (sync, _) = watch::channel(SyncState::default());
        Self {
            config: Arc::new(config),
            agent: Arc::new(agent),
            shared: Arc::new(Shared {
                events: EventBus::new(event_capacity),
                state,
                sync,
                reset_requested: AtomicBool::new(false),
            }),
            worker: Mutex::new(WorkerSlot::Idle(SequenceTracker::new())),
        }
    }

    /// Start the session.
    ///
    /// A fresh client starts at the Agent's newest data. A client that was
    /// stopped resumes from its retained sequence. Does nothing if already
    /// running.
    pub async fn start(&self) {
        self.launch(None).await;
    }

    /// Start the session at `sequence` of Agent instance `instance_id`.
    ///
    /// The position is discarded if the Agent reports a different instance
    /// or no longer retains the sequence.
    pub async fn start_from_sequence(&self, instance_id: u64, sequence: u64) {
        self.launch(Some(StartPosition::Sequence {
            instance_id,
            sequence,
        }))
        .await;
    }

    /// Start the session at the oldest sequence the Agent retains.
    pub async fn start_from_buffer(&self) {
        self.launch(Some(StartPosition::Buffer)).await;
    }

    async fn launch(&self, start: Option<StartPosition>) {
        let mut slot = self.worker.lock().await;
        let WorkerSlot::Idle(tracker) = &mut *slot else {
            debug!("client already running");
            return;
        };
        let mut tracker = std::mem::take(tracker);
        if let Some(start) = start {
            tracker.restart_from(start);
        }
        self.shared.reset_requested.store(false, Ordering::SeqCst);

        self.shared.events.publish(ClientEvent::ClientStarting);
        info!(agent = %self.config.base_url, device = ?self.config.device, "starting client");

        let cancel = CancellationToken::new();
        let worker = Worker {
            config: Arc::clone(&self.config),
            agent: Arc::clone(&self.agent),
            assets: AssetChangeWatcher::new(
                Arc::clone(&self.agent),
                self.shared.events.clone(),
                cancel.clone(),
            ),
            shared: Arc::clone(&self.shared),
            tracker,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(worker.run());
        *slot = WorkerSlot::Running { handle, cancel };
    }

    /// Stop the session and wait for the worker to unwind.
    ///
    /// The in-flight request, stream read or backoff wait is abandoned
    /// immediately. Cancellation is not reported as an error. The sequence
    /// position is kept for a later [`start`](Self::start).
    ///
    /// A client that is not running only moves to [`ClientState::Stopped`];
    /// no stopping events are published.
    pub async fn stop(&self) {
        let mut slot = self.worker.lock().await;
        let (handle, cancel) =
            match std::mem::replace(&mut *slot, WorkerSlot::Idle(SequenceTracker::new())) {
                WorkerSlot::Running { handle, cancel } => (handle, cancel),
                idle => {
                    *slot = idle;
                    self.shared.set_state(ClientState::Stopped);
                    return;
                }
            };

        self.shared.events.publish(ClientEvent::ClientStopping);
        info!("stopping client");
        cancel.cancel();
        match handle.await {
            Ok(tracker) => {
                self.shared.publish_sync(tracker.state());
                *slot = WorkerSlot::Idle(tracker);
            }
            Err(e) => warn!(error = %e, "client worker did not exit cleanly"),
        }
        self.shared.set_state(ClientState::Stopped);
        self.shared.events.publish(ClientEvent::ClientStopped);
    }

    /// Forget the sequence position.
    ///
    /// On a stopped client this takes effect immediately. On a running
    /// client the worker drops its position at the next document and
    /// resynchronizes from a fresh snapshot.
    pub async fn reset(&self) {
        let mut slot = self.worker.lock().await;
        match &mut *slot {
            WorkerSlot::Idle(tracker) => {
                tracker.reset();
                self.shared.publish_sync(tracker.state());
            }
            WorkerSlot::Running { .. } => {
                self.shared.reset_requested.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Whether the worker is running.
    pub async fn is_running(&self) -> bool {
        matches!(&*self.worker.lock().await, WorkerSlot::Running { .. })
    }

    /// Current state of the session.
    pub fn state(&self) -> ClientState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.shared.state.subscribe()
    }

    /// Snapshot of the sequence position, for health checks.
    pub fn sync_state(&self) -> SyncState {
        *self.shared.sync.borrow()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// The request client, for one-shot requests against the same Agent.
    pub fn agent(&self) -> &Arc<AgentClient> {
        &self.agent
    }

    /// The session configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for MTConnectClient {
    fn drop(&mut self) {
        if let WorkerSlot::Running { cancel, .. } = self.worker.get_mut() {
            cancel.cancel();
        }
    }
}

/// Whether the session keeps reading or starts over from `probe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Resync,
}

/// Races `future` against cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = MTConnectResult<T>>,
) -> MTConnectResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MTConnectError::Cancelled),
        result = future => result,
    }
}

struct Worker {
    config: Arc<ClientConfig>,
    agent: Arc<AgentClient>,
    assets: AssetChangeWatcher,
    shared: Arc<Shared>,
    tracker: SequenceTracker,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) -> SequenceTracker {
        self.shared.events.publish(ClientEvent::ClientStarted);

        loop {
            match self.cycle().await {
                Ok(()) => debug!("resynchronizing with agent"),
                Err(MTConnectError::Cancelled) => break,
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in = ?self.config.retry_interval,
                        "agent session failed"
                    );
                    self.shared.report(e);
                    self.shared.set_state(ClientState::Backoff);
                    if self.backoff().await.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("client worker exiting");
        self.tracker
    }

    /// One pass from `probe` to the end of the stream. Returns `Ok` when the
    /// session must resynchronize immediately.
    async fn cycle(&mut self) -> MTConnectResult<()> {
        self.apply_pending_reset();

        self.shared.set_state(ClientState::Probing);
        let devices = cancellable(&self.cancel, self.agent.probe()).await?;
        self.on_response();
        debug!(devices = devices.devices.len(), "probe received");
        self.shared
            .events
            .publish(ClientEvent::ProbeReceived(Arc::new(devices)));

        self.shared.set_state(ClientState::FetchingAssets);
        let assets = cancellable(&self.cancel, self.agent.assets(None, None)).await?;
        self.on_response();
        self.shared
            .events
            .publish(ClientEvent::AssetsReceived(Arc::new(assets)));

        self.shared.set_state(ClientState::FetchingCurrent);
        let current = cancellable(
            &self.cancel,
            self.agent.current(None, self.config.path.as_deref()),
        )
        .await?;
        self.tracker.seed_from_snapshot(&current.header);
        self.on_response();
        debug!(
            instance_id = current.header.instance_id,
            next_sequence = current.header.next_sequence,
            from = ?self.tracker.next_from(),
            "snapshot received"
        );
        self.assets.inspect(&current);
        self.shared
            .events
            .publish(ClientEvent::CurrentReceived(Arc::new(current)));

        if self.config.use_streaming {
            self.stream().await
        } else {
            self.poll().await
        }
    }

    async fn stream(&mut self) -> MTConnectResult<()> {
        self.shared.set_state(ClientState::Connecting);
        let url = self.stream_url();
        let body = cancellable(&self.cancel, self.agent.open_stream(&url)).await?;
        let mut reader = StreamReader::new(
            body,
            self.agent.parser().framing(),
            self.config.max_frame_size,
            self.config.stream_timeout,
        );

        self.tracker.set_stream_active(true);
        self.shared.publish_sync(self.tracker.state());
        self.shared
            .events
            .publish(ClientEvent::StreamStarted { url: url.clone() });
        self.shared.set_state(ClientState::Streaming);
        info!(%url, "streaming from agent");

        let result = self.read_stream(&mut reader).await;

        self.tracker.set_stream_active(false);
        self.shared.publish_sync(self.tracker.state());
        self.shared.events.publish(ClientEvent::StreamStopped { url });
        result
    }

    async fn read_stream(&mut self, reader: &mut StreamReader) -> MTConnectResult<()> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(MTConnectError::Cancelled),
                next = reader.next_document() => next,
            };
            let text = match next {
                Some(text) => text?,
                None => {
                    return Err(MTConnectError::Transport(
                        "stream closed by agent".to_string(),
                    ))
                }
            };

            let document = match self.agent.decode(text.as_bytes(), |p, b| p.parse_streams(b)) {
                Ok(document) => document,
                Err(e @ (MTConnectError::Protocol(_) | MTConnectError::Decode(_))) => {
                    warn!(error = %e, "undecodable document on stream");
                    self.shared.report(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if self.dispatch(document) == Flow::Resync {
                return Ok(());
            }
        }
    }

    /// Polls `sample` (or `current`) every `interval` instead of streaming.
    async fn poll(&mut self) -> MTConnectResult<()> {
        self.shared.set_state(ClientState::Polling);
        loop {
            let document = if self.config.current_only {
                cancellable(
                    &self.cancel,
                    self.agent.current(None, self.config.path.as_deref()),
                )
                .await?
            } else {
                let request = self.sample_request();
                cancellable(&self.cancel, self.agent.sample(&request)).await?
            };

            if self.dispatch(document) == Flow::Resync {
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(MTConnectError::Cancelled),
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// Applies a streamed or polled document to the sequence and publishes it.
    fn dispatch(&mut self, document: StreamsDocument) -> Flow {
        if let HeaderCheck::InstanceChanged { previous, current } =
            self.tracker.observe_header(&document.header)
        {
            self.shared.publish_sync(self.tracker.state());
            self.shared
                .events
                .publish(ClientEvent::InstanceChanged { previous, current });
            return Flow::Resync;
        }

        self.tracker.advance_document(&document);
        self.on_response();
        self.assets.inspect(&document);

        let document = Arc::new(document);
        let event = if self.config.current_only {
            ClientEvent::CurrentReceived(document)
        } else {
            ClientEvent::SampleReceived(document)
        };
        self.shared.events.publish(event);

        if self.apply_pending_reset() {
            Flow::Resync
        } else {
            Flow::Continue
        }
    }

    fn sample_request(&self) -> SampleRequest {
        let mut request = SampleRequest::new().count(self.config.max_sample_count);
        if let Some(from) = self.tracker.next_from() {
            request = request.from(from);
        }
        if let Some(path) = &self.config.path {
            request = request.path(path.clone());
        }
        request
    }

    fn stream_url(&self) -> Url {
        if self.config.current_only {
            return self.agent.current_url(
                None,
                self.config.path.as_deref(),
                Some(self.config.interval),
            );
        }
        let request = self
            .sample_request()
            .interval(self.config.interval)
            .heartbeat(self.config.heartbeat);
        self.agent.sample_url(&request)
    }

    async fn backoff(&self) -> MTConnectResult<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MTConnectError::Cancelled),
            _ = tokio::time::sleep(self.config.retry_interval) => Ok(()),
        }
    }

    fn on_response(&mut self) {
        let at = Utc::now();
        self.tracker.record_response(at);
        self.shared.publish_sync(self.tracker.state());
        self.shared
            .events
            .publish(ClientEvent::ResponseReceived { at });
    }

    fn apply_pending_reset(&mut self) -> bool {
        if !self.shared.reset_requested.swap(false, Ordering::SeqCst) {
            return false;
        }
        info!("sequence reset requested");
        self.tracker.reset();
        self.shared.publish_sync(self.tracker.state());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_change_is_published_once() {
        let (state, _) = watch::channel(ClientState::Idle);
        let (sync, _) = watch::channel(SyncState::default());
        let shared = Shared {
            events: EventBus::new(8),
            state,
            sync,
            reset_requested: AtomicBool::new(false),
        };
        let mut rx = shared.events.subscribe();

        shared.set_state(ClientState::Probing);
        shared.set_state(ClientState::Probing);

        assert!(matches!(
            rx.try_recv(),
            Ok(ClientEvent::StateChanged(ClientState::Probing))
        ));
        assert!(rx.try_recv().is_err());
    }
}
