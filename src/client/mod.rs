//! MTConnect client: one-shot requests and the streaming session.
//!
//! - [`AgentClient`] issues the stateless `probe`, `current`, `sample` and
//!   `assets` requests
//! - [`MTConnectClient`] runs the long-lived session: probe, assets, snapshot,
//!   then a `sample` stream, reconnecting after failures
//! - [`SequenceTracker`] keeps the session's position in the Agent's sequence
//!   space across reconnects and Agent restarts
//! - [`DocumentFramer`] and [`StreamReader`] cut the chunked stream into
//!   documents
//! - [`Transport`] / [`HttpTransport`] is the pluggable HTTP layer
//!
//! # Quick Start
//!
//! ```no_run
//! use mtconnect_rs::builders::ClientBuilder;
//! use mtconnect_rs::client::ClientEvent;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientBuilder::new("http://localhost:5000")
//!     .with_interval(Duration::from_millis(250))
//!     .build()?;
//!
//! // One-shot request:
//! let devices = client.agent().probe().await?;
//! println!("{} devices", devices.devices.len());
//!
//! // Streaming session:
//! let mut events = client.subscribe();
//! client.start().await;
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         ClientEvent::SampleReceived(doc) => println!("{} observations", doc.observation_count()),
//!         ClientEvent::ConnectionError(e) => eprintln!("connection error: {e}"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod agent_client;
mod assets;
mod config;
mod events;
mod framer;
mod orchestrator;
mod sequence;
mod stream;
mod transport;

pub use agent_client::{AgentClient, SampleRequest};
pub use assets::{changed_asset_ids, AssetChangeWatcher};
pub use config::ClientConfig;
pub use events::{ClientEvent, ClientState, EventBus, DEFAULT_EVENT_CAPACITY};
pub use framer::{locate, DocumentFramer, Located};
pub use orchestrator::MTConnectClient;
pub use sequence::{HeaderCheck, SequenceTracker, StartPosition, SyncState};
pub use stream::StreamReader;
pub use transport::{ByteStream, HttpTransport, Transport, TransportConfig};
