//! # mtconnect-rs: streaming client for MTConnect Agents
//!
//! An MTConnect Agent publishes the state of machine tools over HTTP: a
//! device model (`probe`), point-in-time snapshots (`current`), a stream of
//! incremental observations (`sample`) and auxiliary documents (`assets`).
//! This crate keeps a local consumer synchronized with such an Agent.
//!
//! ## Overview
//!
//! The streaming session:
//! - discovers the device model, fetches assets and an initial snapshot
//! - opens a long-lived `sample` stream and cuts it into documents
//! - tracks the Agent's sequence numbers so reconnects resume without gaps
//!   or stale replays, and resynchronizes when the Agent restarts
//! - fetches assets announced by `AssetChanged` observations
//! - retries after every failure until stopped
//!
//! ## Feature flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `client` | yes     | HTTP client and streaming session (reqwest) |
//!
//! Without `client` the crate provides the document model and parsers only.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mtconnect_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new("http://localhost:5000")
//!         .with_device("mill-01")
//!         .build()?;
//!
//!     let mut events = client.subscribe();
//!     client.start().await;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             ClientEvent::SampleReceived(doc) => {
//!                 for stream in &doc.streams {
//!                     for obs in &stream.observations {
//!                         println!("{} {} = {}", stream.name, obs.data_item_id, obs.value);
//!                     }
//!                 }
//!             }
//!             ClientEvent::ConnectionError(e) => eprintln!("connection error: {e}"),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`client::MTConnectClient`]: the session state machine and event surface
//! - [`client::AgentClient`]: one-shot `probe` / `current` / `sample` / `assets` requests
//! - [`client::SequenceTracker`]: sequence and instance bookkeeping
//! - [`client::DocumentFramer`]: incremental document framing of the stream
//! - [`client::Transport`]: pluggable HTTP layer
//! - [`format::DocumentParser`]: pluggable XML / JSON decoding
//! - [`types`]: the document model
//! - [`error::MTConnectError`]: error taxonomy

pub mod error;
pub mod format;
pub mod types;
pub mod utils;

#[cfg(feature = "client")]
pub mod builders;

#[cfg(feature = "client")]
pub mod client;

/// Prelude module that re-exports commonly used types and traits.
///
/// # Example
///
/// ```
/// use mtconnect_rs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::types::{
        Asset, AssetsDocument, DataItem, Device, DeviceStream, DevicesDocument, DocumentFormat,
        ErrorDocument, Header, Observation, StreamsDocument,
    };

    pub use crate::error::{MTConnectError, MTConnectResult};

    pub use crate::format::DocumentParser;

    #[cfg(feature = "client")]
    pub use crate::builders::ClientBuilder;

    #[cfg(feature = "client")]
    pub use crate::client::{
        AgentClient, ClientConfig, ClientEvent, ClientState, MTConnectClient, SyncState,
    };
}

pub use error::{MTConnectError, MTConnectResult};
pub use types::*;

#[cfg(feature = "client")]
pub use builders::ClientBuilder;
