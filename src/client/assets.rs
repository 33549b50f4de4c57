//! Fetching assets referenced by `AssetChanged` observations.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::agent_client::AgentClient;
use super::events::{ClientEvent, EventBus};
use crate::types::{DeviceStream, StreamsDocument};

/// Asset ids named by the `AssetChanged` observations of `batch`, in order.
/// `UNAVAILABLE` values are skipped.
pub fn changed_asset_ids(batch: &DeviceStream) -> Vec<&str> {
    batch
        .observations
        .iter()
        .filter(|o| o.is_asset_changed() && !o.is_unavailable() && !o.value.is_empty())
        .map(|o| o.value.as_str())
        .collect()
}

/// Spawns one asset fetch per `AssetChanged` observation.
///
/// Fetches run detached from the stream: they never block document dispatch
/// and complete in any order. Repeated changes to the same asset are fetched
/// again each time. Fetches observe the session's cancellation token.
#[derive(Debug, Clone)]
pub struct AssetChangeWatcher {
    client: Arc<AgentClient>,
    events: EventBus,
    cancel: CancellationToken,
}

impl AssetChangeWatcher {
    /// Create a watcher publishing results on `events`.
    pub fn new(client: Arc<AgentClient>, events: EventBus, cancel: CancellationToken) -> Self {
        Self {
            client,
            events,
            cancel,
        }
    }

    /// Scan every batch of `document`. Returns the number of fetches started.
    pub fn inspect(&self, document: &StreamsDocument) -> usize {
        let mut started = 0;
        for batch in &document.streams {
            for removed in batch
                .observations
                .iter()
                .filter(|o| o.is_asset_removed() && !o.is_unavailable())
            {
                self.events.publish(ClientEvent::AssetRemoved {
                    device_uuid: batch.uuid.clone(),
                    asset_id: removed.value.clone(),
                });
            }
            for asset_id in changed_asset_ids(batch) {
                self.spawn_fetch(asset_id.to_string());
                started += 1;
            }
        }
        started
    }

    fn spawn_fetch(&self, asset_id: String) {
        debug!(asset_id = %asset_id, "asset changed, fetching");
        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = client.asset(&asset_id) => result,
            };
            match result {
                Ok(document) => events.publish(ClientEvent::AssetsReceived(Arc::new(document))),
                Err(e) => {
                    warn!(asset_id = %asset_id, error = %e, "asset fetch failed");
                    if let Some(event) = ClientEvent::from_error(e) {
                        events.publish(event);
                    }
                }
            }
        });
    }
}
