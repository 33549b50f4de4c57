//! Watch Agent: follows an MTConnect Agent's sample stream.
//!
//! Probes the Agent, takes a snapshot, then streams every new observation
//! and asset change until Ctrl-C. Reconnects on its own after failures and
//! Agent restarts.
//!
//! ```sh
//! cargo run --example watch_agent -- http://localhost:5000
//! ```

use std::time::Duration;

use mtconnect_rs::builders::ClientBuilder;
use mtconnect_rs::client::ClientEvent;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for log output.
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let base_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:5000".to_string());

    let client = ClientBuilder::new(base_url)
        .with_interval(Duration::from_millis(250))
        .with_retry_interval(Duration::from_secs(5))
        .build()?;

    let mut events = client.subscribe();
    client.start().await;

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(ClientEvent::ProbeReceived(devices)) => {
                println!("--- {} devices ---", devices.devices.len());
            }
            Ok(ClientEvent::CurrentReceived(snapshot)) => {
                println!(
                    "[current] instance {} next {}",
                    snapshot.header.instance_id, snapshot.header.next_sequence
                );
            }
            Ok(ClientEvent::SampleReceived(document)) => {
                for stream in &document.streams {
                    for observation in &stream.observations {
                        println!(
                            "[{}] {:>8} {} = {}",
                            stream.name,
                            observation.sequence,
                            observation.data_item_id,
                            observation.value
                        );
                    }
                }
            }
            Ok(ClientEvent::AssetsReceived(assets)) => {
                for asset in &assets.assets {
                    println!("[asset] {} {}", asset.asset_type, asset.asset_id);
                }
            }
            Ok(ClientEvent::AssetRemoved { asset_id, .. }) => {
                println!("[asset] removed {}", asset_id);
            }
            Ok(ClientEvent::InstanceChanged { previous, current }) => {
                println!("[agent] restarted: {} -> {}", previous, current);
            }
            Ok(ClientEvent::ProtocolError(document)) => {
                for error in &document.errors {
                    println!("[error] {}: {}", error.error_code, error.message);
                }
            }
            Ok(ClientEvent::ConnectionError(e) | ClientEvent::InternalError(e)) => {
                println!("[error] {}", e);
            }
            Ok(ClientEvent::StateChanged(state)) => println!("[state] {}", state),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => println!("[warn] skipped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }

    client.stop().await;
    let sync = client.sync_state();
    println!(
        "Stopped at sequence {} of instance {}",
        sync.last_sequence, sync.last_instance_id
    );

    Ok(())
}
