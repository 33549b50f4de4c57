//! Probe Once: one-shot requests against an MTConnect Agent.
//!
//! Prints the device model, the latest value of every data item and the
//! assets the Agent holds.
//!
//! ```sh
//! cargo run --example probe_once -- http://localhost:5000 mill-01
//! ```

use mtconnect_rs::builders::ClientBuilder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let base_url = args.next().unwrap_or_else(|| "http://localhost:5000".to_string());
    let device = args.next();

    let mut builder = ClientBuilder::new(base_url);
    if let Some(device) = device {
        builder = builder.with_device(device);
    }
    let client = builder.build()?;
    let agent = client.agent();

    let devices = agent.probe().await?;
    println!(
        "Agent instance {} (v{}), buffer [{}, {})",
        devices.header.instance_id,
        devices.header.version,
        devices.header.first_sequence,
        devices.header.next_sequence
    );
    for device in &devices.devices {
        println!(
            "Device: {} ({})",
            device.name,
            device.uuid.as_deref().unwrap_or("no uuid")
        );
        for item in &device.data_items {
            println!("  - {} {:?} {}", item.id, item.category, item.data_type);
        }
    }
    println!();

    // Latest value of every data item.
    let current = agent.current(None, None).await?;
    for stream in &current.streams {
        println!("[{}]", stream.name);
        for observation in &stream.observations {
            println!(
                "  {:>8} {:<24} {}",
                observation.sequence, observation.observation_type, observation.value
            );
        }
    }
    println!();

    let assets = agent.assets(None, None).await?;
    println!("{} assets", assets.assets.len());
    for asset in &assets.assets {
        println!(
            "  {} {}{}",
            asset.asset_id,
            asset.asset_type,
            if asset.removed { " (removed)" } else { "" }
        );
    }

    Ok(())
}
