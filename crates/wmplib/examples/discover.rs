//! Discover WMP gateways on the local network.
//!
//! Broadcasts the discovery probe and prints every compatible gateway
//! that answers within the collection window.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p wmplib --example discover
//! ```

use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("Broadcasting WMP discovery probe (10 s window)...\n");
    let gateways = wmplib::discover(Duration::from_secs(10)).await?;

    if gateways.is_empty() {
        println!("No gateways answered.");
        return Ok(());
    }

    for gw in &gateways {
        println!(
            "{:<10} {}  {}  fw {}  rssi {}  \"{}\"",
            gw.model,
            gw.mac,
            gw.ip,
            gw.firmware,
            gw.rssi.map_or("?".to_string(), |r| r.to_string()),
            gw.name
        );
    }
    Ok(())
}
