//! Monitor real-time unit state changes from a WMP gateway.
//!
//! Demonstrates subscribing to the gateway event stream and printing
//! every change as it arrives: power, mode, fan, vanes, setpoint,
//! ambient temperature, and connection transitions.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p wmplib --example monitor -- 192.168.1.50
//! ```

use std::time::Duration;

use wmplib::{GatewayBuilder, GatewayEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let host = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "192.168.1.50".to_string());

    println!("Connecting to WMP gateway at {host}...");
    let gateway = GatewayBuilder::new(&host)
        .refresh_interval(Duration::from_secs(30))
        .connect()
        .await?;

    if let Some(identity) = gateway.identity().await? {
        println!(
            "Connected: {} {} (fw {})\n",
            identity.model, identity.name, identity.firmware
        );
    }

    let mut events = gateway.subscribe();
    println!("Monitoring for 60 seconds... (change something on the unit)\n");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => match event {
                GatewayEvent::ModeChanged { unit, mode } => {
                    println!("{unit}: mode -> {mode}");
                }
                GatewayEvent::SetpointChanged { unit, setpoint } => {
                    println!("{unit}: setpoint -> {setpoint} C");
                }
                GatewayEvent::AmbientChanged { unit, ambient } => {
                    println!("{unit}: ambient -> {ambient} C");
                }
                other => println!("{other:?}"),
            },
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    for unit in gateway.units().await? {
        println!(
            "\n{}: mode {:?}, setpoint {:?}, ambient {:?}",
            unit.id,
            unit.visible_mode(),
            unit.setpoint,
            unit.ambient
        );
    }

    gateway.shutdown().await;
    Ok(())
}
