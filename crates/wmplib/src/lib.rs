//! # wmplib -- WMP Gateway Control for Rust
//!
//! `wmplib` is an asynchronous Rust client for HVAC air-handling units
//! controlled through WMP network gateways. One gateway multiplexes
//! several independently addressable units over a single TCP session;
//! `wmplib` keeps that session alive indefinitely, folds asynchronous
//! protocol notifications into normalized unit state, validates outgoing
//! commands against the gateway's advertised limits, and rediscovers
//! gateways whose address has changed -- all without blocking callers.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! wmplib = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! Connect to a gateway and cool the living room:
//!
//! ```no_run
//! use wmplib::{GatewayBuilder, OperatingMode, Temperature, UnitId};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = GatewayBuilder::new("192.168.1.50").connect().await?;
//!
//!     gateway.set_mode(UnitId::SINGLE, OperatingMode::Cool).await?;
//!     gateway
//!         .set_setpoint(UnitId::SINGLE, Temperature::from_celsius(21.5))
//!         .await?;
//!
//!     gateway.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                 | Purpose                                      |
//! |-----------------------|----------------------------------------------|
//! | `wmplib-core`         | Traits, types, limits model, errors, events  |
//! | `wmplib-transport`    | Direct TCP and relay-proxy transports        |
//! | `wmplib-gateway`      | Protocol driver, scheduler, discovery        |
//! | `wmplib-test-harness` | Scripted mock gateway for tests              |
//! | **`wmplib`**          | This facade crate -- re-exports everything   |
//!
//! ## Event Subscription
//!
//! The driver broadcasts a [`GatewayEvent`] for every observed change,
//! so hosts react in real time instead of polling:
//!
//! ```no_run
//! use wmplib::GatewayEvent;
//! # async fn example(gateway: &wmplib::GatewayClient) {
//! let mut events = gateway.subscribe();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         GatewayEvent::AmbientChanged { unit, ambient } => {
//!             println!("{unit}: ambient now {ambient} C");
//!         }
//!         other => println!("{other:?}"),
//!     }
//! }
//! # }
//! ```
//!
//! ## Discovery
//!
//! Gateways answer a UDP broadcast probe with their identity; see
//! [`discover`]. Gateways already known only get their stored address
//! refreshed, everything else is new hardware to provision.

pub use wmplib_core::*;

pub use wmplib_gateway::{
    discover, AddressResolver, DiscoveryRecord, GatewayBuilder, GatewayClient, GatewayConfig,
    GatewayStatus, NeighborTableResolver, ProbeResolver, ProxySettings, UnitRegistry, UnitState,
};

pub use wmplib_transport::{ProxyTransport, TcpTransport, PROXY_PORT, WMP_PORT};

/// Protocol internals (codec, scheduler, discovery helpers) for hosts
/// that need lower-level access than [`GatewayClient`].
pub mod gateway {
    pub use wmplib_gateway::*;
}
