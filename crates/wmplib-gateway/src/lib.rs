//! wmplib-gateway: the WMP protocol driver.
//!
//! This crate implements the engine that keeps one TCP session per
//! gateway alive indefinitely and turns the WMP line protocol into a
//! normalized unit model:
//!
//! - [`codec`] -- line framing, message parsing, command encoding
//! - [`scheduler`] -- cooperative timers multiplexed over one wake
//! - [`state`] -- the per-unit registry updated from inbound messages
//! - [`discovery`] -- UDP broadcast discovery of gateways
//! - [`resolver`] -- address resolution for gateways that moved
//! - [`GatewayBuilder`] / [`GatewayClient`] -- construction and the
//!   public command/status surface
//!
//! The driver task itself (connection state machine, command pacer,
//! receive loop, watchdog) is internal; everything observable flows
//! through [`GatewayClient`] and its event subscription.

pub mod builder;
pub mod client;
pub mod codec;
pub mod discovery;
pub mod resolver;
pub mod scheduler;
pub mod state;

mod driver;

pub use builder::{GatewayBuilder, GatewayConfig, ProxySettings};
pub use client::{GatewayClient, GatewayStatus};
pub use discovery::{discover, DiscoveryRecord};
pub use resolver::{AddressResolver, NeighborTableResolver, ProbeResolver};
pub use state::{UnitRegistry, UnitState};
