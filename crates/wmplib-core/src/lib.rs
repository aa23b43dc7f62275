//! wmplib-core: Core traits, types, and error definitions for wmplib.
//!
//! This crate defines the gateway-agnostic abstractions shared by the
//! transport implementations, the protocol driver, and host integrations.
//! Applications depend on these types without pulling in any I/O.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to a gateway
//! - [`GatewayEvent`] -- asynchronous state change notifications
//! - [`Limits`] / [`LimitSet`] -- advertised per-capability constraints
//! - [`AttributeStore`] -- the host controller's key/value persistence
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod limits;
pub mod store;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use wmplib_core::*`.
pub use error::{Error, Result};
pub use events::GatewayEvent;
pub use limits::{LimitSet, Limits};
pub use store::{AttributeStore, MemoryStore};
pub use transport::Transport;
pub use types::*;
