//! wmplib-transport: socket transports for WMP gateways.
//!
//! Two implementations of the [`Transport`](wmplib_core::Transport) trait:
//!
//! - [`TcpTransport`] -- a direct TCP connection to the gateway's WMP port
//! - [`ProxyTransport`] -- a connection negotiated through the optional
//!   local relay proxy, which holds the gateway session on the client's
//!   behalf
//!
//! Both expose identical behavior after connection establishment, so the
//! protocol driver treats them interchangeably.

pub mod proxy;
pub mod tcp;

pub use proxy::{ProxyDirective, ProxyTransport};
pub use tcp::TcpTransport;

/// Default TCP port a WMP gateway listens on.
pub const WMP_PORT: u16 = 3310;

/// Default port of the optional local relay proxy.
pub const PROXY_PORT: u16 = 2504;
