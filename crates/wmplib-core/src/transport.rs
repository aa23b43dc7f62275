//! Transport trait for gateway communication.
//!
//! The [`Transport`] trait abstracts over the byte-level link to a WMP
//! gateway. Implementations exist for direct TCP sockets, the optional
//! relay proxy, and mock gateways for testing.
//!
//! The protocol engine operates on a `Transport` rather than a socket, so
//! the same driver runs against real hardware, the relay proxy, and the
//! scripted mock gateway in `wmplib-test-harness`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a WMP gateway.
///
/// Implementations handle connection state and error mapping at the socket
/// layer. Line framing and protocol concerns live in the codec, which
/// consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the gateway.
    ///
    /// WMP commands are short CR-terminated ASCII lines; implementations
    /// should write and flush the whole buffer before returning.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive available bytes from the gateway into `buf`.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data;
    /// returns [`Error::Timeout`](crate::error::Error::Timeout) when
    /// nothing arrived in time. The driver polls with near-zero timeouts,
    /// so a timeout here is routine, not a fault.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After `close()`, `send()` and `receive()` return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Whether the transport currently holds an open connection.
    fn is_connected(&self) -> bool;
}
