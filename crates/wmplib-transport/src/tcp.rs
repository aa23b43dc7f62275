//! Direct TCP transport to a WMP gateway.
//!
//! [`TcpTransport`] implements the [`Transport`] trait over a plain TCP
//! socket to the gateway's WMP port (3310 by default). The gateway speaks
//! CR-terminated ASCII lines and pushes unsolicited `CHN` notifications,
//! so the driver keeps the socket open indefinitely and polls it with
//! short timeouts rather than reading on demand.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use wmplib_core::error::{Error, Result};
use wmplib_core::transport::Transport;

/// Default connection timeout.
///
/// Gateways live on the local LAN; if a connect has not completed within
/// this window the address is almost certainly stale and the caller should
/// move on to rediscovery.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Direct TCP transport to a WMP gateway.
///
/// The connection is established eagerly by [`connect`](TcpTransport::connect).
/// The stream is dropped (and the slot nulled) on `close()`, so a stale
/// transport reports [`Error::NotConnected`] instead of touching a dead
/// socket.
#[derive(Debug)]
pub struct TcpTransport {
    /// The underlying stream, `None` once closed.
    stream: Option<TcpStream>,
    /// Peer address string, kept for logging.
    addr: String,
}

impl TcpTransport {
    /// Connect to `addr` (`host:port`) using the default timeout.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, CONNECT_TIMEOUT).await
    }

    /// Connect to `addr` with an explicit timeout.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!(addr = %addr, timeout_ms = timeout.as_millis(), "dialing gateway");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::warn!(addr = %addr, "gateway connect timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(addr = %addr, error = %e, "gateway connect failed");
                classify_connect_error(e, addr)
            })?;

        // WMP commands are single short lines; Nagle only adds latency.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %addr, error = %e, "failed to set TCP_NODELAY");
        }

        tracing::info!(addr = %addr, "gateway connection established");

        Ok(Self {
            stream: Some(stream),
            addr: addr.to_string(),
        })
    }

    /// Wrap an already-connected stream (used by tests and the mock
    /// gateway harness).
    pub fn from_stream(stream: TcpStream, addr: String) -> Self {
        Self {
            stream: Some(stream),
            addr,
        }
    }

    /// The peer address this transport was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(addr = %self.addr, bytes = data.len(), "tx");

        stream.write_all(data).await.map_err(classify_io_error)?;
        stream.flush().await.map_err(classify_io_error)?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, stream.read(buf)).await {
            // 0 bytes from a TCP read means the gateway closed its end.
            Ok(Ok(0)) => {
                tracing::info!(addr = %self.addr, "gateway closed the connection");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(addr = %self.addr, bytes = n, "rx");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::warn!(addr = %self.addr, error = %e, "receive failed");
                Err(classify_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!(addr = %self.addr, "closing gateway connection");
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Map a connect-time I/O error to the appropriate [`Error`] variant.
fn classify_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {addr}"))
        }
        _ => Error::Io(e),
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
pub(crate) fn classify_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn test_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn connect_send_receive() {
        let (listener, addr) = test_listener().await;

        // Mock gateway: answer PING with a PONG line.
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"PING\r");
            stream.write_all(b"PONG:-51\r\n").await.unwrap();
        });

        let mut transport = TcpTransport::connect(&addr).await.unwrap();
        assert!(transport.is_connected());

        transport.send(b"PING\r").await.unwrap();

        let mut buf = [0u8; 64];
        let n = transport
            .receive(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"PONG:-51\r\n");

        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused() {
        // Bind then drop so nothing is listening on the port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = TcpTransport::connect(&addr).await.unwrap_err();
        match err {
            Error::Transport(msg) => assert!(msg.contains("connection refused")),
            other => panic!("expected Transport error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_timeout_to_blackhole() {
        // RFC 5737 TEST-NET-1 black-holes packets rather than refusing.
        let result =
            TcpTransport::connect_with_timeout("192.0.2.1:3310", Duration::from_millis(100)).await;
        let err = result.unwrap_err();
        assert!(
            matches!(err, Error::Timeout | Error::Io(_)),
            "expected Timeout or Io, got: {err:?}"
        );
    }

    #[tokio::test]
    async fn receive_timeout_is_routine() {
        let (listener, addr) = test_listener().await;
        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::connect(&addr).await.unwrap();
        let mut buf = [0u8; 64];
        let result = transport.receive(&mut buf, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(transport.is_connected(), "timeout must not tear down the socket");

        transport.close().await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn peer_close_detected() {
        let (listener, addr) = test_listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut transport = TcpTransport::connect(&addr).await.unwrap();
        server.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut buf = [0u8; 64];
        let result = transport.receive(&mut buf, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(Error::ConnectionLost)));
    }

    #[tokio::test]
    async fn closed_transport_reports_not_connected() {
        let (listener, addr) = test_listener().await;
        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::connect(&addr).await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());

        assert!(matches!(
            transport.send(b"PING\r").await,
            Err(Error::NotConnected)
        ));
        let mut buf = [0u8; 8];
        assert!(matches!(
            transport.receive(&mut buf, Duration::from_millis(10)).await,
            Err(Error::NotConnected)
        ));

        // Closing again is a no-op.
        transport.close().await.unwrap();
        server.abort();
    }
}
