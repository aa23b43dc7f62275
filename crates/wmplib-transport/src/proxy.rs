//! Relay-proxy transport to a WMP gateway.
//!
//! Some installations run a small local relay proxy that holds the TCP
//! session to the gateway on the client's behalf and forwards a
//! notification when data arrives. [`ProxyTransport`] negotiates that
//! relay and then behaves exactly like a direct socket, so the protocol
//! driver does not distinguish the two after connect.
//!
//! # Handshake
//!
//! ```text
//! proxy -> client:  OK <banner...>
//! client -> proxy:  CONN <ip>:<port> NTFY=<callback-id> RTIM=<ms> PACE=1
//! proxy -> client:  OK CONN
//! ```
//!
//! Every step is bounded by the handshake timeout; any other reply aborts
//! the negotiation so the caller can fall back to a direct connection.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use wmplib_core::error::{Error, Result};
use wmplib_core::transport::Transport;

use crate::tcp::classify_io_error;

/// Default timeout for the complete proxy handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Parameters of the `CONN` directive sent to the relay proxy.
#[derive(Debug, Clone)]
pub struct ProxyDirective {
    /// Gateway IP the proxy should hold a session to.
    pub target_ip: String,
    /// Gateway TCP port (normally 3310).
    pub target_port: u16,
    /// Notification callback identifier registered with the proxy.
    pub callback_id: String,
    /// Notification repeat time in milliseconds.
    pub repeat_ms: u32,
}

impl ProxyDirective {
    /// The wire form of the directive, without the terminator.
    pub fn directive_line(&self) -> String {
        format!(
            "CONN {}:{} NTFY={} RTIM={} PACE=1",
            self.target_ip, self.target_port, self.callback_id, self.repeat_ms
        )
    }
}

/// Transport negotiated through the local relay proxy.
#[derive(Debug)]
pub struct ProxyTransport {
    /// The stream to the proxy, `None` once closed.
    stream: Option<TcpStream>,
    /// Proxy address string, kept for logging.
    proxy_addr: String,
}

impl ProxyTransport {
    /// Connect to the proxy and negotiate a relay to the target gateway.
    pub async fn negotiate(proxy_addr: &str, directive: &ProxyDirective) -> Result<Self> {
        Self::negotiate_with_timeout(proxy_addr, directive, HANDSHAKE_TIMEOUT).await
    }

    /// Negotiate with an explicit handshake timeout.
    pub async fn negotiate_with_timeout(
        proxy_addr: &str,
        directive: &ProxyDirective,
        timeout: Duration,
    ) -> Result<Self> {
        tracing::debug!(
            proxy = %proxy_addr,
            target = %directive.target_ip,
            "negotiating relay proxy"
        );

        let deadline = tokio::time::Instant::now() + timeout;
        let mut stream = tokio::time::timeout(timeout, TcpStream::connect(proxy_addr))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::Transport(format!("proxy connect failed: {e}")))?;
        let _ = stream.set_nodelay(true);

        let banner = read_handshake_line(&mut stream, deadline).await?;
        if !banner.starts_with("OK") {
            return Err(Error::Transport(format!(
                "unexpected proxy banner: {banner}"
            )));
        }

        let line = format!("{}\r\n", directive.directive_line());
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(classify_io_error)?;

        let confirm = read_handshake_line(&mut stream, deadline).await?;
        if !confirm.starts_with("OK") {
            return Err(Error::Transport(format!(
                "proxy refused CONN: {confirm}"
            )));
        }

        tracing::info!(
            proxy = %proxy_addr,
            target = %directive.target_ip,
            "relay proxy link established"
        );

        Ok(Self {
            stream: Some(stream),
            proxy_addr: proxy_addr.to_string(),
        })
    }

    /// The proxy address this transport negotiated with.
    pub fn proxy_addr(&self) -> &str {
        &self.proxy_addr
    }
}

#[async_trait]
impl Transport for ProxyTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        stream.write_all(data).await.map_err(classify_io_error)?;
        stream.flush().await.map_err(classify_io_error)?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        match tokio::time::timeout(timeout, stream.read(buf)).await {
            Ok(Ok(0)) => {
                tracing::info!(proxy = %self.proxy_addr, "proxy closed the relay");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(classify_io_error(e)),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!(proxy = %self.proxy_addr, "closing relay link");
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Read one CR/LF-terminated line, skipping leading blank lines, bounded
/// by `deadline`.
async fn read_handshake_line(
    stream: &mut TcpStream,
    deadline: tokio::time::Instant,
) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout);
        }
        let n = tokio::time::timeout(remaining, stream.read(&mut byte))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(classify_io_error)?;
        if n == 0 {
            return Err(Error::ConnectionLost);
        }
        match byte[0] {
            b'\r' | b'\n' => {
                if line.is_empty() {
                    continue;
                }
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            b => line.push(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn directive() -> ProxyDirective {
        ProxyDirective {
            target_ip: "192.168.1.50".to_string(),
            target_port: 3310,
            callback_id: "wmplib".to_string(),
            repeat_ms: 1000,
        }
    }

    #[test]
    fn directive_wire_form() {
        assert_eq!(
            directive().directive_line(),
            "CONN 192.168.1.50:3310 NTFY=wmplib RTIM=1000 PACE=1"
        );
    }

    #[tokio::test]
    async fn negotiate_and_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let proxy = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            reader
                .get_mut()
                .write_all(b"OK WMP RELAY v2\r\n")
                .await
                .unwrap();

            let mut conn_line = String::new();
            reader.read_line(&mut conn_line).await.unwrap();
            assert_eq!(
                conn_line.trim_end(),
                "CONN 192.168.1.50:3310 NTFY=wmplib RTIM=1000 PACE=1"
            );
            reader.get_mut().write_all(b"OK CONN\r\n").await.unwrap();

            // After the handshake the relay is a transparent pipe.
            let mut ping = String::new();
            reader.read_line(&mut ping).await.unwrap();
            assert_eq!(ping.trim_end(), "PING");
            reader.get_mut().write_all(b"PONG:-60\r\n").await.unwrap();
        });

        let mut transport = ProxyTransport::negotiate(&addr, &directive()).await.unwrap();
        assert!(transport.is_connected());

        transport.send(b"PING\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = transport
            .receive(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"PONG:-60\r\n");

        transport.close().await.unwrap();
        proxy.await.unwrap();
    }

    #[tokio::test]
    async fn refused_conn_directive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let proxy = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            reader.get_mut().write_all(b"OK WMP RELAY v2\r\n").await.unwrap();
            let mut conn_line = String::new();
            reader.read_line(&mut conn_line).await.unwrap();
            reader.get_mut().write_all(b"ERR BUSY\r\n").await.unwrap();
        });

        let err = ProxyTransport::negotiate(&addr, &directive())
            .await
            .unwrap_err();
        match err {
            Error::Transport(msg) => assert!(msg.contains("refused CONN")),
            other => panic!("expected Transport error, got: {other:?}"),
        }
        proxy.await.unwrap();
    }

    #[tokio::test]
    async fn bad_banner_aborts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let proxy = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"HELLO FTP\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let err = ProxyTransport::negotiate(&addr, &directive())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        proxy.abort();
    }

    #[tokio::test]
    async fn silent_proxy_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let proxy = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = ProxyTransport::negotiate_with_timeout(
            &addr,
            &directive(),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout));
        proxy.abort();
    }
}
