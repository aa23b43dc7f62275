//! Mock WMP gateway for protocol-level testing.
//!
//! [`MockGateway`] listens on a random loopback port and speaks just
//! enough WMP to exercise the driver: it answers command lines with
//! canned response lines, can push unsolicited notifications at any
//! time, and records every command it receives for assertions.
//!
//! The gateway accepts one connection at a time but keeps listening
//! after a disconnect, so reconnect behavior can be tested end to end.
//!
//! # Example
//!
//! ```no_run
//! use wmplib_test_harness::MockGateway;
//!
//! # async fn example() -> wmplib_core::Result<()> {
//! let gateway = MockGateway::start().await?;
//! gateway.respond("GET,1:*", &["CHN,1:ONOFF,ON", "CHN,1:MODE,COOL"]);
//! // ... connect a client to gateway.addr() ...
//! gateway.push("CHN,1:AMBTEMP,225").await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use wmplib_core::error::{Error, Result};

/// Default identity line the mock answers `ID` with.
pub const DEFAULT_IDENTITY: &str = "ID:WMP-1,CC3F1D018734,127.0.0.1,ASCII,v1.3.3,-45,mock,N";

type ResponseMap = Arc<Mutex<HashMap<String, Vec<String>>>>;

/// A scripted mock WMP gateway on a loopback port.
pub struct MockGateway {
    addr: String,
    responses: ResponseMap,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicU32>,
    push_tx: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl MockGateway {
    /// Bind a random loopback port and start serving.
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock gateway: {e}")))?;
        let addr = listener.local_addr().map_err(Error::Io)?.to_string();

        let responses: ResponseMap = Arc::new(Mutex::new(HashMap::new()));
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicU32::new(0));
        let (push_tx, push_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(serve(
            listener,
            Arc::clone(&responses),
            Arc::clone(&received),
            Arc::clone(&connections),
            push_rx,
        ));

        Ok(Self {
            addr,
            responses,
            received,
            connections,
            push_tx,
            task,
        })
    }

    /// The `host:port` the mock is listening on.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The host part of the listening address.
    pub fn host(&self) -> &str {
        "127.0.0.1"
    }

    /// The port the mock is listening on.
    pub fn port(&self) -> u16 {
        self.addr
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0)
    }

    /// Script the response lines for an exact command line.
    ///
    /// Commands without a scripted response fall back to defaults:
    /// `ID` answers the identity line, `PING` answers `PONG:-50`, and
    /// any `SET`/`CFG` command answers `ACK`.
    pub fn respond(&self, command: &str, lines: &[&str]) {
        self.responses
            .lock()
            .expect("mock gateway lock")
            .insert(command.to_string(), lines.iter().map(|s| s.to_string()).collect());
    }

    /// Push an unsolicited line to the connected client. Queued until a
    /// client is connected.
    pub async fn push(&self, line: &str) {
        let _ = self.push_tx.send(line.to_string());
        // Give the serve loop a chance to flush the push out.
        tokio::task::yield_now().await;
    }

    /// Every command line received so far, in order.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().expect("mock gateway lock").clone()
    }

    /// How many connections have been accepted.
    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Stop serving.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

async fn serve(
    listener: TcpListener,
    responses: ResponseMap,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicU32>,
    mut push_rx: mpsc::UnboundedReceiver<String>,
) {
    loop {
        let Ok((stream, peer)) = listener.accept().await else {
            return;
        };
        connections.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(peer = %peer, "mock gateway accepted connection");
        serve_connection(stream, &responses, &received, &mut push_rx).await;
        tracing::debug!(peer = %peer, "mock gateway connection closed");
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    responses: &ResponseMap,
    received: &Arc<Mutex<Vec<String>>>,
    push_rx: &mut mpsc::UnboundedReceiver<String>,
) {
    let mut buf = [0u8; 1024];
    let mut pending = Vec::new();

    loop {
        tokio::select! {
            push = push_rx.recv() => {
                let Some(line) = push else { return; };
                if write_line(&mut stream, &line).await.is_err() {
                    return;
                }
            }
            read = stream.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                pending.extend_from_slice(&buf[..n]);
                while let Some(command) = take_line(&mut pending) {
                    received
                        .lock()
                        .expect("mock gateway lock")
                        .push(command.clone());
                    for line in response_lines(responses, &command) {
                        if write_line(&mut stream, &line).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Pop one CR/LF-terminated line off the pending buffer.
fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    loop {
        let end = pending.iter().position(|&b| b == b'\r' || b == b'\n')?;
        let rest_start = if pending.get(end) == Some(&b'\r') && pending.get(end + 1) == Some(&b'\n')
        {
            end + 2
        } else {
            end + 1
        };
        let line = String::from_utf8_lossy(&pending[..end]).into_owned();
        pending.drain(..rest_start);
        if !line.is_empty() {
            return Some(line);
        }
    }
}

fn response_lines(responses: &ResponseMap, command: &str) -> Vec<String> {
    if let Some(lines) = responses.lock().expect("mock gateway lock").get(command) {
        return lines.clone();
    }
    if command == "ID" {
        return vec![DEFAULT_IDENTITY.to_string()];
    }
    if command == "PING" {
        return vec!["PONG:-50".to_string()];
    }
    if command.starts_with("SET") || command.starts_with("CFG") {
        return vec!["ACK".to_string()];
    }
    Vec::new()
}

async fn write_line(stream: &mut TcpStream, line: &str) -> std::io::Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await
}
