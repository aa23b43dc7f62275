//! Address resolution for gateways whose IP has changed.
//!
//! When the stored address stops answering, the driver resolves the
//! gateway's hardware identifier to candidate IP addresses through the
//! pluggable [`AddressResolver`] trait:
//!
//! - [`NeighborTableResolver`] -- nudges the LAN with a discovery
//!   broadcast (which doubles as the reachability probe and usually
//!   answers the question outright), then falls back to the platform
//!   neighbor table (`/proc/net/arp` on Linux).
//! - [`ProbeResolver`] -- last resort: direct TCP connect probes against
//!   a fixed candidate list on the WMP port.
//!
//! The neighbor-table parsing is pure and unit-tested; the surrounding
//! file and socket I/O is platform-dependent and intentionally thin.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use wmplib_core::error::{Error, Result};
use wmplib_core::transport::Transport;
use wmplib_core::types::normalize_mac;
use wmplib_transport::{TcpTransport, WMP_PORT};

use crate::discovery;

/// Resolves a gateway hardware identifier to candidate IP addresses.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Candidate addresses for the gateway with the given MAC, best
    /// first. An empty result is an error, not an empty success.
    async fn resolve(&self, mac: &str) -> Result<Vec<IpAddr>>;
}

/// Resolver backed by a discovery nudge plus the platform neighbor table.
#[derive(Debug, Clone)]
pub struct NeighborTableResolver {
    /// Path of the neighbor table; `/proc/net/arp` on Linux.
    table_path: PathBuf,
    /// How long to collect discovery replies during the nudge.
    probe_window: Duration,
}

impl NeighborTableResolver {
    /// Create a resolver with platform defaults.
    pub fn new() -> Self {
        Self {
            table_path: PathBuf::from("/proc/net/arp"),
            probe_window: Duration::from_secs(3),
        }
    }

    /// Override the neighbor table path (used by tests).
    pub fn with_table_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.table_path = path.into();
        self
    }

    /// Override the discovery-nudge collection window.
    pub fn with_probe_window(mut self, window: Duration) -> Self {
        self.probe_window = window;
        self
    }
}

impl Default for NeighborTableResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AddressResolver for NeighborTableResolver {
    async fn resolve(&self, mac: &str) -> Result<Vec<IpAddr>> {
        // The broadcast probe makes every gateway on the subnet answer,
        // which both refreshes the neighbor cache and usually yields the
        // address directly.
        match discovery::discover(self.probe_window).await {
            Ok(records) => {
                let wanted = normalize_mac(mac);
                let direct: Vec<IpAddr> = records
                    .iter()
                    .filter(|r| normalize_mac(&r.mac) == wanted)
                    .map(|r| r.ip)
                    .collect();
                if !direct.is_empty() {
                    return Ok(direct);
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "discovery nudge failed, trying neighbor table");
            }
        }

        let contents = tokio::fs::read_to_string(&self.table_path)
            .await
            .map_err(|e| {
                Error::Transport(format!(
                    "cannot read neighbor table {}: {e}",
                    self.table_path.display()
                ))
            })?;
        let candidates = parse_neighbor_table(&contents, mac);
        if candidates.is_empty() {
            Err(Error::NotFound(format!("no neighbor entry for {mac}")))
        } else {
            Ok(candidates)
        }
    }
}

/// Last-resort resolver: probe fixed candidates with a direct TCP
/// connect on the WMP port. Used when no neighbor-table data exists
/// (e.g. containers without `/proc/net/arp` visibility).
#[derive(Debug, Clone)]
pub struct ProbeResolver {
    candidates: Vec<IpAddr>,
    port: u16,
    timeout: Duration,
}

impl ProbeResolver {
    /// Create a probe resolver over a fixed candidate list.
    pub fn new<I: IntoIterator<Item = IpAddr>>(candidates: I) -> Self {
        Self {
            candidates: candidates.into_iter().collect(),
            port: WMP_PORT,
            timeout: Duration::from_millis(750),
        }
    }

    /// Override the probed port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

#[async_trait]
impl AddressResolver for ProbeResolver {
    async fn resolve(&self, mac: &str) -> Result<Vec<IpAddr>> {
        let mut alive = Vec::new();
        for &ip in &self.candidates {
            let addr = format!("{}:{}", ip, self.port);
            match TcpTransport::connect_with_timeout(&addr, self.timeout).await {
                Ok(mut transport) => {
                    let _ = transport.close().await;
                    alive.push(ip);
                }
                Err(e) => {
                    tracing::trace!(addr = %addr, error = %e, "probe candidate dead");
                }
            }
        }
        if alive.is_empty() {
            Err(Error::NotFound(format!(
                "no candidate answered the WMP port for {mac}"
            )))
        } else {
            Ok(alive)
        }
    }
}

/// Extract the addresses mapped to `mac` from a `/proc/net/arp`-format
/// neighbor table.
///
/// Incomplete entries (flags `0x0`) are skipped; the header line and
/// anything that does not parse as an address are ignored.
pub fn parse_neighbor_table(contents: &str, mac: &str) -> Vec<IpAddr> {
    let wanted = normalize_mac(mac);
    let mut out = Vec::new();
    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let Ok(ip) = fields[0].parse::<IpAddr>() else {
            continue;
        };
        if fields[2] == "0x0" {
            continue;
        }
        if normalize_mac(fields[3]) == wanted {
            out.push(ip);
        }
    }
    out
}
