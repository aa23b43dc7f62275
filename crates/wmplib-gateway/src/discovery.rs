//! Gateway LAN discovery via UDP broadcast.
//!
//! WMP gateways answer a `DISCOVER` datagram sent to the protocol port
//! (3310) with a one-line identity reply:
//!
//! ```text
//! DISCOVER:<model>,<mac>,<ip>,ASCII,<fw>,<rssi>,<name>,<flags>,<count>
//! ```
//!
//! [`discover`] broadcasts one probe and collects replies for a bounded
//! window, dropping anything that is not a WMP-family gateway speaking
//! the ASCII protocol. Records are deduplicated by MAC.
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//!
//! # async fn example() -> wmplib_core::Result<()> {
//! let gateways = wmplib_gateway::discovery::discover(Duration::from_secs(10)).await?;
//! for gw in &gateways {
//!     println!("{} ({}) at {}", gw.model, gw.mac, gw.ip);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use wmplib_core::error::{Error, Result};
use wmplib_core::store::{keys, AttributeStore};
use wmplib_core::types::normalize_mac;
use wmplib_transport::WMP_PORT;

/// The literal probe datagram.
pub const DISCOVER_PROBE: &[u8] = b"DISCOVER";

/// Model family prefix of compatible gateways.
pub const MODEL_FAMILY: &str = "WMP";

/// Protocol tag of compatible gateways.
const PROTOCOL_TAG: &str = "ASCII";

/// A gateway discovered on the local network.
///
/// Transient: produced by one discovery run and consumed immediately for
/// address refresh or provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord {
    /// Gateway model string (e.g. `WMP-1`).
    pub model: String,
    /// Hardware MAC, as printed by the gateway.
    pub mac: String,
    /// Current IP address.
    pub ip: IpAddr,
    /// Firmware version string.
    pub firmware: String,
    /// Wi-Fi signal strength in dBm, when reported.
    pub rssi: Option<i32>,
    /// User-assigned gateway name.
    pub name: String,
    /// Vendor flags field, verbatim.
    pub flags: String,
    /// Number of units behind the gateway, when reported.
    pub unit_count: Option<u8>,
}

/// Broadcast a probe to the subnet and collect replies for `window`.
pub async fn discover(window: Duration) -> Result<Vec<DiscoveryRecord>> {
    let target = SocketAddr::from((Ipv4Addr::BROADCAST, WMP_PORT));
    discover_on("0.0.0.0:0", target, window).await
}

/// Discovery with explicit bind address and probe target.
///
/// This variant lets tests run against a loopback mock gateway instead
/// of the subnet broadcast address.
pub async fn discover_on(
    bind_addr: &str,
    target: SocketAddr,
    window: Duration,
) -> Result<Vec<DiscoveryRecord>> {
    let socket = tokio::net::UdpSocket::bind(bind_addr).await.map_err(|e| {
        Error::Transport(format!("failed to bind discovery socket on {bind_addr}: {e}"))
    })?;
    socket
        .set_broadcast(true)
        .map_err(|e| Error::Transport(format!("failed to enable broadcast: {e}")))?;
    socket
        .send_to(DISCOVER_PROBE, target)
        .await
        .map_err(|e| Error::Transport(format!("failed to send discovery probe: {e}")))?;

    tracing::debug!(target = %target, window_ms = window.as_millis(), "discovery probe sent");

    let mut gateways: HashMap<String, DiscoveryRecord> = HashMap::new();
    let mut buf = [0u8; 1024];
    let deadline = tokio::time::Instant::now() + window;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, src))) => {
                let reply = String::from_utf8_lossy(&buf[..n]);
                match parse_reply(reply.trim(), src.ip()) {
                    Ok(record) => {
                        tracing::debug!(
                            model = %record.model,
                            mac = %record.mac,
                            ip = %record.ip,
                            "gateway discovered"
                        );
                        gateways
                            .entry(normalize_mac(&record.mac))
                            .or_insert(record);
                    }
                    Err(e) => {
                        tracing::trace!(src = %src, error = %e, "ignoring discovery reply");
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::trace!(error = %e, "discovery recv error");
            }
            Err(_) => break,
        }
    }

    let result: Vec<DiscoveryRecord> = gateways.into_values().collect();
    tracing::debug!(count = result.len(), "discovery window closed");
    Ok(result)
}

/// Parse one discovery reply datagram.
///
/// Replies whose model is not in the WMP family, or whose protocol tag
/// is not `ASCII`, are rejected.
pub fn parse_reply(line: &str, src_ip: IpAddr) -> Result<DiscoveryRecord> {
    let payload = line
        .strip_prefix("DISCOVER:")
        .ok_or_else(|| Error::Protocol("not a discovery reply".into()))?;
    let fields: Vec<&str> = payload.split(',').map(str::trim).collect();
    if fields.len() < 4 {
        return Err(Error::Protocol(format!("short discovery reply: {line:?}")));
    }

    let model = fields[0].to_string();
    if !model.to_ascii_uppercase().contains(MODEL_FAMILY) {
        return Err(Error::NotFound(format!("incompatible model: {model}")));
    }
    if !fields[3].eq_ignore_ascii_case(PROTOCOL_TAG) {
        return Err(Error::NotFound(format!(
            "incompatible protocol tag: {}",
            fields[3]
        )));
    }

    let field = |i: usize| fields.get(i).copied().unwrap_or("").to_string();
    let ip = fields
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(src_ip);

    Ok(DiscoveryRecord {
        model,
        mac: field(1),
        ip,
        firmware: field(4),
        rssi: fields.get(5).and_then(|s| s.parse().ok()),
        name: field(6),
        flags: field(7),
        unit_count: fields.get(8).and_then(|s| s.parse().ok()),
    })
}

/// Split discovery results against the gateway already known to the
/// store: the known gateway only gets its stored address refreshed, and
/// the remaining records are returned for provisioning.
pub fn refresh_known_addresses(
    records: &[DiscoveryRecord],
    store: &dyn AttributeStore,
) -> Vec<DiscoveryRecord> {
    let known = store.get(keys::GATEWAY_MAC).map(|mac| normalize_mac(&mac));
    let mut unknown = Vec::new();
    for record in records {
        if known.as_deref() == Some(normalize_mac(&record.mac).as_str()) {
            tracing::debug!(mac = %record.mac, ip = %record.ip, "refreshing stored gateway address");
            store.set(keys::GATEWAY_IP, &record.ip.to_string());
        } else {
            unknown.push(record.clone());
        }
    }
    unknown
}
