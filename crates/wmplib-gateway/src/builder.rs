//! Configuration and construction of a [`GatewayClient`].
//!
//! [`GatewayBuilder`] collects connection parameters, applies any
//! overrides persisted in the host attribute store, and spawns the driver
//! task. Two entry points: [`connect`](GatewayBuilder::connect) performs
//! an eager first connection and fails fast, while
//! [`spawn`](GatewayBuilder::spawn) returns immediately and lets the
//! driver keep retrying in the background.

use std::sync::Arc;
use std::time::Duration;

use wmplib_core::error::{Error, Result};
use wmplib_core::store::{keys, AttributeStore, MemoryStore};
use wmplib_core::types::{TemperatureScale, UnitId};
use wmplib_transport::{PROXY_PORT, WMP_PORT};

use crate::client::GatewayClient;
use crate::driver::spawn_driver;
use crate::resolver::{AddressResolver, NeighborTableResolver};

/// Default keep-alive interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(32);

/// Default full-status refresh interval.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(64);

/// Relay-proxy connection parameters.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Proxy address, `host:port`.
    pub addr: String,
    /// Notification callback identifier registered with the proxy.
    pub callback_id: String,
    /// Notification repeat time in milliseconds.
    pub repeat_ms: u32,
}

/// Resolved configuration handed to the driver task.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway host (IP or name).
    pub host: String,
    /// Gateway WMP port.
    pub port: u16,
    /// Relay proxy to negotiate before direct connects, when configured.
    pub proxy: Option<ProxySettings>,
    /// Keep-alive interval.
    pub ping_interval: Duration,
    /// Full-status refresh interval.
    pub refresh_interval: Duration,
    /// Whether to re-sync the gateway wall clock hourly.
    pub clock_sync: bool,
    /// Temperature scale for the externally visible model.
    pub scale: TemperatureScale,
    /// Last-known gateway hardware identifier, used for rediscovery.
    pub mac: Option<String>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl GatewayConfig {
    /// Liveness deadline: the connection is force-closed when no bytes
    /// have arrived for this long.
    pub fn watchdog_timeout(&self) -> Duration {
        std::cmp::max(2 * self.refresh_interval, 3 * self.ping_interval)
    }

    /// Master tick period: the smaller of the two cadences, floored so
    /// aggressive test configurations cannot spin the loop.
    pub fn tick_period(&self) -> Duration {
        std::cmp::min(self.ping_interval, self.refresh_interval)
            .max(Duration::from_millis(100))
    }
}

/// Builder for a [`GatewayClient`].
pub struct GatewayBuilder {
    host: String,
    port: u16,
    use_proxy: bool,
    proxy_addr: String,
    callback_id: String,
    repeat_ms: u32,
    ping_interval: Duration,
    refresh_interval: Duration,
    clock_sync: bool,
    scale: Option<TemperatureScale>,
    connect_timeout: Duration,
    store: Option<Arc<dyn AttributeStore>>,
    resolver: Option<Arc<dyn AddressResolver>>,
    no_resolver: bool,
    units: Vec<UnitId>,
}

impl GatewayBuilder {
    /// Start building a client for the gateway at `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: WMP_PORT,
            use_proxy: false,
            proxy_addr: format!("127.0.0.1:{PROXY_PORT}"),
            callback_id: "wmplib".to_string(),
            repeat_ms: 1000,
            ping_interval: DEFAULT_PING_INTERVAL,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            clock_sync: true,
            scale: None,
            connect_timeout: Duration::from_secs(5),
            store: None,
            resolver: None,
            no_resolver: false,
            units: Vec::new(),
        }
    }

    /// Build from a host attribute store, using the last-known address
    /// persisted there.
    pub fn from_store(store: Arc<dyn AttributeStore>) -> Result<Self> {
        let host = store
            .get(keys::GATEWAY_IP)
            .ok_or_else(|| Error::NotFound("no stored gateway address".into()))?;
        Ok(Self::new(host).attribute_store(store))
    }

    /// Gateway WMP port (default 3310).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Negotiate the local relay proxy before direct connects.
    pub fn use_proxy(mut self, on: bool) -> Self {
        self.use_proxy = on;
        self
    }

    /// Relay proxy address (default `127.0.0.1:2504`).
    pub fn proxy_addr(mut self, addr: impl Into<String>) -> Self {
        self.proxy_addr = addr.into();
        self
    }

    /// Keep-alive interval (default 32 s).
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Full-status refresh interval (default 64 s).
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Hourly gateway clock sync (default on).
    pub fn clock_sync(mut self, on: bool) -> Self {
        self.clock_sync = on;
        self
    }

    /// Temperature scale for the externally visible model.
    pub fn temperature_scale(mut self, scale: TemperatureScale) -> Self {
        self.scale = Some(scale);
        self
    }

    /// TCP connect timeout (default 5 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The host attribute store to read overrides from and persist
    /// rediscovered addresses to. Defaults to an in-memory store.
    pub fn attribute_store(mut self, store: Arc<dyn AttributeStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The address resolver consulted when the stored address stops
    /// answering. Defaults to [`NeighborTableResolver`].
    pub fn address_resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Disable rediscovery entirely.
    pub fn no_rediscovery(mut self) -> Self {
        self.resolver = None;
        self.no_resolver = true;
        self
    }

    /// Provision units up front instead of waiting for the gateway to
    /// report them.
    pub fn provision_units<I: IntoIterator<Item = u8>>(mut self, units: I) -> Self {
        self.units = units.into_iter().map(UnitId::from_index).collect();
        self
    }

    /// Spawn the driver and eagerly establish the first connection,
    /// failing fast when the gateway is unreachable.
    pub async fn connect(self) -> Result<GatewayClient> {
        let client = self.spawn();
        match client.establish().await {
            Ok(()) => Ok(client),
            Err(e) => {
                client.shutdown().await;
                Err(e)
            }
        }
    }

    /// Spawn the driver without waiting for a connection; the master
    /// tick connects (and keeps reconnecting) in the background.
    pub fn spawn(self) -> GatewayClient {
        let store = self
            .store
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn AttributeStore>);

        // The host store overrides builder defaults; it is the
        // authoritative configuration surface.
        let ping_interval = read_secs(&*store, keys::PING_INTERVAL).unwrap_or(self.ping_interval);
        let refresh_interval =
            read_secs(&*store, keys::REFRESH_INTERVAL).unwrap_or(self.refresh_interval);
        let scale = store
            .get(keys::FORCE_UNITS)
            .and_then(|s| s.parse().ok())
            .or(self.scale)
            .unwrap_or_default();
        let use_proxy = store
            .get(keys::USE_PROXY)
            .map(|s| s.eq_ignore_ascii_case("true"))
            .unwrap_or(self.use_proxy);
        let mac = store.get(keys::GATEWAY_MAC);

        let proxy = use_proxy.then(|| ProxySettings {
            addr: self.proxy_addr.clone(),
            callback_id: self.callback_id.clone(),
            repeat_ms: self.repeat_ms,
        });

        let config = GatewayConfig {
            host: self.host,
            port: self.port,
            proxy,
            ping_interval,
            refresh_interval,
            clock_sync: self.clock_sync,
            scale,
            mac,
            connect_timeout: self.connect_timeout,
        };

        let resolver = if self.no_resolver {
            None
        } else {
            self.resolver
                .or_else(|| Some(Arc::new(NeighborTableResolver::new()) as Arc<dyn AddressResolver>))
        };

        let (tx, event_tx, cancel, task) = spawn_driver(config, store, resolver, self.units);
        GatewayClient::new(tx, event_tx, cancel, task, scale)
    }
}

fn read_secs(store: &dyn AttributeStore, key: &str) -> Option<Duration> {
    store
        .get(key)
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|&secs| secs > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ping: u64, refresh: u64) -> GatewayConfig {
        GatewayConfig {
            host: "192.168.1.50".to_string(),
            port: WMP_PORT,
            proxy: None,
            ping_interval: Duration::from_secs(ping),
            refresh_interval: Duration::from_secs(refresh),
            clock_sync: true,
            scale: TemperatureScale::Celsius,
            mac: None,
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn watchdog_is_max_of_double_refresh_and_triple_ping() {
        // Default intervals: max(2 x 64, 3 x 32) = 128 s.
        assert_eq!(config(32, 64).watchdog_timeout(), Duration::from_secs(128));
        // Ping-dominated: max(2 x 10, 3 x 30) = 90 s.
        assert_eq!(config(30, 10).watchdog_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn tick_period_is_smaller_interval() {
        assert_eq!(config(32, 64).tick_period(), Duration::from_secs(32));
        assert_eq!(config(60, 15).tick_period(), Duration::from_secs(15));
    }

    #[test]
    fn store_overrides_builder_intervals() {
        let store = Arc::new(MemoryStore::with_values([
            (keys::PING_INTERVAL, "10"),
            (keys::REFRESH_INTERVAL, "20"),
        ]));
        assert_eq!(
            read_secs(&*store, keys::PING_INTERVAL),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            read_secs(&*store, keys::REFRESH_INTERVAL),
            Some(Duration::from_secs(20))
        );
    }

    #[test]
    fn garbage_interval_values_ignored() {
        let store = MemoryStore::with_values([(keys::PING_INTERVAL, "soon"), (keys::REFRESH_INTERVAL, "0")]);
        assert_eq!(read_secs(&store, keys::PING_INTERVAL), None);
        assert_eq!(read_secs(&store, keys::REFRESH_INTERVAL), None);
    }

    #[test]
    fn from_store_requires_address() {
        let empty: Arc<dyn AttributeStore> = Arc::new(MemoryStore::new());
        assert!(GatewayBuilder::from_store(empty).is_err());

        let seeded: Arc<dyn AttributeStore> =
            Arc::new(MemoryStore::with_values([(keys::GATEWAY_IP, "10.0.0.7")]));
        let builder = GatewayBuilder::from_store(seeded).unwrap();
        assert_eq!(builder.host, "10.0.0.7");
    }
}
