//! The host attribute-store collaborator.
//!
//! The automation controller hosting this client persists named string
//! attributes per gateway (configured intervals, the last-known address).
//! The core consumes that capability through the small [`AttributeStore`]
//! trait; [`MemoryStore`] is the in-process implementation used by tests
//! and demos.

use std::collections::HashMap;
use std::sync::RwLock;

/// Well-known attribute names consumed from the host store.
pub mod keys {
    /// Keep-alive interval in seconds (integer string).
    pub const PING_INTERVAL: &str = "pingInterval";
    /// Full-status refresh interval in seconds (integer string).
    pub const REFRESH_INTERVAL: &str = "refreshInterval";
    /// Temperature scale override: `C` or `F`.
    pub const FORCE_UNITS: &str = "forceUnits";
    /// Whether to negotiate the local relay proxy first: `true`/`false`.
    pub const USE_PROXY: &str = "useProxy";
    /// Last-known gateway hardware identifier (MAC).
    pub const GATEWAY_MAC: &str = "gatewayMac";
    /// Last-known gateway IP address.
    pub const GATEWAY_IP: &str = "gatewayIp";
}

/// Key/value attribute persistence supplied by the host controller.
///
/// Values are free-form strings; the driver parses what it needs and
/// writes back rediscovered addresses. Implementations must tolerate
/// concurrent access from outside the driver task.
pub trait AttributeStore: Send + Sync {
    /// Read an attribute by name.
    fn get(&self, name: &str) -> Option<String>;

    /// Write an attribute by name, replacing any previous value.
    fn set(&self, name: &str, value: &str);
}

/// In-memory [`AttributeStore`] for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with attribute pairs.
    pub fn with_values<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: RwLock::new(values),
        }
    }
}

impl AttributeStore for MemoryStore {
    fn get(&self, name: &str) -> Option<String> {
        self.values.read().expect("store lock poisoned").get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) {
        self.values
            .write()
            .expect("store lock poisoned")
            .insert(name.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get(keys::GATEWAY_IP), None);
        store.set(keys::GATEWAY_IP, "192.168.1.50");
        assert_eq!(store.get(keys::GATEWAY_IP).as_deref(), Some("192.168.1.50"));
        store.set(keys::GATEWAY_IP, "192.168.1.51");
        assert_eq!(store.get(keys::GATEWAY_IP).as_deref(), Some("192.168.1.51"));
    }

    #[test]
    fn seeded_store() {
        let store = MemoryStore::with_values([(keys::PING_INTERVAL, "32")]);
        assert_eq!(store.get(keys::PING_INTERVAL).as_deref(), Some("32"));
    }
}
