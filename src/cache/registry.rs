//! Driver registry.
//!
//! Process-wide list of backend drivers in registration order. Selection of
//! the active driver is a lookup of `engine.type` with a fixed fallback: the
//! first registered proxy-cache driver, or the no-op driver when there is none.

use std::sync::{Arc, RwLock};

use serde::Serialize;

use super::driver::{CacheDriver, DriverKind};
use super::drivers::NoopDriver;
use super::lock::{rw_read, rw_write};
use super::policy::PolicyConfig;

const SOURCE: &str = "cache::registry";

/// Listing entry for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverSummary {
    pub id: String,
    pub label: String,
    pub available: bool,
}

pub struct DriverRegistry {
    drivers: RwLock<Vec<Arc<dyn CacheDriver>>>,
    noop: Arc<dyn CacheDriver>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(Vec::new()),
            noop: Arc::new(NoopDriver),
        }
    }

    /// Add a driver. Registering an id twice keeps the first instance.
    pub fn register(&self, driver: Arc<dyn CacheDriver>) -> bool {
        let mut drivers = rw_write(&self.drivers, SOURCE, "register");
        if drivers.iter().any(|known| known.id() == driver.id()) {
            return false;
        }
        drivers.push(driver);
        true
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn CacheDriver>> {
        rw_read(&self.drivers, SOURCE, "get")
            .iter()
            .find(|driver| driver.id() == id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// First registered proxy-cache driver, else the no-op driver.
    pub fn fallback(&self) -> Arc<dyn CacheDriver> {
        rw_read(&self.drivers, SOURCE, "fallback")
            .iter()
            .find(|driver| driver.kind() == DriverKind::ProxyCache)
            .cloned()
            .unwrap_or_else(|| self.noop.clone())
    }

    pub fn fallback_id(&self) -> &'static str {
        self.fallback().id()
    }

    /// Driver selected by `engine.type`; unknown or missing ids fall back.
    pub fn active(&self, config: &PolicyConfig) -> Arc<dyn CacheDriver> {
        config
            .engine_type()
            .and_then(|id| self.get(id))
            .unwrap_or_else(|| self.fallback())
    }

    /// Every registered driver with a fresh availability probe.
    pub async fn list_available(&self) -> Vec<DriverSummary> {
        let drivers = rw_read(&self.drivers, SOURCE, "list_available").clone();
        let mut summaries = Vec::with_capacity(drivers.len());
        for driver in drivers {
            summaries.push(DriverSummary {
                id: driver.id().to_string(),
                label: driver.label().to_string(),
                available: driver.probe().await,
            });
        }
        summaries
    }

    pub fn len(&self) -> usize {
        rw_read(&self.drivers, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::cache::drivers::{MemoryDriver, ProxyCacheDriver};

    fn proxy() -> Arc<dyn CacheDriver> {
        Arc::new(
            ProxyCacheDriver::new("http://127.0.0.1:9", Duration::from_millis(50), "http://site")
                .expect("proxy driver"),
        )
    }

    #[test]
    fn empty_registry_falls_back_to_noop() {
        let registry = DriverRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.active(&PolicyConfig::default()).id(), "noop");
    }

    #[test]
    fn duplicate_ids_are_ignored() {
        let registry = DriverRegistry::new();
        assert!(registry.register(Arc::new(MemoryDriver::new(4))));
        assert!(!registry.register(Arc::new(MemoryDriver::new(4))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn configured_driver_wins() {
        let registry = DriverRegistry::new();
        registry.register(proxy());
        registry.register(Arc::new(MemoryDriver::new(4)));

        let config = PolicyConfig::new(json!({ "engine": { "type": "memory" } }));
        assert_eq!(registry.active(&config).id(), "memory");
    }

    #[test]
    fn unknown_driver_falls_back_to_first_proxy() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(MemoryDriver::new(4)));
        registry.register(proxy());

        let config = PolicyConfig::new(json!({ "engine": { "type": "memcached" } }));
        assert_eq!(registry.active(&config).id(), "proxy");
        assert_eq!(registry.fallback_id(), "proxy");
    }

    #[test]
    fn fallback_ignores_non_proxy_drivers() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(MemoryDriver::new(4)));
        assert_eq!(registry.active(&PolicyConfig::default()).id(), "noop");
    }

    #[tokio::test]
    async fn listing_keeps_registration_order() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(MemoryDriver::new(4)));
        registry.register(proxy());

        let listed = registry.list_available().await;
        let ids: Vec<_> = listed.iter().map(|summary| summary.id.as_str()).collect();
        assert_eq!(ids, vec!["memory", "proxy"]);
        assert!(listed[0].available);
    }
}
