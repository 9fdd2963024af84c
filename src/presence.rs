//! Presence registry: connection bindings and canonical driver state.
//!
//! A transport disconnect only unbinds the connection and refreshes
//! `last_seen`. Drivers go offline through the sweeper, so a quick reconnect
//! never flickers the admin view.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::db::WriteBehind;
use crate::hub::BroadcastHub;
use crate::models::{ConnectionId, CurrentLocation, DriverRecord};

pub struct PresenceRegistry {
    bindings: DashMap<ConnectionId, String>,
    drivers: DashMap<String, DriverRecord>,
    writer: WriteBehind,
    hub: Arc<BroadcastHub>,
}

impl PresenceRegistry {
    pub fn new(writer: WriteBehind, hub: Arc<BroadcastHub>) -> Self {
        Self {
            bindings: DashMap::new(),
            drivers: DashMap::new(),
            writer,
            hub,
        }
    }

    /// Seeds driver records loaded from the durable store. Live records win.
    pub fn hydrate(&self, drivers: Vec<DriverRecord>) {
        let count = drivers.len();
        for driver in drivers {
            self.drivers.entry(driver.device_id.clone()).or_insert(driver);
        }
        info!(count, "Loaded persisted drivers");
    }

    pub fn register(&self, connection_id: ConnectionId, device_id: &str, driver_name: &str) -> DriverRecord {
        let now = Utc::now();
        let driver = {
            let mut entry = self
                .drivers
                .entry(device_id.to_string())
                .or_insert_with(|| DriverRecord::new(device_id, driver_name, now));
            entry.driver_name = driver_name.to_string();
            entry.online = true;
            entry.last_seen = now;
            entry.clone()
        };

        if let Some(previous) = self.bindings.insert(connection_id, device_id.to_string()) {
            if previous != device_id {
                debug!(connection_id = %connection_id, previous = %previous, "connection rebound to another device");
            }
        }

        info!(device_id = %device_id, driver_name = %driver_name, connection_id = %connection_id, "Driver registered");

        self.writer.upsert_drivers(vec![driver.clone()]);
        self.announce();
        driver
    }

    pub fn touch(&self, device_id: &str) -> Option<DriverRecord> {
        self.touch_with_location(device_id, None)
    }

    /// Marks the driver live now. The current location only moves forward in time.
    pub fn touch_with_location(
        &self,
        device_id: &str,
        location: Option<CurrentLocation>,
    ) -> Option<DriverRecord> {
        let driver = {
            let mut driver = self.drivers.get_mut(device_id)?;
            driver.online = true;
            driver.last_seen = Utc::now();
            if let Some(location) = location {
                let newer = driver
                    .current_location
                    .map_or(true, |current| location.timestamp >= current.timestamp);
                if newer {
                    driver.current_location = Some(location);
                }
            }
            driver.clone()
        };

        self.writer.upsert_drivers(vec![driver.clone()]);
        Some(driver)
    }

    /// Removes the binding. The driver keeps its online flag until swept.
    pub fn unbind(&self, connection_id: ConnectionId) -> Option<String> {
        let (_, device_id) = self.bindings.remove(&connection_id)?;

        let driver = self.drivers.get_mut(&device_id).map(|mut driver| {
            driver.last_seen = Utc::now();
            driver.clone()
        });
        if let Some(driver) = driver {
            self.writer.upsert_drivers(vec![driver]);
        }

        info!(device_id = %device_id, connection_id = %connection_id, "Driver disconnected");
        Some(device_id)
    }

    pub fn device_for(&self, connection_id: ConnectionId) -> Option<String> {
        self.bindings.get(&connection_id).map(|d| d.value().clone())
    }

    pub fn driver(&self, device_id: &str) -> Option<DriverRecord> {
        self.drivers.get(device_id).map(|d| d.value().clone())
    }

    /// Every known driver, most recently seen first.
    pub fn list_active(&self) -> Vec<DriverRecord> {
        let mut drivers: Vec<DriverRecord> =
            self.drivers.iter().map(|entry| entry.value().clone()).collect();
        drivers.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        drivers
    }

    /// Returns `true` if the driver was online.
    pub fn mark_offline(&self, device_id: &str) -> bool {
        let driver = match self.drivers.get_mut(device_id) {
            Some(mut driver) if driver.online => {
                driver.online = false;
                driver.clone()
            }
            _ => return false,
        };

        info!(device_id = %device_id, "Driver marked offline");
        self.writer.upsert_drivers(vec![driver]);
        self.announce();
        true
    }

    /// Demotes every online driver last seen before `stale_before`.
    pub fn mark_offline_batch(&self, stale_before: DateTime<Utc>) -> Vec<DriverRecord> {
        let mut changed = Vec::new();
        for mut driver in self.drivers.iter_mut() {
            if driver.online && driver.last_seen < stale_before {
                driver.online = false;
                changed.push(driver.clone());
            }
        }

        if !changed.is_empty() {
            for driver in &changed {
                info!(device_id = %driver.device_id, last_seen = %driver.last_seen, "Driver marked offline");
            }
            self.writer.upsert_drivers(changed.clone());
            self.announce();
        }
        changed
    }

    /// Publishes the full driver list to observers.
    pub fn announce(&self) {
        self.hub.publish_drivers_updated(self.list_active());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::history::HistoryBuffer;
    use crate::models::OutboundEvent;
    use chrono::Duration;

    fn registry() -> (PresenceRegistry, Arc<BroadcastHub>) {
        let store = Arc::new(MemoryStore::new(Arc::new(HistoryBuffer::new(10))));
        let hub = Arc::new(BroadcastHub::new(16));
        (PresenceRegistry::new(WriteBehind::new(store), hub.clone()), hub)
    }

    #[tokio::test]
    async fn register_upserts_and_binds() {
        let (registry, hub) = registry();
        let mut observer = hub.subscribe();
        let conn = ConnectionId::new();

        let driver = registry.register(conn, "D1", "Alice");
        assert!(driver.online);
        assert_eq!(registry.device_for(conn).as_deref(), Some("D1"));

        let event = observer.recv().await.unwrap();
        assert!(matches!(&*event, OutboundEvent::DriversUpdated(d) if d[0].device_id == "D1"));
    }

    #[tokio::test]
    async fn re_registering_keeps_one_record() {
        let (registry, _hub) = registry();
        let first = ConnectionId::new();
        let second = ConnectionId::new();

        registry.register(first, "D1", "Alice");
        registry.register(first, "D1", "Alice");
        registry.register(second, "D1", "Alice");

        let drivers = registry.list_active();
        assert_eq!(drivers.len(), 1);
        assert!(drivers[0].online);
        assert_eq!(registry.device_for(second).as_deref(), Some("D1"));
    }

    #[tokio::test]
    async fn register_updates_name() {
        let (registry, _hub) = registry();
        registry.register(ConnectionId::new(), "D1", "Alice");
        registry.register(ConnectionId::new(), "D1", "Alice B.");
        assert_eq!(registry.driver("D1").unwrap().driver_name, "Alice B.");
    }

    #[tokio::test]
    async fn unbind_keeps_driver_online() {
        let (registry, _hub) = registry();
        let conn = ConnectionId::new();
        registry.register(conn, "D1", "Alice");

        assert_eq!(registry.unbind(conn).as_deref(), Some("D1"));
        assert!(registry.device_for(conn).is_none());
        assert!(registry.driver("D1").unwrap().online);
        assert!(registry.unbind(conn).is_none());
    }

    #[tokio::test]
    async fn mark_offline_batch_only_touches_stale_drivers() {
        let (registry, hub) = registry();
        registry.register(ConnectionId::new(), "D1", "Alice");
        registry.register(ConnectionId::new(), "D2", "Bob");
        let mut observer = hub.subscribe();

        let cutoff = Utc::now() + Duration::seconds(1);
        // D2 is active after the cutoff.
        {
            let mut d2 = registry.drivers.get_mut("D2").unwrap();
            d2.last_seen = cutoff + Duration::seconds(1);
        }

        let changed = registry.mark_offline_batch(cutoff);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].device_id, "D1");
        assert!(!registry.driver("D1").unwrap().online);
        assert!(registry.driver("D2").unwrap().online);
        assert!(observer.try_recv().is_some());

        // Nothing left to demote, so nothing is published.
        assert!(registry.mark_offline_batch(cutoff).is_empty());
        assert!(observer.try_recv().is_none());
    }

    #[tokio::test]
    async fn touch_brings_driver_back_online() {
        let (registry, _hub) = registry();
        registry.register(ConnectionId::new(), "D1", "Alice");
        assert!(registry.mark_offline("D1"));
        assert!(!registry.mark_offline("D1"));

        let now = Utc::now();
        let location = CurrentLocation {
            latitude: 1.0,
            longitude: 2.0,
            timestamp: now,
        };
        let driver = registry.touch_with_location("D1", Some(location)).unwrap();
        assert!(driver.online);
        assert_eq!(driver.current_location, Some(location));

        // An older fix does not replace the current location.
        let stale = CurrentLocation {
            timestamp: now - Duration::minutes(5),
            ..location
        };
        let driver = registry.touch_with_location("D1", Some(stale)).unwrap();
        assert_eq!(driver.current_location, Some(location));

        assert!(registry.touch("missing").is_none());
    }

    #[tokio::test]
    async fn hydrate_does_not_override_live_records() {
        let (registry, _hub) = registry();
        registry.register(ConnectionId::new(), "D1", "Alice");

        let mut persisted = DriverRecord::new("D1", "Old Name", Utc::now() - Duration::days(1));
        persisted.online = false;
        registry.hydrate(vec![persisted, DriverRecord::new("D2", "Bob", Utc::now())]);

        assert_eq!(registry.driver("D1").unwrap().driver_name, "Alice");
        assert_eq!(registry.list_active().len(), 2);
    }
}
