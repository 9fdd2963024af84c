use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::LocationStore;
use crate::error::StoreError;
use crate::history::HistoryBuffer;
use crate::models::{DriverRecord, RecordedLocation};

/// Memory-only backend, used when no database is configured.
///
/// Location reads are served from the shared [`HistoryBuffer`]; the ingest
/// pipeline stages every accepted sample there before writing through, so
/// location inserts have nothing further to store.
///
/// The driver map mirrors what the registry writes behind, so
/// `find_active_drivers` answers the same way the Postgres backend does. The
/// registry itself stays the live source in memory mode.
pub struct MemoryStore {
    drivers: DashMap<String, DriverRecord>,
    history: Arc<HistoryBuffer>,
}

impl MemoryStore {
    pub fn new(history: Arc<HistoryBuffer>) -> Self {
        Self {
            drivers: DashMap::new(),
            history,
        }
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    /// Writes that arrive out of order never move `last_seen` backwards.
    async fn upsert_driver(&self, driver: &DriverRecord) -> Result<(), StoreError> {
        self.drivers
            .entry(driver.device_id.clone())
            .and_modify(|existing| {
                if existing.last_seen <= driver.last_seen {
                    *existing = driver.clone();
                }
            })
            .or_insert_with(|| driver.clone());
        Ok(())
    }

    async fn find_active_drivers(&self) -> Result<Vec<DriverRecord>, StoreError> {
        let mut drivers: Vec<DriverRecord> =
            self.drivers.iter().map(|entry| entry.value().clone()).collect();
        drivers.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(drivers)
    }

    async fn insert_location(&self, _sample: &RecordedLocation) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_locations(&self, _batch: &[RecordedLocation]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn location_history(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RecordedLocation>, StoreError> {
        Ok(self.history.recent_since(device_id, since, Some(limit)))
    }

    async fn latest_location_per_device(&self) -> Result<Vec<RecordedLocation>, StoreError> {
        let mut latest: Vec<RecordedLocation> =
            self.history.latest_per_device().into_values().collect();
        latest.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(latest)
    }
}
