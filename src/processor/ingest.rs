use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::db::WriteBehind;
use crate::error::IngestError;
use crate::history::HistoryBuffer;
use crate::hub::BroadcastHub;
use crate::models::{ConnectionId, CurrentLocation, LocationSample, RecordedLocation};
use crate::presence::PresenceRegistry;

/// Result of a bulk sync. Rejections carry the index of the offending sample.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub accepted: usize,
    pub rejected: Vec<(usize, IngestError)>,
}

pub struct IngestPipeline {
    registry: Arc<PresenceRegistry>,
    history: Arc<HistoryBuffer>,
    writer: WriteBehind,
    hub: Arc<BroadcastHub>,
}

impl IngestPipeline {
    pub fn new(
        registry: Arc<PresenceRegistry>,
        history: Arc<HistoryBuffer>,
        writer: WriteBehind,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            registry,
            history,
            writer,
            hub,
        }
    }

    /// Records one live sample from a registered connection.
    pub fn ingest(
        &self,
        connection_id: ConnectionId,
        sample: &LocationSample,
    ) -> Result<RecordedLocation, IngestError> {
        let (device_id, driver_name) = self.resolve(connection_id)?;

        let recorded = match sample.validate(&device_id, &driver_name, true, Utc::now()) {
            Ok(r) => r,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Rejected location sample");
                return Err(e);
            }
        };

        // In-memory state commits before anything leaves the process.
        self.history.append(recorded.clone());
        self.registry
            .touch_with_location(&device_id, Some(current_location(&recorded)));

        self.writer.insert_location(recorded.clone());
        self.hub.publish_location_update(recorded.clone());

        debug!(
            device_id = %device_id,
            latitude = recorded.latitude,
            longitude = recorded.longitude,
            "Location recorded"
        );
        Ok(recorded)
    }

    /// Records samples buffered on the device while it was offline.
    ///
    /// Each sample is stored as a historical `online = false` snapshot and is
    /// not fanned out on its own. Afterwards the device is touched once and
    /// the driver list is published, since the sync itself proves it is live.
    pub fn ingest_batch(
        &self,
        connection_id: ConnectionId,
        samples: &[LocationSample],
    ) -> Result<BatchOutcome, IngestError> {
        let (device_id, driver_name) = self.resolve(connection_id)?;
        let now = Utc::now();

        let mut outcome = BatchOutcome::default();
        let mut accepted = Vec::with_capacity(samples.len());
        for (index, sample) in samples.iter().enumerate() {
            match sample.validate(&device_id, &driver_name, false, now) {
                Ok(recorded) => accepted.push(recorded),
                Err(e) => {
                    warn!(device_id = %device_id, index, error = %e, "Rejected synced sample");
                    outcome.rejected.push((index, e));
                }
            }
        }
        outcome.accepted = accepted.len();

        let newest = accepted
            .iter()
            .max_by_key(|s| s.timestamp)
            .map(current_location);

        self.history.extend(&device_id, accepted.iter().cloned());
        self.writer.insert_locations(device_id.clone(), accepted);
        self.registry.touch_with_location(&device_id, newest);
        self.registry.announce();

        info!(
            device_id = %device_id,
            accepted = outcome.accepted,
            rejected = outcome.rejected.len(),
            "Synced offline locations"
        );
        Ok(outcome)
    }

    fn resolve(&self, connection_id: ConnectionId) -> Result<(String, String), IngestError> {
        let driver = self
            .registry
            .device_for(connection_id)
            .and_then(|device_id| self.registry.driver(&device_id));

        match driver {
            Some(driver) => Ok((driver.device_id, driver.driver_name)),
            None => {
                warn!(connection_id = %connection_id, "Location from unregistered connection");
                Err(IngestError::Unregistered)
            }
        }
    }
}

fn current_location(sample: &RecordedLocation) -> CurrentLocation {
    CurrentLocation {
        latitude: sample.latitude,
        longitude: sample.longitude,
        timestamp: sample.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{LocationStore, MemoryStore};
    use crate::error::StoreError;
    use crate::models::{DriverRecord, OutboundEvent};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        registry: Arc<PresenceRegistry>,
        history: Arc<HistoryBuffer>,
        hub: Arc<BroadcastHub>,
        pipeline: IngestPipeline,
    }

    fn harness_with(store: Arc<dyn LocationStore>, history: Arc<HistoryBuffer>) -> Harness {
        let hub = Arc::new(BroadcastHub::new(64));
        let writer = WriteBehind::new(store);
        let registry = Arc::new(PresenceRegistry::new(writer.clone(), hub.clone()));
        let pipeline = IngestPipeline::new(registry.clone(), history.clone(), writer, hub.clone());
        Harness {
            registry,
            history,
            hub,
            pipeline,
        }
    }

    fn harness() -> Harness {
        let history = Arc::new(HistoryBuffer::new(100));
        harness_with(Arc::new(MemoryStore::new(history.clone())), history)
    }

    /// Store whose writes always fail, counting attempts.
    #[derive(Default)]
    struct UnreachableStore {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl LocationStore for UnreachableStore {
        fn backend(&self) -> &'static str {
            "unreachable"
        }

        async fn upsert_driver(&self, _driver: &DriverRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
        }

        async fn find_active_drivers(&self) -> Result<Vec<DriverRecord>, StoreError> {
            Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
        }

        async fn insert_location(&self, _sample: &RecordedLocation) -> Result<(), StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
        }

        async fn insert_locations(&self, _batch: &[RecordedLocation]) -> Result<(), StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
        }

        async fn location_history(
            &self,
            _device_id: &str,
            _since: Option<DateTime<Utc>>,
            _limit: usize,
        ) -> Result<Vec<RecordedLocation>, StoreError> {
            Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
        }

        async fn latest_location_per_device(&self) -> Result<Vec<RecordedLocation>, StoreError> {
            Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
        }
    }

    #[tokio::test]
    async fn rejects_unregistered_connection() {
        let h = harness();
        let result = h
            .pipeline
            .ingest(ConnectionId::new(), &LocationSample::new(10.0, 10.0));

        assert_eq!(result, Err(IngestError::Unregistered));
        assert_eq!(h.history.device_count(), 0);
    }

    #[tokio::test]
    async fn rejects_invalid_coordinates_without_side_effects() {
        let h = harness();
        let conn = ConnectionId::new();
        h.registry.register(conn, "D1", "Alice");

        let result = h.pipeline.ingest(conn, &LocationSample::new(95.0, 10.0));
        assert!(matches!(result, Err(IngestError::InvalidCoordinates { .. })));
        assert_eq!(h.history.len("D1"), 0);
        assert!(h.registry.driver("D1").unwrap().current_location.is_none());
    }

    #[tokio::test]
    async fn accepted_sample_is_recorded_and_published() {
        let h = harness();
        let conn = ConnectionId::new();
        h.registry.register(conn, "D1", "Alice");
        let mut observer = h.hub.subscribe();

        let recorded = h
            .pipeline
            .ingest(conn, &LocationSample::new(19.43, -99.13))
            .unwrap();
        assert_eq!(recorded.driver_name, "Alice");
        assert!(recorded.online);
        assert_eq!(h.history.recent("D1", None), vec![recorded.clone()]);

        let driver = h.registry.driver("D1").unwrap();
        assert!(driver.online);
        assert_eq!(driver.current_location.unwrap().latitude, 19.43);

        let event = observer.recv().await.unwrap();
        assert!(matches!(&*event, OutboundEvent::LocationUpdate(l) if *l == recorded));
    }

    #[tokio::test]
    async fn persistence_failure_is_not_surfaced() {
        let history = Arc::new(HistoryBuffer::new(100));
        let store = Arc::new(UnreachableStore::default());
        let h = harness_with(store.clone(), history);
        let conn = ConnectionId::new();
        h.registry.register(conn, "D1", "Alice");

        assert!(h.pipeline.ingest(conn, &LocationSample::new(1.0, 1.0)).is_ok());
        assert_eq!(h.history.len("D1"), 1);

        for _ in 0..100 {
            if store.attempts.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_samples_are_historical() {
        let h = harness();
        let conn = ConnectionId::new();
        h.registry.register(conn, "D1", "Alice");
        h.registry.mark_offline("D1");
        let mut observer = h.hub.subscribe();

        let base = Utc::now() - Duration::minutes(30);
        let samples = vec![
            LocationSample::new(1.0, 1.0).at(base),
            LocationSample::new(200.0, 1.0).at(base + Duration::minutes(1)),
            LocationSample::new(3.0, 3.0).at(base + Duration::minutes(2)),
        ];

        let outcome = h.pipeline.ingest_batch(conn, &samples).unwrap();
        assert_eq!(outcome.accepted, 2);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].0, 1);

        let recent = h.history.recent("D1", None);
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|s| !s.online));
        assert_eq!(recent[0].latitude, 3.0);

        let driver = h.registry.driver("D1").unwrap();
        assert!(driver.online);
        assert_eq!(driver.current_location.unwrap().latitude, 3.0);

        // Only the driver list goes out, no per-sample location events.
        let event = observer.recv().await.unwrap();
        assert!(matches!(&*event, OutboundEvent::DriversUpdated(_)));
        assert!(observer.try_recv().is_none());
    }

    #[tokio::test]
    async fn batch_from_unregistered_connection_is_rejected() {
        let h = harness();
        let result = h
            .pipeline
            .ingest_batch(ConnectionId::new(), &[LocationSample::new(1.0, 1.0)]);
        assert!(matches!(result, Err(IngestError::Unregistered)));
        assert_eq!(h.history.device_count(), 0);
    }
}
