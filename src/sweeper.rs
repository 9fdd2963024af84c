//! Periodic demotion of silent drivers to offline.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::presence::PresenceRegistry;

pub struct Sweeper {
    registry: Arc<PresenceRegistry>,
    threshold: Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(registry: Arc<PresenceRegistry>, threshold: Duration, interval: Duration) -> Self {
        Self {
            registry,
            threshold,
            interval,
        }
    }

    /// One tick evaluated at `now`. Returns how many drivers went offline.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let stale_before = match chrono::Duration::from_std(self.threshold)
            .ok()
            .and_then(|threshold| now.checked_sub_signed(threshold))
        {
            Some(t) => t,
            None => return 0,
        };

        let changed = self.registry.mark_offline_batch(stale_before).len();
        if changed > 0 {
            info!(changed, stale_before = %stale_before, "Presence sweep demoted drivers");
        } else {
            debug!("Presence sweep found no stale drivers");
        }
        changed
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Runs until the returned handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                threshold_secs = self.threshold.as_secs(),
                "Starting presence sweeper"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, WriteBehind};
    use crate::history::HistoryBuffer;
    use crate::hub::BroadcastHub;
    use crate::models::{ConnectionId, OutboundEvent};

    fn registry() -> (Arc<PresenceRegistry>, Arc<BroadcastHub>) {
        let store = Arc::new(MemoryStore::new(Arc::new(HistoryBuffer::new(10))));
        let hub = Arc::new(BroadcastHub::new(16));
        let registry = Arc::new(PresenceRegistry::new(WriteBehind::new(store), hub.clone()));
        (registry, hub)
    }

    #[tokio::test]
    async fn silent_driver_goes_offline_after_threshold() {
        let (registry, hub) = registry();
        registry.register(ConnectionId::new(), "D1", "Alice");
        let mut observer = hub.subscribe();

        let sweeper = Sweeper::new(registry.clone(), Duration::from_secs(300), Duration::from_secs(300));

        // Inside the threshold nothing changes.
        assert_eq!(sweeper.sweep(), 0);
        assert!(registry.driver("D1").unwrap().online);
        assert!(observer.try_recv().is_none());

        let later = Utc::now() + chrono::Duration::seconds(301);
        assert_eq!(sweeper.sweep_at(later), 1);
        assert!(!registry.driver("D1").unwrap().online);

        let event = observer.recv().await.unwrap();
        assert!(matches!(&*event, OutboundEvent::DriversUpdated(d) if !d[0].online));
    }

    #[tokio::test]
    async fn disconnected_driver_stays_online_until_swept() {
        let (registry, _hub) = registry();
        let conn = ConnectionId::new();
        registry.register(conn, "D1", "Alice");
        registry.unbind(conn);

        let sweeper = Sweeper::new(registry.clone(), Duration::from_secs(60), Duration::from_secs(60));
        assert!(registry.driver("D1").unwrap().online);
        assert_eq!(sweeper.sweep_at(Utc::now() + chrono::Duration::seconds(61)), 1);
        assert!(!registry.driver("D1").unwrap().online);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweeper_ticks() {
        let (registry, _hub) = registry();
        registry.register(ConnectionId::new(), "D1", "Alice");
        std::thread::sleep(Duration::from_millis(2));

        // Zero threshold: anything seen before the tick is stale.
        let handle = Sweeper::new(registry.clone(), Duration::ZERO, Duration::from_secs(5)).spawn();
        tokio::time::sleep(Duration::from_secs(6)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(!registry.driver("D1").unwrap().online);
        handle.abort();
    }
}
