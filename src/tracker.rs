//! Assembly of the presence core and its query surface.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::AppConfig;
use crate::db::{self, LocationStore, MemoryStore, PgStore, WriteBehind};
use crate::error::StoreError;
use crate::history::HistoryBuffer;
use crate::hub::{BroadcastHub, Observer};
use crate::models::{DriverRecord, RecordedLocation};
use crate::presence::PresenceRegistry;
use crate::processor::IngestPipeline;
use crate::session::Session;
use crate::sweeper::Sweeper;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Bounds for a per-device history query.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationQuery {
    pub limit: Option<usize>,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct Tracker {
    registry: Arc<PresenceRegistry>,
    pipeline: Arc<IngestPipeline>,
    store: Arc<dyn LocationStore>,
    hub: Arc<BroadcastHub>,
    config: Arc<AppConfig>,
}

impl Tracker {
    /// Selects the backend from configuration: Postgres when a URL is set,
    /// memory otherwise.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let Some(database_url) = config.database_url.as_deref() else {
            info!("No database configured, running memory-only");
            return Ok(Self::in_memory(config));
        };

        let pool = db::init_pool(database_url, config.db_max_connections).await?;
        db::ensure_schema(&pool).await?;
        info!("Connected to database");

        let history = Arc::new(HistoryBuffer::new(config.history_capacity));
        let tracker = Self::assemble(config, history, Arc::new(PgStore::new(pool)));
        let drivers = tracker.store.find_active_drivers().await?;
        tracker.registry.hydrate(drivers);
        Ok(tracker)
    }

    pub fn in_memory(config: &AppConfig) -> Self {
        let history = Arc::new(HistoryBuffer::new(config.history_capacity));
        let store = Arc::new(MemoryStore::new(history.clone()));
        Self::assemble(config, history, store)
    }

    fn assemble(
        config: &AppConfig,
        history: Arc<HistoryBuffer>,
        store: Arc<dyn LocationStore>,
    ) -> Self {
        let hub = Arc::new(BroadcastHub::new(config.observer_buffer));
        let writer = WriteBehind::new(store.clone());
        let registry = Arc::new(PresenceRegistry::new(writer.clone(), hub.clone()));
        let pipeline = Arc::new(IngestPipeline::new(
            registry.clone(),
            history,
            writer,
            hub.clone(),
        ));

        Self {
            registry,
            pipeline,
            store,
            hub,
            config: Arc::new(config.clone()),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// A new driver connection.
    pub fn session(&self) -> Session {
        Session::new(self.registry.clone(), self.pipeline.clone())
    }

    /// A new admin panel. It receives only events published from now on.
    pub fn subscribe(&self) -> Observer {
        self.hub.subscribe()
    }

    pub fn drivers(&self) -> Vec<DriverRecord> {
        self.registry.list_active()
    }

    /// History for one device, newest first.
    pub async fn locations(
        &self,
        device_id: &str,
        query: LocationQuery,
    ) -> Result<Vec<RecordedLocation>, StoreError> {
        let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        self.store.location_history(device_id, query.since, limit).await
    }

    /// Latest sample of every device in the fleet.
    pub async fn latest_locations(&self) -> Result<Vec<RecordedLocation>, StoreError> {
        self.store.latest_location_per_device().await
    }

    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.registry.clone(),
            self.config.stale_threshold(),
            self.config.sweep_interval(),
        )
    }

    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.sweeper().spawn()
    }
}
