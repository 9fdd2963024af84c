use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

use crate::error::StoreError;
use crate::models::{DriverRecord, RecordedLocation};

pub mod memory;
pub mod postgres;
pub mod queries;
pub mod write_behind;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use write_behind::WriteBehind;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Creates tables and indexes if they are missing.
pub async fn ensure_schema(pool: &DbPool) -> Result<(), StoreError> {
    for statement in [
        queries::CREATE_DRIVERS_TABLE,
        queries::CREATE_LOCATIONS_TABLE,
        queries::CREATE_LOCATIONS_INDEX,
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(StoreError::Schema)?;
    }
    Ok(())
}

/// Persistence gateway over driver and location records.
///
/// The backend is chosen once at startup; callers never branch on which one
/// they hold.
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    async fn upsert_driver(&self, driver: &DriverRecord) -> Result<(), StoreError>;

    /// All known drivers, most recently seen first.
    async fn find_active_drivers(&self) -> Result<Vec<DriverRecord>, StoreError>;

    async fn insert_location(&self, sample: &RecordedLocation) -> Result<(), StoreError>;

    async fn insert_locations(&self, batch: &[RecordedLocation]) -> Result<(), StoreError>;

    /// Newest first, at most `limit` entries, optionally bounded below by `since`.
    async fn location_history(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RecordedLocation>, StoreError>;

    /// One sample per device: the one with the greatest timestamp.
    async fn latest_location_per_device(&self) -> Result<Vec<RecordedLocation>, StoreError>;
}
