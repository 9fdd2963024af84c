use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{queries, DbPool, LocationStore};
use crate::error::StoreError;
use crate::models::driver::DriverRow;
use crate::models::{DriverRecord, RecordedLocation};

/// Durable backend on Postgres.
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocationStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn upsert_driver(&self, driver: &DriverRecord) -> Result<(), StoreError> {
        let location = driver.current_location.as_ref();
        sqlx::query(queries::UPSERT_DRIVER)
            .bind(&driver.device_id)
            .bind(&driver.driver_name)
            .bind(driver.online)
            .bind(driver.last_seen)
            .bind(location.map(|l| l.latitude))
            .bind(location.map(|l| l.longitude))
            .bind(location.map(|l| l.timestamp))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_active_drivers(&self) -> Result<Vec<DriverRecord>, StoreError> {
        let rows: Vec<DriverRow> = sqlx::query_as(queries::SELECT_DRIVERS)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(DriverRecord::from).collect())
    }

    async fn insert_location(&self, sample: &RecordedLocation) -> Result<(), StoreError> {
        sqlx::query(queries::INSERT_LOCATION)
            .bind(&sample.device_id)
            .bind(&sample.driver_name)
            .bind(sample.latitude)
            .bind(sample.longitude)
            .bind(sample.accuracy)
            .bind(sample.speed)
            .bind(sample.heading)
            .bind(sample.timestamp)
            .bind(sample.online)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_locations(&self, batch: &[RecordedLocation]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut device_ids = Vec::with_capacity(batch.len());
        let mut driver_names = Vec::with_capacity(batch.len());
        let mut latitudes = Vec::with_capacity(batch.len());
        let mut longitudes = Vec::with_capacity(batch.len());
        let mut accuracies = Vec::with_capacity(batch.len());
        let mut speeds = Vec::with_capacity(batch.len());
        let mut headings = Vec::with_capacity(batch.len());
        let mut timestamps = Vec::with_capacity(batch.len());
        let mut online = Vec::with_capacity(batch.len());

        for sample in batch {
            device_ids.push(sample.device_id.clone());
            driver_names.push(sample.driver_name.clone());
            latitudes.push(sample.latitude);
            longitudes.push(sample.longitude);
            accuracies.push(sample.accuracy);
            speeds.push(sample.speed);
            headings.push(sample.heading);
            timestamps.push(sample.timestamp);
            online.push(sample.online);
        }

        // One statement keeps the batch atomic.
        sqlx::query(queries::INSERT_LOCATIONS_BATCH)
            .bind(device_ids)
            .bind(driver_names)
            .bind(latitudes)
            .bind(longitudes)
            .bind(accuracies)
            .bind(speeds)
            .bind(headings)
            .bind(timestamps)
            .bind(online)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn location_history(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RecordedLocation>, StoreError> {
        let rows = sqlx::query_as::<_, RecordedLocation>(queries::SELECT_LOCATION_HISTORY)
            .bind(device_id)
            .bind(since)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn latest_location_per_device(&self) -> Result<Vec<RecordedLocation>, StoreError> {
        let rows = sqlx::query_as::<_, RecordedLocation>(queries::SELECT_LATEST_PER_DEVICE)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
