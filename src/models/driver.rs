use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverRecord {
    pub device_id: String,
    pub driver_name: String,
    #[serde(rename = "isOnline")]
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    pub current_location: Option<CurrentLocation>,
}

impl DriverRecord {
    pub fn new(device_id: impl Into<String>, driver_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            driver_name: driver_name.into(),
            online: true,
            last_seen: now,
            current_location: None,
        }
    }
}

/// Flat row of the `drivers` table.
#[derive(Debug, FromRow)]
pub struct DriverRow {
    pub device_id: String,
    pub driver_name: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub current_lat: Option<f64>,
    pub current_lng: Option<f64>,
    pub current_at: Option<DateTime<Utc>>,
}

impl From<DriverRow> for DriverRecord {
    fn from(row: DriverRow) -> Self {
        let current_location = match (row.current_lat, row.current_lng, row.current_at) {
            (Some(latitude), Some(longitude), Some(timestamp)) => Some(CurrentLocation {
                latitude,
                longitude,
                timestamp,
            }),
            _ => None,
        };

        Self {
            device_id: row.device_id,
            driver_name: row.driver_name,
            online: row.is_online,
            last_seen: row.last_seen,
            current_location,
        }
    }
}
