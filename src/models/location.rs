use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

use crate::error::IngestError;

/// Location payload as sent by a device. Numbers may arrive as strings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub accuracy: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub heading: Option<f64>,
    #[serde(default, deserialize_with = "parse_timestamp_option")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            ..Default::default()
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Checks the payload against the registered device and applies defaults.
    pub fn validate(
        &self,
        device_id: &str,
        driver_name: &str,
        online: bool,
        now: DateTime<Utc>,
    ) -> Result<RecordedLocation, IngestError> {
        if let Some(claimed) = self.device_id.as_deref() {
            if claimed != device_id {
                return Err(IngestError::Validation(format!(
                    "device id {} does not match registered device {}",
                    claimed, device_id
                )));
            }
        }

        let latitude = self
            .latitude
            .ok_or_else(|| IngestError::Validation("missing latitude".to_string()))?;
        let longitude = self
            .longitude
            .ok_or_else(|| IngestError::Validation("missing longitude".to_string()))?;

        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(IngestError::InvalidCoordinates { latitude, longitude });
        }

        let accuracy = non_negative("accuracy", self.accuracy)?;
        let speed = non_negative("speed", self.speed)?;
        let heading = self.heading.unwrap_or(0.0);
        if !heading.is_finite() {
            return Err(IngestError::Validation("heading must be finite".to_string()));
        }

        Ok(RecordedLocation {
            device_id: device_id.to_string(),
            driver_name: driver_name.to_string(),
            latitude,
            longitude,
            accuracy,
            speed,
            heading,
            timestamp: self.timestamp.unwrap_or(now),
            online,
        })
    }
}

fn non_negative(field: &str, value: Option<f64>) -> Result<f64, IngestError> {
    let value = value.unwrap_or(0.0);
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(IngestError::Validation(format!(
            "{} must be a non-negative number",
            field
        )))
    }
}

/// An accepted, immutable location sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecordedLocation {
    pub device_id: String,
    pub driver_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub speed: f64,
    pub heading: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "isOnline")]
    pub online: bool,
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim()
                    .parse::<f64>()
                    .map(Some)
                    .map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or epoch milliseconds.
fn parse_timestamp_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrMillis {
        Millis(i64),
        Float(f64),
        String(String),
    }

    let v: Option<StringOrMillis> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrMillis::Millis(ms)) => from_millis(ms).map(Some).map_err(serde::de::Error::custom),
        Some(StringOrMillis::Float(ms)) => {
            from_millis(ms as i64).map(Some).map_err(serde::de::Error::custom)
        }
        Some(StringOrMillis::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Ok(Some(t.with_timezone(&Utc)));
            }
            if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Ok(Some(t.and_utc()));
            }
            s.parse::<i64>()
                .map_err(|_| format!("invalid timestamp: '{}'", s))
                .and_then(from_millis)
                .map(Some)
                .map_err(serde::de::Error::custom)
        }
        None => Ok(None),
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, String> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| format!("timestamp out of range: {}", ms))
}
