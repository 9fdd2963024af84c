//! Logical transport events exchanged with drivers and admin panels.
//!
//! Encoded as `{"event": "<kebab-case-name>", "data": ...}`. The transport
//! collaborator decides how these travel on the wire.

use serde::{Deserialize, Serialize};

use super::{DriverRecord, LocationSample, RecordedLocation};
use crate::error::IngestError;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDriver {
    pub device_id: String,
    pub driver_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    RegisterDriver(RegisterDriver),
    LocationUpdate(LocationSample),
    /// Samples buffered on the device while it was offline.
    SyncLocations(Vec<LocationSample>),
    Disconnect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    DriversUpdated(Vec<DriverRecord>),
    LocationUpdate(RecordedLocation),
    Registered(DriverRecord),
    Synced { accepted: usize, rejected: usize },
    Error { code: String, message: String },
}

impl From<&IngestError> for OutboundEvent {
    fn from(err: &IngestError) -> Self {
        OutboundEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
