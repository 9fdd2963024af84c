//! Error types for the presence core.
//!
//! Nothing here is fatal: ingest errors go back to the submitting
//! connection, store errors are logged and suppressed on the live path,
//! and delivery errors only ever drop the affected observer.

use thiserror::Error;

/// Rejection of a location sample. Reported to the originating connection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    /// The connection has no registered device.
    #[error("connection is not registered")]
    Unregistered,

    /// Latitude outside [-90, 90] or longitude outside [-180, 180].
    #[error("invalid coordinates: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    /// Missing or malformed field.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl IngestError {
    /// Stable machine code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::InvalidCoordinates { .. } => "invalid_coordinates",
            Self::Validation(_) => "validation",
        }
    }
}

/// Durable store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or the write failed. Transient from the core's view.
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    /// Schema creation failed at startup.
    #[error("schema setup failed: {0}")]
    Schema(sqlx::Error),
}

/// Failure to hand an event to a single observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("observer queue is full")]
    Lagging,

    #[error("observer disconnected")]
    Disconnected,
}
