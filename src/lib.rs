//! Live presence and location dissemination for a fleet of driver devices.
//!
//! Drivers connect, register and stream location samples; admin panels
//! subscribe to driver-list and location events. Location history is kept in
//! a bounded per-device buffer and written through to Postgres when a
//! database is configured.

pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod hub;
pub mod models;
pub mod presence;
pub mod processor;
pub mod session;
pub mod sweeper;
pub mod tracker;

pub use config::AppConfig;
pub use error::{DeliveryError, IngestError, StoreError};
pub use tracker::{LocationQuery, Tracker};
