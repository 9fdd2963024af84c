use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 300;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_OBSERVER_BUFFER: usize = 256;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Postgres URL. `None` runs the service memory-only.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub stale_threshold_secs: u64,
    pub sweep_interval_secs: u64,
    pub history_capacity: usize,
    pub observer_buffer: usize,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let database_url = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Some(url),
            _ => compose_database_url(),
        };

        let db_max_connections = parse_var("DB_MAX_CONNECTIONS", 50);
        let stale_threshold_secs =
            parse_var("PRESENCE_STALE_THRESHOLD_SECS", DEFAULT_STALE_THRESHOLD_SECS);
        let sweep_interval_secs =
            parse_var("PRESENCE_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS);
        let history_capacity = parse_var("HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY).max(1);
        let observer_buffer = parse_var("OBSERVER_BUFFER", DEFAULT_OBSERVER_BUFFER).max(1);

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            database_url,
            db_max_connections,
            stale_threshold_secs,
            sweep_interval_secs,
            history_capacity,
            observer_buffer,
            log_level,
        })
    }

    /// Defaults with no durable store configured.
    pub fn memory_only() -> Self {
        Self {
            database_url: None,
            db_max_connections: 50,
            stale_threshold_secs: DEFAULT_STALE_THRESHOLD_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            observer_buffer: DEFAULT_OBSERVER_BUFFER,
            log_level: "info".to_string(),
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Builds a URL from the discrete `DB_*` variables when `DB_HOST` is present.
fn compose_database_url() -> Option<String> {
    let db_host = env::var("DB_HOST").ok()?;
    let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
    let db_name = env::var("DB_DATABASE").unwrap_or_else(|_| "siscom_admin".to_string());
    let db_user = env::var("DB_USER").unwrap_or_else(|_| "siscom".to_string());
    let db_pwd = env::var("DB_PWD").unwrap_or_else(|_| "siscom".to_string());

    Some(format!(
        "postgres://{}:{}@{}:{}/{}",
        db_user, db_pwd, db_host, db_port, db_name
    ))
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
