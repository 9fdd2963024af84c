use siscom_presence::{AppConfig, Tracker};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Siscom Presence Service...");

    // Init core (Postgres when configured, memory otherwise)
    let tracker = Tracker::connect(&config).await?;
    info!(backend = tracker.backend(), "Presence core ready");

    let sweeper = tracker.spawn_sweeper();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    sweeper.abort();

    Ok(())
}
