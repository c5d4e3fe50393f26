use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use log::info;

use waytrack::{AgentConfig, HttpLocationSink, LocationAgent, SimulatedProvider};

/// Demo harness: drives the agent with a simulated vehicle and posts batches
/// to WAYTRACK_SINK_URL. Run with RUST_LOG=info to watch status transitions.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let sink_url = std::env::var("WAYTRACK_SINK_URL")
        .unwrap_or_else(|_| "http://localhost:8080/locations".to_string());
    let db_path = std::env::var("WAYTRACK_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("waytrack.sqlite3"));

    let mut config = AgentConfig::default();
    if let Some(interval) = env_u64("WAYTRACK_CAPTURE_INTERVAL_SECS") {
        config.capture_interval_secs = interval;
    }
    if let Some(interval) = env_u64("WAYTRACK_SYNC_INTERVAL_SECS") {
        config.sync_interval_secs = interval;
    }

    info!("waytrack-sim starting; sink {sink_url}, db {}", db_path.display());

    let provider = Arc::new(SimulatedProvider::new(40.7128, -74.0060));
    let sink = Arc::new(HttpLocationSink::new(sink_url, config.upload_timeout())?);
    let agent = LocationAgent::new(config, db_path, provider, sink).await?;

    let subscription = agent.subscribe(|snapshot| {
        info!(
            "status: tracking={} queue={} battery={:?} last_update={:?} last_error={:?}",
            snapshot.is_tracking,
            snapshot.queue_size,
            snapshot.battery_level,
            snapshot.last_update,
            snapshot.last_error
        );
    });

    agent.start_tracking("driver-1", Some("vehicle-1")).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    agent.stop_tracking().await?;
    agent.shutdown().await?;
    subscription.unsubscribe();

    Ok(())
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}
