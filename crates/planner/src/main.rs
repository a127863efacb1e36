//! Chunk planner daemon
//!
//! Hosts the planner engine, runs the monitor loop and serves health,
//! metrics and planning queries over HTTP.

use anyhow::{Context, Result};
use chunk_planner::{api, config::ServiceConfig};
use planner_lib::{
    telemetry::{FixedQueueStatus, HostProbe, LsfQueueStatus, PsutilHostProbe, QueueStatusSource},
    ConfigDocument, EngineMetrics, HistoryConfig, HistoryStore, PlannerEngine,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PLANNER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting chunk-planner");

    let config = ServiceConfig::load()?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;
    info!(data_dir = %config.data_dir.display(), use_lsf = config.use_lsf, "Planner configured");

    let document = ConfigDocument::load_or_default(config.config_path());
    let monitoring = document.config().monitoring.clone();
    let history = Arc::new(HistoryStore::open(HistoryConfig {
        max_entries: monitoring.history_max_entries,
        persistence_path: Some(config.history_path()),
    }));

    let host: Arc<dyn HostProbe> = Arc::new(PsutilHostProbe::new(&config.storage_path)?);
    let queues: Arc<dyn QueueStatusSource> = if config.use_lsf {
        Arc::new(
            LsfQueueStatus::new()
                .with_program(config.bqueues_program.clone())
                .with_timeout(monitoring.queue_query_timeout()),
        )
    } else {
        Arc::new(FixedQueueStatus::new())
    };

    let engine = Arc::new(PlannerEngine::new(document, history.clone(), host, queues));
    engine.start().await;
    engine.logger().log_startup(
        PLANNER_VERSION,
        engine.catalog().len(),
        history.stats().await.snapshots,
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let monitor = engine.monitor_loop().build()?;
    let monitor_handle = tokio::spawn(monitor.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(engine.clone(), EngineMetrics::new()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    engine.logger().log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    if let Err(e) = monitor_handle.await {
        warn!(error = %e, "Monitor loop task failed");
    }
    if let Err(e) = engine.persist().await {
        warn!(error = %e, "Failed to persist history on shutdown");
    }
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
