//! Rate Watchdog - network traffic rate monitor
//!
//! Samples the packet counters written by the capture process, raises
//! threshold and anomaly alerts, and keeps a tiered history of every rate
//! in Redis.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use watchdog_core::{
    alerting::LogAlertSink,
    health::HealthRegistry,
    observability::StructuredLogger,
    scheduler::{RedisCounterSource, SchedulerBuilder},
    storage::{RedisBackend, StorageEngine},
};

mod api;
mod config;

const WATCHDOG_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting rate-watchdog");

    // Load configuration
    let settings = config::WatchdogSettings::load()?;
    let core = settings.core();
    core.validate()?;
    info!(instance = %settings.instance, redis_url = %settings.redis_url, "Watchdog configured");

    let health_registry = HealthRegistry::new();
    let logger = StructuredLogger::new(&settings.instance);

    // Backing store; the counter source shares its connection
    let backend = RedisBackend::connect(&settings.redis_url).await?;
    let source = RedisCounterSource::new(backend.connection())
        .with_prefix(settings.counter_prefix.clone());
    let engine = StorageEngine::from_config(Arc::new(backend), &core.storage)?;

    let scheduler = SchedulerBuilder::new(core)
        .source(Arc::new(source))
        .engine(Arc::new(engine))
        .sink(Arc::new(LogAlertSink::new(logger.clone())))
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()
        .await?;
    let keys = scheduler.keys().len();
    let enhanced = scheduler.is_enhanced();

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = scheduler.start(&shutdown_tx).await;
    logger.log_startup(WATCHDOG_VERSION, keys, enhanced);

    // Start health, metrics and status server
    let app_state = Arc::new(api::AppState::new(health_registry, handle.query()));
    let api_handle = tokio::spawn(api::serve(settings.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let abandoned = handle.shutdown().await;
    if abandoned > 0 {
        warn!(abandoned, "Sampling tasks abandoned mid-tick");
    }
    api_handle.abort();
    info!("Shutdown complete");

    Ok(())
}
