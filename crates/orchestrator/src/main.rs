//! Harvester Orchestrator
//!
//! Drives the run pipeline from the control-plane side:
//! 1. Trigger tick: evaluate schedules, create and dispatch due runs
//! 2. Maintenance tick: reconcile stuck runs, prune, retry, auto-disable
//! 3. SLA tick: detect missing-output breaches, create catch-up runs

mod emails;
mod maintenance;
mod sla;
mod trigger;

use crate::maintenance::MaintenanceLoop;
use crate::sla::SlaEvaluator;
use crate::trigger::Trigger;
use chrono::{NaiveDate, Utc};
use harvester_common::dispatch::{Dispatcher, RunFactory};
use harvester_common::{
    config::AppConfig, db::DbPool, metrics::register_metrics, queue::QueueSet, Repository, VERSION,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;
use tracing::{error, info, warn, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting Harvester Orchestrator v{}", VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    // Metrics exporter
    if config.observability.metrics_port > 0 {
        let addr = ([0, 0, 0, 0], config.observability.metrics_port);
        if let Err(e) = PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            warn!(error = %e, "Failed to install metrics exporter");
        }
    }
    register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let repo = Repository::new(db);

    // Queue clients
    let queues = QueueSet::from_config(&config.queue).await;

    // Core components
    let factory = RunFactory::new(
        repo.clone(),
        config.runs.start_offset_days,
        config.runs.end_offset_days,
    );
    let dispatcher = Dispatcher::new(repo.clone(), queues.clone(), &config.dispatch);
    let trigger = Trigger::new(
        repo.clone(),
        factory.clone(),
        dispatcher.clone(),
        config.runs.clone(),
    );
    let maintenance = MaintenanceLoop::new(
        repo.clone(),
        dispatcher.clone(),
        queues.clone(),
        config.maintenance.clone(),
        config.storage.clone(),
    );
    let sla = SlaEvaluator::new(
        repo.clone(),
        factory.clone(),
        dispatcher.clone(),
        queues.clone(),
        config.sla.clone(),
    );

    let mut trigger_tick =
        tokio::time::interval(Duration::from_secs(config.dispatch.trigger_interval_secs));
    let mut maintenance_tick =
        tokio::time::interval(Duration::from_secs(config.dispatch.maintenance_interval_secs));
    // SLA conditions are date-based; an hourly probe with a same-day guard
    // keeps each date fired at most once
    let mut sla_tick = tokio::time::interval(Duration::from_secs(3600));
    let mut last_sla_date: Option<NaiveDate> = None;

    info!(
        trigger_interval = config.dispatch.trigger_interval_secs,
        maintenance_interval = config.dispatch.maintenance_interval_secs,
        "Orchestrator ready"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = trigger_tick.tick() => {
                let now = Utc::now();
                if let Err(e) = trigger.tick(now.date_naive(), now).await {
                    error!(error = %e, "Trigger tick failed");
                }
            }
            _ = maintenance_tick.tick() => {
                if let Err(e) = maintenance.tick(Utc::now()).await {
                    error!(error = %e, "Maintenance tick failed");
                }
            }
            _ = sla_tick.tick() => {
                let now = Utc::now();
                let today = now.date_naive();
                if last_sla_date != Some(today) {
                    match sla.tick(now).await {
                        Ok(_) => last_sla_date = Some(today),
                        Err(e) => error!(error = %e, "SLA tick failed"),
                    }
                }
            }
        }
    }

    info!("Orchestrator shutting down");
    Ok(())
}
