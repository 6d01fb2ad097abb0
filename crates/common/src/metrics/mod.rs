//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming for the run pipeline.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, histogram, Unit,
};
use std::time::Instant;

/// Metrics prefix for all Harvester metrics
pub const METRICS_PREFIX: &str = "harvester";

/// Histogram buckets for dispatch and run latency (in seconds). Runs are
/// browser-driven portal sessions, so the tail reaches into minutes.
pub const RUN_BUCKETS: &[f64] = &[
    1.0,
    5.0,
    15.0,
    30.0,
    60.0,
    120.0,
    300.0,
    600.0,
    1800.0,
    3600.0,
    5400.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Run lifecycle
    describe_counter!(
        format!("{}_runs_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total runs created"
    );

    describe_counter!(
        format!("{}_runs_dispatched_total", METRICS_PREFIX),
        Unit::Count,
        "Total runs handed to a dispatch lane"
    );

    describe_counter!(
        format!("{}_runs_completed_total", METRICS_PREFIX),
        Unit::Count,
        "Total runs reaching a terminal status"
    );

    describe_histogram!(
        format!("{}_run_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Run execution wall-clock time in seconds"
    );

    // Discovery pipeline
    describe_counter!(
        format!("{}_files_discovered_total", METRICS_PREFIX),
        Unit::Count,
        "Total files registered by the discovery pipeline"
    );

    describe_counter!(
        format!("{}_files_deduplicated_total", METRICS_PREFIX),
        Unit::Count,
        "Total files skipped as duplicates"
    );

    describe_counter!(
        format!("{}_file_actions_total", METRICS_PREFIX),
        Unit::Count,
        "Total post-discovery actions executed"
    );

    // Maintenance and SLA
    describe_counter!(
        format!("{}_maintenance_operations_total", METRICS_PREFIX),
        Unit::Count,
        "Total maintenance operations, by operation and outcome"
    );

    describe_counter!(
        format!("{}_sla_breaches_total", METRICS_PREFIX),
        Unit::Count,
        "Total delivery SLA breaches detected"
    );

    // Queue and database
    describe_counter!(
        format!("{}_queue_messages_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Total queue messages processed"
    );

    describe_gauge!(
        format!("{}_db_connections_active", METRICS_PREFIX),
        Unit::Count,
        "Active database connections"
    );

    tracing::info!("Metrics registered");
}

/// Record a run creation
pub fn record_run_created(operation: &str, created_via: &str) {
    counter!(
        format!("{}_runs_created_total", METRICS_PREFIX),
        "operation" => operation.to_string(),
        "created_via" => created_via.to_string()
    )
    .increment(1);
}

/// Record a run handed to a dispatch lane
pub fn record_run_dispatched(lane: &str, remote: bool) {
    counter!(
        format!("{}_runs_dispatched_total", METRICS_PREFIX),
        "lane" => lane.to_string(),
        "backend" => if remote { "batch" } else { "queue" }
    )
    .increment(1);
}

/// Record a terminal run outcome
pub fn record_run_completed(operation: &str, status: &str, duration_secs: Option<f64>) {
    counter!(
        format!("{}_runs_completed_total", METRICS_PREFIX),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if let Some(duration) = duration_secs {
        histogram!(
            format!("{}_run_duration_seconds", METRICS_PREFIX),
            "operation" => operation.to_string()
        )
        .record(duration);
    }
}

/// Record a file passing through the discovery pipeline
pub fn record_file_discovered(document_type: &str, deduplicated: bool) {
    counter!(
        format!("{}_files_discovered_total", METRICS_PREFIX),
        "document_type" => document_type.to_string()
    )
    .increment(1);

    if deduplicated {
        counter!(
            format!("{}_files_deduplicated_total", METRICS_PREFIX),
            "document_type" => document_type.to_string()
        )
        .increment(1);
    }
}

/// Record a post-discovery action outcome
pub fn record_file_action(action: &str, success: bool) {
    counter!(
        format!("{}_file_actions_total", METRICS_PREFIX),
        "action" => action.to_string(),
        "status" => if success { "success" } else { "error" }
    )
    .increment(1);
}

/// Record a maintenance operation outcome pair
pub fn record_maintenance(operation: &str, succeeded: u64, failed: u64) {
    counter!(
        format!("{}_maintenance_operations_total", METRICS_PREFIX),
        "operation" => operation.to_string(),
        "outcome" => "succeeded"
    )
    .increment(succeeded);

    counter!(
        format!("{}_maintenance_operations_total", METRICS_PREFIX),
        "operation" => operation.to_string(),
        "outcome" => "failed"
    )
    .increment(failed);
}

/// Record a delivery SLA breach
pub fn record_sla_breach(period: &str) {
    counter!(
        format!("{}_sla_breaches_total", METRICS_PREFIX),
        "period" => period.to_string()
    )
    .increment(1);
}

/// Helper to time a run from start to finish
pub struct RunTimer {
    start: Instant,
    operation: String,
}

impl RunTimer {
    pub fn start(operation: &str) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.to_string(),
        }
    }

    pub fn finish(self, status: &str) {
        record_run_completed(&self.operation, status, Some(self.start.elapsed().as_secs_f64()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in RUN_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
        // The wall-clock ceiling for the normal lane is a bucket boundary
        assert!(RUN_BUCKETS.contains(&5400.0));
    }

    #[test]
    fn test_run_timer() {
        let timer = RunTimer::start("invoice.download");
        std::thread::sleep(std::time::Duration::from_millis(5));
        timer.finish("SUCCEEDED");
    }
}
