//! Configuration management for Harvester services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Queue configuration (SQS)
    pub queue: QueueConfig,

    /// Run dispatch configuration
    pub dispatch: DispatchConfig,

    /// Scheduled run defaults and gating windows
    pub runs: RunDefaultsConfig,

    /// Downstream service configuration
    pub downstream: DownstreamConfig,

    /// Artifact storage configuration
    pub storage: StorageConfig,

    /// Maintenance loop configuration
    pub maintenance: MaintenanceConfig,

    /// SLA evaluator configuration
    pub sla: SlaConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Account ID header used for admin-surface scoping
    #[serde(default = "default_account_header")]
    pub account_header: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Normal run queue URL (scheduled runs)
    pub tasks_queue_url: Option<String>,

    /// Short task queue URL (maintenance and notifications)
    pub short_tasks_queue_url: Option<String>,

    /// On-demand run queue URL (user-initiated runs)
    pub on_demand_queue_url: Option<String>,

    /// Remote batch submission queue URL
    pub batch_queue_url: Option<String>,

    /// Maximum messages to receive per poll
    #[serde(default = "default_queue_batch_size")]
    pub batch_size: u32,

    /// Long polling timeout in seconds
    #[serde(default = "default_queue_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Visibility timeout in seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Wall-clock limit for normal runs
    #[serde(default = "default_task_time_limit")]
    pub task_time_limit_secs: u64,

    /// Wall-clock limit for short tasks
    #[serde(default = "default_short_task_time_limit")]
    pub short_task_time_limit_secs: u64,

    /// Wall-clock limit for on-demand runs
    #[serde(default = "default_on_demand_time_limit")]
    pub on_demand_time_limit_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Submit runs to the remote batch service instead of local task queues
    #[serde(default = "default_disabled")]
    pub submit_to_remote_batch: bool,

    /// Tick interval for the scheduled trigger in seconds
    #[serde(default = "default_trigger_interval")]
    pub trigger_interval_secs: u64,

    /// Tick interval for the maintenance loop in seconds
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunDefaultsConfig {
    /// Default document window start: today minus this many days
    #[serde(default = "default_start_offset")]
    pub start_offset_days: i64,

    /// Default document window end: today plus this many days
    #[serde(default = "default_end_offset")]
    pub end_offset_days: i64,

    /// Skip scheduling when a successful run exists within this window
    #[serde(default = "default_success_window")]
    pub success_window_hours: i64,

    /// Skip scheduling after this many failures...
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u64,

    /// ...within this window
    #[serde(default = "default_failure_window")]
    pub failure_window_hours: i64,

    /// Skip scheduling when any run was created within this window
    #[serde(default = "default_cooldown")]
    pub cooldown_hours: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownstreamConfig {
    /// Document-processing API base URL
    #[serde(default = "default_piq_api_base")]
    pub piq_api_base: String,

    /// API token for the document-processing service
    pub piq_api_token: Option<String>,

    /// Payment EDI step-function URL
    pub edi_step_function_url: Option<String>,

    /// Master switch for discovered-file uploads
    #[serde(default = "default_disabled")]
    pub discovered_file_api_switch: bool,

    /// Create invoice containers after upload
    #[serde(default = "default_disabled")]
    pub discovered_file_create_doc: bool,

    /// Fallback restaurant id when no location mapping resolves
    #[serde(default = "default_unknown_restaurant_id")]
    pub unknown_restaurant_id: i64,

    /// Request timeout in seconds
    #[serde(default = "default_downstream_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries on 5xx responses
    #[serde(default = "default_downstream_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// S3 bucket for stable artifact storage
    pub artifact_bucket: Option<String>,

    /// Root directory for per-run temp downloads
    #[serde(default = "default_temp_download_dir")]
    pub temp_download_dir: String,

    /// Retention window for local run files in minutes
    #[serde(default = "default_file_retention")]
    pub remove_files_older_than_minutes: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaintenanceConfig {
    /// Reschedule CREATED runs older than this many minutes
    #[serde(default = "default_stale_created_mins")]
    pub stale_created_after_mins: i64,

    /// But ignore CREATED runs older than this many days
    #[serde(default = "default_stale_created_max_days")]
    pub stale_created_max_age_days: i64,

    /// Retrigger STARTED runs whose execution started this many hours ago
    #[serde(default = "default_stuck_started_hours")]
    pub stuck_started_after_hours: i64,

    /// Cancel manual SCHEDULED runs older than this many days
    #[serde(default = "default_stale_manual_days")]
    pub stale_manual_after_days: i64,

    /// Re-run actions for files pending processing older than this many hours
    #[serde(default = "default_pending_invoice_hours")]
    pub pending_invoice_after_hours: i64,

    /// Window over which chequerun failures are counted, in days
    #[serde(default = "default_checkrun_window_days")]
    pub checkrun_window_days: i64,

    /// Attempt count at which a failing chequerun is disabled
    #[serde(default = "default_checkrun_disable_attempts")]
    pub checkrun_disable_attempts: u64,

    /// Attempt count at which a failing chequerun is reported as suspect
    #[serde(default = "default_checkrun_suspect_attempts")]
    pub checkrun_suspect_attempts: u64,

    /// Disable regardless of attempts when the payment date is older than this
    #[serde(default = "default_checkrun_payment_age_days")]
    pub checkrun_payment_age_days: i64,

    /// Kill switch: skip auto-retry handling of failing chequeruns entirely
    #[serde(default = "default_disabled")]
    pub ignore_retrying_failed_checkrun: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlaConfig {
    /// Enable SLA breach detection
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Weekday on which weekly schedules are evaluated (0 = Monday)
    #[serde(default = "default_sla_weekday")]
    pub weekly_check_weekday: u32,

    /// Day of month on which monthly schedules are evaluated
    #[serde(default = "default_sla_monthly_day")]
    pub monthly_check_day: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_account_header() -> String { "X-Account-ID".to_string() }
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_queue_batch_size() -> u32 { 10 }
fn default_queue_poll_timeout() -> u64 { 20 }
fn default_visibility_timeout() -> u64 { 300 }
fn default_task_time_limit() -> u64 { 90 * 60 }
fn default_short_task_time_limit() -> u64 { 15 * 60 }
fn default_on_demand_time_limit() -> u64 { 60 * 60 }
fn default_trigger_interval() -> u64 { 300 }
fn default_maintenance_interval() -> u64 { 3600 }
fn default_start_offset() -> i64 { 30 }
fn default_end_offset() -> i64 { 60 }
fn default_success_window() -> i64 { 24 }
fn default_failure_threshold() -> u64 { 3 }
fn default_failure_window() -> i64 { 12 }
fn default_cooldown() -> i64 { 3 }
fn default_piq_api_base() -> String { "http://localhost:8900".to_string() }
fn default_unknown_restaurant_id() -> i64 { 99999 }
fn default_downstream_timeout() -> u64 { 30 }
fn default_downstream_retries() -> u32 { 10 }
fn default_temp_download_dir() -> String { "/tmp/harvester".to_string() }
fn default_file_retention() -> i64 { 120 }
fn default_stale_created_mins() -> i64 { 60 }
fn default_stale_created_max_days() -> i64 { 3 }
fn default_stuck_started_hours() -> i64 { 4 }
fn default_stale_manual_days() -> i64 { 3 }
fn default_pending_invoice_hours() -> i64 { 4 }
fn default_checkrun_window_days() -> i64 { 60 }
fn default_checkrun_disable_attempts() -> u64 { 45 }
fn default_checkrun_suspect_attempts() -> u64 { 30 }
fn default_checkrun_payment_age_days() -> i64 { 100 }
fn default_sla_weekday() -> u32 { 5 }
fn default_sla_monthly_day() -> u32 { 5 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "harvester".to_string() }
fn default_enabled() -> bool { true }
fn default_disabled() -> bool { false }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__DISPATCH__SUBMIT_TO_REMOTE_BATCH=true
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
                account_header: default_account_header(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/harvester".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            queue: QueueConfig {
                tasks_queue_url: None,
                short_tasks_queue_url: None,
                on_demand_queue_url: None,
                batch_queue_url: None,
                batch_size: default_queue_batch_size(),
                poll_timeout_secs: default_queue_poll_timeout(),
                visibility_timeout_secs: default_visibility_timeout(),
                task_time_limit_secs: default_task_time_limit(),
                short_task_time_limit_secs: default_short_task_time_limit(),
                on_demand_time_limit_secs: default_on_demand_time_limit(),
            },
            dispatch: DispatchConfig {
                submit_to_remote_batch: default_disabled(),
                trigger_interval_secs: default_trigger_interval(),
                maintenance_interval_secs: default_maintenance_interval(),
            },
            runs: RunDefaultsConfig {
                start_offset_days: default_start_offset(),
                end_offset_days: default_end_offset(),
                success_window_hours: default_success_window(),
                failure_threshold: default_failure_threshold(),
                failure_window_hours: default_failure_window(),
                cooldown_hours: default_cooldown(),
            },
            downstream: DownstreamConfig {
                piq_api_base: default_piq_api_base(),
                piq_api_token: None,
                edi_step_function_url: None,
                discovered_file_api_switch: default_disabled(),
                discovered_file_create_doc: default_disabled(),
                unknown_restaurant_id: default_unknown_restaurant_id(),
                timeout_secs: default_downstream_timeout(),
                max_retries: default_downstream_retries(),
            },
            storage: StorageConfig {
                artifact_bucket: None,
                temp_download_dir: default_temp_download_dir(),
                remove_files_older_than_minutes: default_file_retention(),
            },
            maintenance: MaintenanceConfig {
                stale_created_after_mins: default_stale_created_mins(),
                stale_created_max_age_days: default_stale_created_max_days(),
                stuck_started_after_hours: default_stuck_started_hours(),
                stale_manual_after_days: default_stale_manual_days(),
                pending_invoice_after_hours: default_pending_invoice_hours(),
                checkrun_window_days: default_checkrun_window_days(),
                checkrun_disable_attempts: default_checkrun_disable_attempts(),
                checkrun_suspect_attempts: default_checkrun_suspect_attempts(),
                checkrun_payment_age_days: default_checkrun_payment_age_days(),
                ignore_retrying_failed_checkrun: default_disabled(),
            },
            sla: SlaConfig {
                enabled: default_enabled(),
                weekly_check_weekday: default_sla_weekday(),
                monthly_check_day: default_sla_monthly_day(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.queue.task_time_limit_secs, 5400);
        assert_eq!(config.queue.short_task_time_limit_secs, 900);
        assert_eq!(config.queue.on_demand_time_limit_secs, 3600);
        assert!(!config.dispatch.submit_to_remote_batch);
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/harvester");
    }

    #[test]
    fn test_maintenance_thresholds() {
        let config = AppConfig::default();
        assert_eq!(config.maintenance.stale_created_after_mins, 60);
        assert_eq!(config.maintenance.stuck_started_after_hours, 4);
        assert_eq!(config.maintenance.checkrun_disable_attempts, 45);
        assert!(
            config.maintenance.checkrun_suspect_attempts
                < config.maintenance.checkrun_disable_attempts
        );
    }
}
