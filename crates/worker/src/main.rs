//! Harvester Worker
//!
//! Executes runs from the SQS lanes:
//! 1. Receives a run id from the tasks or on-demand queue
//! 2. Resolves the connector's adapter and drives the operation's flow
//! 3. Registers discovered files and routes them to their actions
//! 4. Records the terminal run status and daily job stats
//!
//! A second poller drains the short-task queue (file action retries, file
//! sweeps, notification relay, payment EDI handoff).

mod actions;
mod adapters;
mod checkruns;
mod download;
mod errors;
mod executor;
mod pipeline;

use crate::actions::ActionRunner;
use crate::adapters::AdapterRegistry;
use crate::executor::{sweep_run_files, sweep_terminal_runs, Executor};
use harvester_common::clients::{ArtifactStore, EdiClient, PiqClient};
use harvester_common::config::AppConfig;
use harvester_common::db::DbPool;
use harvester_common::metrics::register_metrics;
use harvester_common::queue::{Queue, QueueLane, QueueSet, RunTaskMessage, ShortTaskMessage};
use harvester_common::{Repository, VERSION};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing::{error, info, warn, Level};

const MAX_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: std::time::Duration = std::time::Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting Harvester Worker v{}", VERSION);

    let config = AppConfig::load().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;
    let config = Arc::new(config);

    if config.observability.metrics_port > 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()?;
        register_metrics();
    }

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let repo = Repository::new(db);

    let queues = QueueSet::from_config(&config.queue).await;

    let store = match ArtifactStore::new(&config.storage).await {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(error = %e, "Artifact store disabled");
            None
        }
    };
    let piq = match PiqClient::new(&config.downstream) {
        Ok(client) => Some(client),
        Err(e) => {
            warn!(error = %e, "Document-processing client disabled");
            None
        }
    };
    let edi = match EdiClient::new(&config.downstream) {
        Ok(client) => Some(client),
        Err(e) => {
            warn!(error = %e, "Payment EDI client disabled");
            None
        }
    };

    let actions = ActionRunner::new(
        repo.clone(),
        piq,
        store.clone(),
        queues.clone(),
        config.downstream.clone(),
    );

    let mut registry = AdapterRegistry::new();
    register_adapters(&mut registry);
    info!(adapters = ?registry.codes(), "Adapter registry populated");

    let executor = Arc::new(Executor::new(
        repo.clone(),
        registry,
        store,
        actions.clone(),
        config.storage.clone(),
    ));

    let short_task_handle = {
        let repo = repo.clone();
        let actions = actions.clone();
        let config = Arc::clone(&config);
        let queue = queues.short_tasks.clone();
        tokio::spawn(async move {
            if let Some(queue) = queue {
                poll_short_tasks(queue, repo, actions, edi, config).await;
            } else {
                warn!("Short-task queue not configured, poller idle");
            }
        })
    };

    let run_queues: Vec<(QueueLane, Queue)> = [
        (QueueLane::Tasks, queues.tasks.clone()),
        (QueueLane::OnDemand, queues.on_demand.clone()),
    ]
    .into_iter()
    .filter_map(|(lane, queue)| queue.map(|q| (lane, q)))
    .collect();

    if run_queues.is_empty() {
        warn!("No run queues configured, waiting for shutdown signal...");
        tokio::signal::ctrl_c().await?;
        short_task_handle.abort();
        info!("Worker shutting down");
        return Ok(());
    }

    info!("Worker ready, starting queue polling...");
    poll_runs(run_queues, executor, Arc::clone(&config)).await;

    short_task_handle.abort();
    info!("Worker shutting down");
    Ok(())
}

/// All production adapters register here under their connector codes.
fn register_adapters(registry: &mut AdapterRegistry) {
    use crate::adapters::mock::MockAdapter;

    registry.register("mock", || Arc::new(MockAdapter::succeeding("mock", 3)));
    registry.register("mock_bad_credentials", || {
        Arc::new(MockAdapter::bad_credentials("mock_bad_credentials"))
    });
}

/// Poll the run lanes until shutdown
async fn poll_runs(
    run_queues: Vec<(QueueLane, Queue)>,
    executor: Arc<Executor>,
    config: Arc<AppConfig>,
) {
    let mut consecutive_failures = 0u32;
    let batch_size = config.queue.batch_size as i32;
    let wait_secs = config.queue.poll_timeout_secs as i32;
    let mut lane_cursor = 0usize;

    loop {
        if consecutive_failures >= MAX_FAILURES {
            warn!(failures = consecutive_failures, "Circuit breaker open, pausing...");
            tokio::time::sleep(CIRCUIT_BREAK_DURATION).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming...");
        }

        // Alternate lanes so on-demand runs are not starved by the
        // scheduled backlog.
        let (lane, queue) = &run_queues[lane_cursor % run_queues.len()];
        lane_cursor = lane_cursor.wrapping_add(1);
        let visibility = QueueLane::time_limit_secs(lane, &config.queue) as i32;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            result = queue.receive(batch_size, wait_secs, visibility) => {
                match result {
                    Ok(messages) => {
                        for message in messages {
                            let receipt = match message.receipt_handle() {
                                Some(receipt) => receipt.to_string(),
                                None => continue,
                            };
                            let task: RunTaskMessage = match Queue::parse_message(&message) {
                                Ok(task) => task,
                                Err(e) => {
                                    error!(error = %e, "Unparseable run message, dropping");
                                    let _ = queue.delete_message(&receipt).await;
                                    continue;
                                }
                            };

                            info!(run_id = %task.run_id, lane = lane.as_str(), "Received run");
                            counter!("harvester_queue_messages_processed_total", "lane" => lane.as_str()).increment(1);

                            match executor.execute(task.run_id).await {
                                Ok(_) => {
                                    consecutive_failures = 0;
                                    if let Err(e) = queue.delete_message(&receipt).await {
                                        error!(error = %e, "Failed to delete message");
                                    }
                                }
                                Err(e) => {
                                    consecutive_failures += 1;
                                    error!(
                                        run_id = %task.run_id,
                                        error = %e,
                                        failures = consecutive_failures,
                                        "Run execution failed before settling"
                                    );
                                    // Redelivered after the visibility timeout;
                                    // the terminal-status guard makes a replay
                                    // harmless.
                                }
                            }
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, "Failed to receive messages from queue");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }
}

/// Poll the short-task lane until the main loop aborts us
async fn poll_short_tasks(
    queue: Queue,
    repo: Repository,
    actions: ActionRunner,
    edi: Option<EdiClient>,
    config: Arc<AppConfig>,
) {
    let batch_size = config.queue.batch_size as i32;
    let wait_secs = config.queue.poll_timeout_secs as i32;
    let visibility = config.queue.short_task_time_limit_secs as i32;

    loop {
        let messages = match queue.receive(batch_size, wait_secs, visibility).await {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "Failed to receive short tasks");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                continue;
            }
        };

        for message in messages {
            let Some(receipt) = message.receipt_handle().map(str::to_string) else {
                continue;
            };
            let task: ShortTaskMessage = match Queue::parse_message(&message) {
                Ok(task) => task,
                Err(e) => {
                    error!(error = %e, "Unparseable short task, dropping");
                    let _ = queue.delete_message(&receipt).await;
                    continue;
                }
            };

            counter!("harvester_queue_messages_processed_total", "lane" => "short-tasks")
                .increment(1);

            match handle_short_task(task, &repo, &actions, edi.as_ref(), &config).await {
                Ok(()) => {
                    if let Err(e) = queue.delete_message(&receipt).await {
                        error!(error = %e, "Failed to delete short task");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Short task failed, leaving for redelivery");
                }
            }
        }
    }
}

async fn handle_short_task(
    task: ShortTaskMessage,
    repo: &Repository,
    actions: &ActionRunner,
    edi: Option<&EdiClient>,
    config: &AppConfig,
) -> errors::Result<()> {
    match task {
        ShortTaskMessage::FileAction { discovered_file_id } => {
            let Some(file) = repo.find_discovered_file_by_id(discovered_file_id).await? else {
                warn!(file_id = %discovered_file_id, "File gone, dropping action task");
                return Ok(());
            };
            let Some(run) = repo.find_run_by_id(file.run_id).await? else {
                warn!(run_id = %file.run_id, "Run gone, dropping action task");
                return Ok(());
            };
            let Some((job, connector)) = repo.find_job_with_connector(file.job_id).await? else {
                warn!(job_id = %file.job_id, "Job gone, dropping action task");
                return Ok(());
            };
            actions.execute_for(&file, &run, &job, &connector).await?;
            Ok(())
        }
        ShortTaskMessage::DeleteRunFiles { older_than_minutes } => {
            let (removed, failed) =
                sweep_terminal_runs(repo, &config.storage, older_than_minutes).await?;
            let (orphans, orphan_failures) =
                sweep_run_files(&config.storage, older_than_minutes).await?;
            info!(
                removed,
                failed,
                orphans,
                orphan_failures,
                "Run file sweep finished"
            );
            Ok(())
        }
        ShortTaskMessage::Email(email) => {
            // Delivery is the relay's job; the worker records the intent so
            // operators can trace what went out.
            info!(
                job_id = %email.job_id,
                template = %email.template,
                subject = %email.subject,
                "Notification relayed"
            );
            Ok(())
        }
        ShortTaskMessage::PaymentEdi(payment) => {
            let Some(edi) = edi else {
                error!(run_id = %payment.run_id, "Payment EDI client not configured");
                return Ok(());
            };
            edi.process_payment(&payment.payload).await?;
            info!(
                run_id = %payment.run_id,
                file_id = %payment.discovered_file_id,
                "Payment file handed to EDI processing"
            );
            Ok(())
        }
    }
}
