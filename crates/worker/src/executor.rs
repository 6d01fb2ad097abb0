//! Run executor
//!
//! Pulls a run id off the queue, drives the adapter flow for its operation
//! and records the terminal status. Every exit path lands the run in a
//! terminal state except the early skips, which leave it untouched for
//! maintenance to deal with.

use crate::actions::ActionRunner;
use crate::adapters::{AdapterRegistry, FlowOutcome, RunContext};
use crate::checkruns::CheckRunRecorder;
use crate::errors::{FlowError, Result, WorkerError};
use crate::pipeline::FilePipeline;
use harvester_common::clients::ArtifactStore;
use harvester_common::config::StorageConfig;
use harvester_common::db::models::{Connector, Job, Operation, Run, DISABLED_REASON_INCORRECT_CREDENTIALS};
use harvester_common::metrics::RunTimer;
use harvester_common::Repository;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// What happened to the run, for queue acknowledgement and stats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    Succeeded,
    PartiallySucceeded,
    Failed,
    /// The run was gone or already terminal; nothing to do
    Skipped,
}

pub struct Executor {
    repo: Repository,
    registry: AdapterRegistry,
    store: Option<ArtifactStore>,
    actions: ActionRunner,
    storage: StorageConfig,
}

impl Executor {
    pub fn new(
        repo: Repository,
        registry: AdapterRegistry,
        store: Option<ArtifactStore>,
        actions: ActionRunner,
        storage: StorageConfig,
    ) -> Self {
        Self {
            repo,
            registry,
            store,
            actions,
            storage,
        }
    }

    /// Execute one run end to end
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn execute(&self, run_id: Uuid) -> Result<ExecutionResult> {
        let Some(run) = self.repo.find_run_by_id(run_id).await? else {
            warn!("Run not found, dropping message");
            return Ok(ExecutionResult::Skipped);
        };
        if run.is_terminal() {
            warn!(status = %run.status, "Run is already terminal, dropping message");
            return Ok(ExecutionResult::Skipped);
        }

        let Some((job, connector)) = self.repo.find_job_with_connector(run.job_id).await? else {
            self.repo.record_failure(run.id, None).await?;
            error!(job_id = %run.job_id, "Job or connector missing, run failed");
            return Ok(ExecutionResult::Failed);
        };

        let operation = match run.operation() {
            Ok(op) => op,
            Err(e) => {
                warn!(%e, "Run carries an unknown operation");
                self.repo.record_failure(run.id, None).await?;
                return Ok(ExecutionResult::Failed);
            }
        };

        let adapter = match self.registry.resolve(&connector.adapter_code) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(%e, adapter_code = %connector.adapter_code, "No adapter registered");
                self.repo.record_failure(run.id, None).await?;
                return Ok(ExecutionResult::Failed);
            }
        };

        let run = self.repo.record_execution_start(run.id).await?;
        let timer = RunTimer::start(operation.as_str());
        info!(operation = %operation, adapter = adapter.code(), "Run started");

        let temp_dir = self.run_temp_dir(run.id);
        tokio::fs::create_dir_all(&temp_dir).await.ok();

        let ctx = RunContext {
            run: run.clone(),
            job: job.clone(),
            connector: connector.clone(),
            pipeline: FilePipeline::new(self.repo.clone(), self.store.clone(), self.actions.clone()),
            check_runs: CheckRunRecorder::new(self.repo.clone()),
            temp_dir: temp_dir.clone(),
        };

        let flow_result = dispatch_flow(adapter.as_ref(), operation, &ctx).await;
        let result = self.settle(&run, &job, flow_result).await?;

        timer.finish(match result {
            ExecutionResult::Succeeded => "SUCCEEDED",
            ExecutionResult::PartiallySucceeded => "PARTIALLY_SUCCEEDED",
            ExecutionResult::Failed => "FAILED",
            ExecutionResult::Skipped => "SKIPPED",
        });
        Ok(result)
    }

    /// Record the terminal status and the daily job stats
    async fn settle(
        &self,
        run: &Run,
        job: &Job,
        flow_result: std::result::Result<FlowOutcome, FlowError>,
    ) -> Result<ExecutionResult> {
        let today = chrono::Utc::now().date_naive();
        let manual = if run.is_manual { 1 } else { 0 };

        match flow_result {
            Ok(outcome) => {
                let result = if outcome.partial_failures.is_empty() {
                    self.repo.record_success(run.id).await?;
                    ExecutionResult::Succeeded
                } else {
                    self.repo.record_partial_success(run.id).await?;
                    ExecutionResult::PartiallySucceeded
                };
                info!(
                    artifacts = outcome.artifacts,
                    partial_failures = outcome.partial_failures.len(),
                    "Run finished"
                );
                self.repo
                    .increment_job_stat(job.id, today, 1, 1, manual, 0, outcome.artifacts as i32)
                    .await?;
                Ok(result)
            }
            Err(flow_error) => {
                let issue = flow_error.issue();
                let credential_failure =
                    issue.map(|i| i.code.is_credential_failure()).unwrap_or(false);

                self.repo.record_failure(run.id, issue).await?;
                error!(%flow_error, "Run failed");

                if credential_failure {
                    warn!(job_id = %job.id, "Disabling job after credential failure");
                    self.repo
                        .set_job_disabled_reason(job.id, DISABLED_REASON_INCORRECT_CREDENTIALS)
                        .await?;
                }
                let login_failures = if credential_failure { 1 } else { 0 };
                self.repo
                    .increment_job_stat(job.id, today, 1, 0, manual, login_failures, 0)
                    .await?;
                Ok(ExecutionResult::Failed)
            }
        }
    }

    pub fn run_temp_dir(&self, run_id: Uuid) -> PathBuf {
        PathBuf::from(&self.storage.temp_download_dir)
            .join("runs")
            .join(run_id.to_string())
    }
}

/// Route an operation to the adapter flow that implements it
async fn dispatch_flow(
    adapter: &dyn crate::adapters::Adapter,
    operation: Operation,
    ctx: &RunContext,
) -> std::result::Result<FlowOutcome, FlowError> {
    match operation {
        Operation::WebLogin => adapter.login_flow(ctx).await.map(|_| FlowOutcome::default()),
        Operation::InvoiceDownload
        | Operation::StatementDownload
        | Operation::OrderGuideDownload
        | Operation::PoDownload
        | Operation::PaymentImportInfo
        | Operation::InvoiceExport => adapter.documents_download_flow(ctx).await,
        Operation::PaymentPay => adapter.payment_flow(ctx).await,
        Operation::PaymentExportInfo => adapter.payment_update_flow(ctx).await,
        Operation::AccountingImportMultipleEntities
        | Operation::VendorImportList
        | Operation::BankAccountImportList
        | Operation::GlImportList => adapter.sync_flow(ctx).await,
    }
}

const SWEEP_BATCH: u64 = 200;

/// Remove scratch directories for runs that went terminal before the
/// retention cutoff, and release their local file paths. Directories with no
/// surviving run row are picked up by [`sweep_run_files`].
pub async fn sweep_terminal_runs(
    repo: &Repository,
    storage: &StorageConfig,
    older_than_minutes: i64,
) -> Result<(u64, u64)> {
    let cutoff = chrono::Utc::now() - chrono::Duration::minutes(older_than_minutes.max(0));
    let runs = repo.list_terminal_runs_ended_before(cutoff, SWEEP_BATCH).await?;

    let root = PathBuf::from(&storage.temp_download_dir).join("runs");
    let mut removed = 0u64;
    let mut failed = 0u64;
    for run in runs {
        let dir = root.join(run.id.to_string());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(run_id = %run.id, %e, "Failed to remove run directory");
                failed += 1;
                continue;
            }
        }
        for file in repo.list_files_for_run(run.id).await? {
            if file.local_filepath.is_some() {
                repo.clear_local_filepath(file.id).await?;
            }
        }
    }
    Ok((removed, failed))
}

/// Remove orphaned run scratch directories older than the retention cutoff
pub async fn sweep_run_files(storage: &StorageConfig, older_than_minutes: i64) -> Result<(u64, u64)> {
    let root = PathBuf::from(&storage.temp_download_dir).join("runs");
    let retention = std::time::Duration::from_secs((older_than_minutes.max(0) as u64) * 60);
    let cutoff = match std::time::SystemTime::now().checked_sub(retention) {
        Some(cutoff) => cutoff,
        None => return Ok((0, 0)),
    };

    let mut removed = 0u64;
    let mut failed = 0u64;
    let mut entries = match tokio::fs::read_dir(&root).await {
        Ok(entries) => entries,
        Err(_) => return Ok((0, 0)),
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let stale = entry
            .metadata()
            .await
            .and_then(|m| m.modified())
            .map(|modified| modified < cutoff)
            .unwrap_or(false);
        if !stale {
            continue;
        }
        match tokio::fs::remove_dir_all(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => {
                warn!(path = %entry.path().display(), %e, "Failed to remove run directory");
                failed += 1;
            }
        }
    }
    Ok((removed, failed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_routing_by_operation() {
        // Document discovery operations share a flow; entity sync operations
        // share another. Spot-check via the operation predicate the routing
        // relies on.
        assert!(Operation::InvoiceDownload.discovers_documents());
        assert!(Operation::PaymentImportInfo.discovers_documents());
        assert!(!Operation::PaymentPay.discovers_documents());
        assert!(!Operation::AccountingImportMultipleEntities.discovers_documents());
    }

    #[tokio::test]
    async fn test_sweep_ignores_missing_root() {
        let storage = StorageConfig {
            artifact_bucket: None,
            temp_download_dir: "/tmp/harvester-test-does-not-exist".to_string(),
            remove_files_older_than_minutes: 120,
        };
        let (removed, failed) = sweep_run_files(&storage, 120).await.unwrap();
        assert_eq!((removed, failed), (0, 0));
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_directories() {
        let base = std::env::temp_dir().join(format!("harvester-sweep-{}", uuid::Uuid::new_v4()));
        let stale = base.join("runs").join("run-a");
        tokio::fs::create_dir_all(&stale).await.unwrap();

        let storage = StorageConfig {
            artifact_bucket: None,
            temp_download_dir: base.to_string_lossy().into_owned(),
            remove_files_older_than_minutes: 120,
        };

        // A long retention keeps the fresh directory.
        let (removed, _) = sweep_run_files(&storage, 60).await.unwrap();
        assert_eq!(removed, 0);

        // A zero retention makes anything older than "now" stale.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (removed, failed) = sweep_run_files(&storage, 0).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(failed, 0);

        tokio::fs::remove_dir_all(&base).await.ok();
    }
}
