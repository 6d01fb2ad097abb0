//! Maintenance loop: reconciliation, pruning, retries, auto-disable
//!
//! Every operation reports a (succeeded, failed) pair so one bad row never
//! hides the rest of the pass.

use chrono::{DateTime, Duration, Utc};
use harvester_common::config::{MaintenanceConfig, StorageConfig};
use harvester_common::db::models::{CheckRun, Run};
use harvester_common::dispatch::{DispatchOutcome, Dispatcher};
use harvester_common::errors::Result;
use harvester_common::metrics::record_maintenance;
use harvester_common::queue::{EmailMessage, QueueLane, QueueSet, ShortTaskMessage};
use harvester_common::Repository;
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};
use uuid::Uuid;

const PENDING_FILE_BATCH: u64 = 100;

/// Per-operation (succeeded, failed) counts for one pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub rescheduled: (u64, u64),
    pub duplicates_canceled: (u64, u64),
    pub stuck_retriggered: (u64, u64),
    pub manual_pruned: (u64, u64),
    pub invoices_requeued: (u64, u64),
    pub file_sweeps_queued: (u64, u64),
    pub requests_converted: (u64, u64),
    pub checkruns_disabled: (u64, u64),
}

pub struct MaintenanceLoop {
    repo: Repository,
    dispatcher: Dispatcher,
    queues: QueueSet,
    config: MaintenanceConfig,
    storage: StorageConfig,
}

impl MaintenanceLoop {
    pub fn new(
        repo: Repository,
        dispatcher: Dispatcher,
        queues: QueueSet,
        config: MaintenanceConfig,
        storage: StorageConfig,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            queues,
            config,
            storage,
        }
    }

    /// Run every maintenance operation once
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let report = MaintenanceReport {
            rescheduled: self.reschedule_existing_runs(now).await,
            duplicates_canceled: self.cancel_duplicate_scheduled_runs().await,
            stuck_retriggered: self.retrigger_stuck_runs(now).await,
            manual_pruned: self.prune_manual_runs(now).await,
            invoices_requeued: self.requeue_pending_invoices(now).await,
            file_sweeps_queued: self.queue_file_sweep().await,
            requests_converted: self.convert_connector_requests().await,
            checkruns_disabled: self.disable_failing_checkruns(now).await,
        };

        record_maintenance("reschedule_existing_runs", report.rescheduled.0, report.rescheduled.1);
        record_maintenance(
            "cancel_duplicate_scheduled",
            report.duplicates_canceled.0,
            report.duplicates_canceled.1,
        );
        record_maintenance("retrigger_stuck_runs", report.stuck_retriggered.0, report.stuck_retriggered.1);
        record_maintenance("prune_manual_runs", report.manual_pruned.0, report.manual_pruned.1);
        record_maintenance("create_invoices", report.invoices_requeued.0, report.invoices_requeued.1);
        record_maintenance("delete_run_files", report.file_sweeps_queued.0, report.file_sweeps_queued.1);
        record_maintenance(
            "convert_connector_requests",
            report.requests_converted.0,
            report.requests_converted.1,
        );
        record_maintenance(
            "disable_failing_checkruns",
            report.checkruns_disabled.0,
            report.checkruns_disabled.1,
        );

        info!(?report, "Maintenance pass complete");
        Ok(report)
    }

    /// CREATED runs that never got dispatched are re-submitted. Runs older
    /// than the max age are left alone; they predate the current backlog and
    /// re-running them would surprise the tenant.
    async fn reschedule_existing_runs(&self, now: DateTime<Utc>) -> (u64, u64) {
        let older_than = now - Duration::minutes(self.config.stale_created_after_mins);
        let max_age = now - Duration::days(self.config.stale_created_max_age_days);

        let runs = match self.repo.list_stale_created_runs(older_than, max_age).await {
            Ok(runs) => runs,
            Err(e) => {
                warn!(error = %e, "Failed to list stale CREATED runs");
                return (0, 1);
            }
        };

        let mut ok = 0;
        let mut failed = 0;
        for run in runs {
            match self.dispatcher.dispatch(&run, false).await {
                Ok(DispatchOutcome::Submitted(_)) => ok += 1,
                Ok(DispatchOutcome::SkippedInflight { .. }) => {}
                Err(e) => {
                    warn!(run_id = %run.id, error = %e, "Reschedule failed");
                    failed += 1;
                }
            }
        }
        (ok, failed)
    }

    /// Per job, keep the oldest SCHEDULED run and cancel the rest
    async fn cancel_duplicate_scheduled_runs(&self) -> (u64, u64) {
        let runs = match self.repo.list_scheduled_runs().await {
            Ok(runs) => runs,
            Err(e) => {
                warn!(error = %e, "Failed to list SCHEDULED runs");
                return (0, 1);
            }
        };

        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut ok = 0;
        let mut failed = 0;
        for run in runs {
            // Oldest first: keep the first run per job
            if seen.insert(run.job_id) {
                continue;
            }
            match self.repo.cancel_run(run.id, "duplicate scheduled run").await {
                Ok(_) => ok += 1,
                Err(e) => {
                    warn!(run_id = %run.id, error = %e, "Duplicate cancel failed");
                    failed += 1;
                }
            }
        }
        (ok, failed)
    }

    /// A STARTED run past its wall-clock limit is dead on the worker side.
    /// Cancel it, clone its inputs, and force-dispatch the clone. At most
    /// one retrigger per job per pass.
    async fn retrigger_stuck_runs(&self, now: DateTime<Utc>) -> (u64, u64) {
        let cutoff = now - Duration::hours(self.config.stuck_started_after_hours);
        let runs = match self.repo.list_stuck_started_runs(cutoff).await {
            Ok(runs) => runs,
            Err(e) => {
                warn!(error = %e, "Failed to list stuck STARTED runs");
                return (0, 1);
            }
        };

        let mut retriggered_jobs: HashSet<Uuid> = HashSet::new();
        let mut ok = 0;
        let mut failed = 0;
        for run in runs {
            if !retriggered_jobs.insert(run.job_id) {
                continue;
            }
            match self.retrigger(&run).await {
                Ok(()) => ok += 1,
                Err(e) => {
                    warn!(run_id = %run.id, error = %e, "Retrigger failed");
                    failed += 1;
                }
            }
        }
        (ok, failed)
    }

    async fn retrigger(&self, run: &Run) -> Result<()> {
        self.repo
            .cancel_stuck_run(run.id, "exceeded wall-clock limit")
            .await?;
        let replacement = self.repo.duplicate_run(run.id).await?;
        self.dispatcher.dispatch(&replacement, true).await?;
        Ok(())
    }

    /// Manual runs stuck in the queue backlog are canceled, not re-run: the
    /// user who clicked has long since moved on.
    async fn prune_manual_runs(&self, now: DateTime<Utc>) -> (u64, u64) {
        let cutoff = now - Duration::days(self.config.stale_manual_after_days);
        let runs = match self.repo.list_stale_manual_runs(cutoff).await {
            Ok(runs) => runs,
            Err(e) => {
                warn!(error = %e, "Failed to list stale manual runs");
                return (0, 1);
            }
        };

        let mut ok = 0;
        let mut failed = 0;
        for run in runs {
            match self.repo.cancel_run(run.id, "manual run expired in queue").await {
                Ok(_) => ok += 1,
                Err(e) => {
                    warn!(run_id = %run.id, error = %e, "Manual prune failed");
                    failed += 1;
                }
            }
        }
        (ok, failed)
    }

    /// Files that downloaded fine but whose action never completed get the
    /// action re-queued on the short-tasks lane
    async fn requeue_pending_invoices(&self, now: DateTime<Utc>) -> (u64, u64) {
        let cutoff = now - Duration::hours(self.config.pending_invoice_after_hours);
        let files = match self
            .repo
            .list_files_pending_processing(cutoff, PENDING_FILE_BATCH)
            .await
        {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Failed to list pending files");
                return (0, 1);
            }
        };

        let queue = match self.queues.lane(QueueLane::ShortTasks) {
            Ok(queue) => queue,
            Err(e) => {
                warn!(error = %e, "Short-tasks lane unavailable");
                return (0, 1);
            }
        };

        let mut ok = 0;
        let mut failed = 0;
        for file in files {
            let message = ShortTaskMessage::FileAction {
                discovered_file_id: file.id,
            };
            match queue.send(&message).await {
                Ok(_) => ok += 1,
                Err(e) => {
                    warn!(file_id = %file.id, error = %e, "Action requeue failed");
                    failed += 1;
                }
            }
        }
        (ok, failed)
    }

    /// Ask worker hosts to sweep local files of old terminal runs
    async fn queue_file_sweep(&self) -> (u64, u64) {
        let message = ShortTaskMessage::DeleteRunFiles {
            older_than_minutes: self.storage.remove_files_older_than_minutes,
        };
        let queue = match self.queues.lane(QueueLane::ShortTasks) {
            Ok(queue) => queue,
            Err(e) => {
                warn!(error = %e, "Short-tasks lane unavailable");
                return (0, 1);
            }
        };
        match queue.send(&message).await {
            Ok(_) => (1, 0),
            Err(e) => {
                warn!(error = %e, "File sweep enqueue failed");
                (0, 1)
            }
        }
    }

    /// Link user-submitted connector requests to connectors by name/URL
    /// match, and convert linked requests into jobs
    async fn convert_connector_requests(&self) -> (u64, u64) {
        let requests = match self.repo.list_unconverted_connector_requests().await {
            Ok(requests) => requests,
            Err(e) => {
                warn!(error = %e, "Failed to list connector requests");
                return (0, 1);
            }
        };

        let mut ok = 0;
        let mut failed = 0;
        for mut request in requests {
            if request.connector_id.is_none() {
                match self.repo.match_connector_for_request(&request).await {
                    Ok(Some(connector)) => {
                        if let Err(e) = self
                            .repo
                            .link_connector_request(request.id, connector.id)
                            .await
                        {
                            warn!(request_id = %request.id, error = %e, "Linking failed");
                            failed += 1;
                            continue;
                        }
                        request.connector_id = Some(connector.id);
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(request_id = %request.id, error = %e, "Connector match failed");
                        failed += 1;
                        continue;
                    }
                }
            }

            match self.repo.convert_connector_request(&request).await {
                Ok(job) => {
                    info!(request_id = %request.id, job_id = %job.id, "Connector request converted");
                    ok += 1;
                }
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "Conversion failed");
                    failed += 1;
                }
            }
        }
        (ok, failed)
    }

    /// Chronically failing payment exports get disabled; the band between
    /// the suspect and disable thresholds is only reported. Retrying below
    /// the band honors the global kill-switch.
    async fn disable_failing_checkruns(&self, now: DateTime<Utc>) -> (u64, u64) {
        let since = now - Duration::days(self.config.checkrun_window_days);
        let failing = match self.repo.list_failing_check_runs(since).await {
            Ok(failing) => failing,
            Err(e) => {
                warn!(error = %e, "Failed to list failing checkruns");
                return (0, 1);
            }
        };

        let mut by_chequerun: HashMap<i64, Vec<CheckRun>> = HashMap::new();
        for check_run in failing {
            by_chequerun.entry(check_run.chequerun_id).or_default().push(check_run);
        }

        let mut ok = 0;
        let mut failed = 0;
        for (chequerun_id, attempts) in by_chequerun {
            let attempt_count = attempts.len() as u64;
            let payment_expired = attempts.iter().any(|c| {
                c.payment_date.map_or(false, |d| {
                    now.date_naive() - d > Duration::days(self.config.checkrun_payment_age_days)
                })
            });

            if attempt_count >= self.config.checkrun_disable_attempts || payment_expired {
                match self.disable_and_notify(chequerun_id, &attempts).await {
                    Ok(()) => ok += 1,
                    Err(e) => {
                        warn!(chequerun_id, error = %e, "Checkrun disable failed");
                        failed += 1;
                    }
                }
            } else if attempt_count >= self.config.checkrun_suspect_attempts {
                warn!(chequerun_id, attempt_count, "Chequerun is suspect");
            } else if !self.config.ignore_retrying_failed_checkrun {
                if let Err(e) = self.retry_checkrun(&attempts).await {
                    warn!(chequerun_id, error = %e, "Checkrun retry failed");
                    failed += 1;
                }
            }
        }
        (ok, failed)
    }

    async fn disable_and_notify(&self, chequerun_id: i64, attempts: &[CheckRun]) -> Result<()> {
        self.repo.disable_chequerun(chequerun_id).await?;

        // Best effort: the disable stands even if the notification cannot
        // be assembled.
        if let Some(latest) = attempts.last() {
            if let Ok(Some(run)) = self.repo.find_run_by_id(latest.run_id).await {
                if let Ok(Some((job, connector))) =
                    self.repo.find_job_with_connector(run.job_id).await
                {
                    let message = ShortTaskMessage::Email(EmailMessage {
                        job_id: job.id,
                        template: "checkrun-disabled".to_string(),
                        subject: format!(
                            "Payment export disabled for chequerun {} on {}",
                            chequerun_id, connector.name
                        ),
                        body: format!(
                            "The payment export for chequerun {} on {} kept failing and has \
                             been disabled. It will not be retried automatically.",
                            chequerun_id, connector.name
                        ),
                    });
                    if let Ok(queue) = self.queues.lane(QueueLane::ShortTasks) {
                        let _ = queue.send(&message).await;
                    }
                }
            }
        }

        info!(chequerun_id, "Chequerun disabled");
        Ok(())
    }

    /// Re-run the export by cloning the latest attempt's run
    async fn retry_checkrun(&self, attempts: &[CheckRun]) -> Result<()> {
        let Some(latest) = attempts.last() else {
            return Ok(());
        };
        let Some(run) = self.repo.find_run_by_id(latest.run_id).await? else {
            return Ok(());
        };
        if !run.is_terminal() {
            return Ok(());
        }
        let replacement = self.repo.duplicate_run(run.id).await?;
        self.dispatcher.dispatch(&replacement, false).await?;
        Ok(())
    }
}
