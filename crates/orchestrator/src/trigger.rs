//! Scheduled trigger: evaluate schedules and create due runs
//!
//! One tick walks every runnable job, asks its schedules whether today is a
//! match, applies the recency gates, and hands new runs to the dispatcher.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use harvester_common::config::RunDefaultsConfig;
use harvester_common::db::models::{Connector, CreatedVia, Job, Operation};
use harvester_common::dispatch::{DispatchOutcome, Dispatcher, RunFactory, RunRequest};
use harvester_common::errors::Result;
use harvester_common::Repository;
use tracing::{debug, info, instrument, warn};

/// Outcome counts for one trigger tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TriggerReport {
    pub jobs_considered: u64,
    pub runs_created: u64,
    pub skipped_not_due: u64,
    pub skipped_gated: u64,
    pub skipped_inflight: u64,
    pub errors: u64,
}

pub struct Trigger {
    repo: Repository,
    factory: RunFactory,
    dispatcher: Dispatcher,
    gates: RunDefaultsConfig,
}

impl Trigger {
    pub fn new(
        repo: Repository,
        factory: RunFactory,
        dispatcher: Dispatcher,
        gates: RunDefaultsConfig,
    ) -> Self {
        Self {
            repo,
            factory,
            dispatcher,
            gates,
        }
    }

    /// Evaluate all runnable jobs for the given instant
    #[instrument(skip(self), fields(date = %today))]
    pub async fn tick(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<TriggerReport> {
        let mut report = TriggerReport::default();

        for (job, connector) in self.repo.list_runnable_jobs().await? {
            report.jobs_considered += 1;

            match self.evaluate_job(&job, &connector, today, now).await {
                Ok(JobOutcome::Created) => report.runs_created += 1,
                Ok(JobOutcome::NotDue) => report.skipped_not_due += 1,
                Ok(JobOutcome::Gated) => report.skipped_gated += 1,
                Ok(JobOutcome::Inflight) => report.skipped_inflight += 1,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Trigger failed for job");
                    report.errors += 1;
                }
            }
        }

        info!(
            jobs = report.jobs_considered,
            created = report.runs_created,
            gated = report.skipped_gated,
            inflight = report.skipped_inflight,
            errors = report.errors,
            "Trigger tick complete"
        );
        Ok(report)
    }

    async fn evaluate_job(
        &self,
        job: &Job,
        connector: &Connector,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<JobOutcome> {
        let schedules = self.repo.schedules_for_job(job.id).await?;
        if !schedules.iter().any(|s| s.matches(today)) {
            return Ok(JobOutcome::NotDue);
        }

        let operation = connector.default_operation();
        if !connector.has_capability(operation) {
            debug!(job_id = %job.id, operation = %operation, "Connector lacks the scheduled operation");
            return Ok(JobOutcome::NotDue);
        }

        if self.is_gated(job, operation, now).await? {
            return Ok(JobOutcome::Gated);
        }

        let run = self
            .factory
            .create_run(job, connector, operation, CreatedVia::Scheduled, RunRequest::default())
            .await?;

        match self.dispatcher.dispatch(&run, false).await? {
            DispatchOutcome::Submitted(_) => Ok(JobOutcome::Created),
            DispatchOutcome::SkippedInflight { .. } => Ok(JobOutcome::Inflight),
        }
    }

    /// Recency gates: a fresh success, a streak of failures, or any recent
    /// run at all suppresses a new scheduled run.
    async fn is_gated(&self, job: &Job, operation: Operation, now: DateTime<Utc>) -> Result<bool> {
        let success_floor = now - Duration::hours(self.gates.success_window_hours);
        if self
            .repo
            .has_recent_successful_run(job.id, operation, success_floor)
            .await?
        {
            debug!(job_id = %job.id, "Gated: recent successful run");
            return Ok(true);
        }

        let failure_floor = now - Duration::hours(self.gates.failure_window_hours);
        let failures = self
            .repo
            .count_recent_failed_runs(job.id, operation, failure_floor)
            .await?;
        if failures >= self.gates.failure_threshold {
            debug!(job_id = %job.id, failures, "Gated: failure streak");
            return Ok(true);
        }

        let cooldown_floor = now - Duration::hours(self.gates.cooldown_hours);
        if self
            .repo
            .has_run_created_since(job.id, operation, cooldown_floor)
            .await?
        {
            debug!(job_id = %job.id, "Gated: cooldown");
            return Ok(true);
        }

        Ok(false)
    }
}

enum JobOutcome {
    Created,
    NotDue,
    Gated,
    Inflight,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn connector(connector_type: &str) -> Connector {
        let now = Utc::now();
        Connector {
            id: Uuid::new_v4(),
            name: "Acme".to_string(),
            adapter_code: "acme".to_string(),
            connector_type: connector_type.to_string(),
            channel: "WEB".to_string(),
            enabled: true,
            capabilities: serde_json::json!(["invoice.download"]),
            login_url: None,
            icon_url: None,
            df_download_url_skip_duplicates: false,
            download_future_invoices: true,
            custom_properties: serde_json::json!({}),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[test]
    fn test_default_operation_by_connector_type() {
        assert_eq!(
            connector("VENDOR").default_operation(),
            Operation::InvoiceDownload
        );
        assert_eq!(
            connector("ACCOUNTING").default_operation(),
            Operation::AccountingImportMultipleEntities
        );
    }
}
