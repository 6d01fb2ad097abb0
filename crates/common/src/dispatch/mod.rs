//! Run construction and dispatch
//!
//! Every run enters the system through [`RunFactory`], regardless of whether
//! the trigger, the admin API, or the SLA evaluator asked for it. Runs are
//! persisted in CREATED state; [`Dispatcher`] is a separate concern so a
//! queue outage never loses a run.

use crate::config::DispatchConfig;
use crate::db::models::{
    Connector, CreatedVia, Job, Operation, RequestParameters, Run, RunStatus,
};
use crate::db::Repository;
use crate::errors::{AppError, Result};
use crate::metrics::{record_run_created, record_run_dispatched};
use crate::queue::{QueueLane, QueueSet, RunTaskMessage};
use chrono::{Duration, Utc};
use tracing::{info, instrument, warn};

/// Inputs for a new run beyond the (job, operation) pair
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub dry_run: bool,
    pub is_manual: bool,
    pub request_parameters: Option<RequestParameters>,
}

#[derive(Clone)]
pub struct RunFactory {
    repo: Repository,
    start_offset_days: i64,
    end_offset_days: i64,
}

impl RunFactory {
    pub fn new(repo: Repository, start_offset_days: i64, end_offset_days: i64) -> Self {
        Self {
            repo,
            start_offset_days,
            end_offset_days,
        }
    }

    /// Validate preconditions and persist a CREATED run
    #[instrument(skip(self, job, connector, request), fields(job_id = %job.id, operation = %operation.as_str()))]
    pub async fn create_run(
        &self,
        job: &Job,
        connector: &Connector,
        operation: Operation,
        created_via: CreatedVia,
        request: RunRequest,
    ) -> Result<Run> {
        if !connector.enabled {
            return Err(AppError::ConnectorDisabled);
        }
        if !connector.has_capability(operation) {
            return Err(AppError::CapabilityMissing {
                operation: operation.as_str().to_string(),
            });
        }
        if operation.requires_companies() && job.company_ids().is_empty() {
            return Err(AppError::Validation {
                message: "companies cannot be : None".to_string(),
                field: Some("companies".to_string()),
            });
        }

        let params = match request.request_parameters {
            Some(params) => params,
            None => self.default_parameters(job, connector),
        };

        let run = self
            .repo
            .create_run(
                job.id,
                operation,
                created_via,
                request.dry_run,
                request.is_manual,
                params,
            )
            .await?;

        record_run_created(operation.as_str(), created_via.as_str());
        info!(run_id = %run.id, created_via = %created_via.as_str(), "Run created");

        Ok(run)
    }

    /// Default document window: start 30 days back; end 60 days ahead unless
    /// future downloads are turned off for this job or connector, in which
    /// case the window closes today.
    fn default_parameters(&self, job: &Job, connector: &Connector) -> RequestParameters {
        let today = Utc::now().date_naive();
        let future = job
            .download_future_invoices
            .unwrap_or(connector.download_future_invoices);
        let end_date = if future {
            today + Duration::days(self.end_offset_days)
        } else {
            today
        };

        RequestParameters {
            start_date: Some(today - Duration::days(self.start_offset_days)),
            end_date: Some(end_date),
            suppress_invoices: job.suppress_invoices,
            ..Default::default()
        }
    }
}

/// What happened to a run handed to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Submitted, now SCHEDULED with this handle
    Submitted(String),
    /// Another run for the job is already in flight
    SkippedInflight { inflight_run_id: uuid::Uuid },
}

#[derive(Clone)]
pub struct Dispatcher {
    repo: Repository,
    queues: QueueSet,
    submit_to_remote_batch: bool,
}

impl Dispatcher {
    pub fn new(repo: Repository, queues: QueueSet, config: &DispatchConfig) -> Self {
        Self {
            repo,
            queues,
            submit_to_remote_batch: config.submit_to_remote_batch,
        }
    }

    /// Lane for a run: user-initiated work gets the on-demand queue
    pub fn lane_for(run: &Run) -> QueueLane {
        if run.is_manual {
            QueueLane::OnDemand
        } else {
            QueueLane::Tasks
        }
    }

    /// Submit a run. Without `force`, a CREATED run with another run for the
    /// same job in flight is skipped and keeps its state; with `force`, a
    /// stuck run is re-submitted and the stored handle is overwritten.
    #[instrument(skip(self, run), fields(run_id = %run.id, job_id = %run.job_id))]
    pub async fn dispatch(&self, run: &Run, force: bool) -> Result<DispatchOutcome> {
        if !force && run.run_status() != RunStatus::Created {
            return Err(AppError::InvalidRunState {
                id: run.id.to_string(),
                status: run.status.clone(),
                transition: "dispatch".to_string(),
            });
        }
        if run.is_terminal() {
            return Err(AppError::InvalidRunState {
                id: run.id.to_string(),
                status: run.status.clone(),
                transition: "dispatch".to_string(),
            });
        }

        if !force {
            if let Some(inflight) = self.repo.find_inflight_run(run.job_id).await? {
                if inflight.id != run.id {
                    info!(inflight_run_id = %inflight.id, "Skipping dispatch, job has a run in flight");
                    return Ok(DispatchOutcome::SkippedInflight {
                        inflight_run_id: inflight.id,
                    });
                }
            }
        }

        let lane = Self::lane_for(run);
        let message = RunTaskMessage {
            run_id: run.id,
            lane: lane.as_str().to_string(),
        };

        // Submission happens before the status flip so a queue failure
        // leaves the run in CREATED.
        let (handle, remote) = if self.submit_to_remote_batch {
            let queue = self.queues.batch.as_ref().ok_or_else(|| AppError::DispatchError {
                message: "Remote batch submission enabled but batch queue is not configured"
                    .to_string(),
            })?;
            (queue.send(&message).await?, true)
        } else {
            (self.queues.lane(lane)?.send(&message).await?, false)
        };

        if let Err(e) = self.repo.mark_run_scheduled(run.id, Some(handle.clone()), force).await {
            warn!(error = %e, "Run submitted but status flip failed");
            return Err(e);
        }

        record_run_dispatched(lane.as_str(), remote);
        info!(lane = lane.as_str(), handle = %handle, "Run dispatched");

        Ok(DispatchOutcome::Submitted(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn connector(enabled: bool, capabilities: &[&str]) -> Connector {
        let now = Utc::now();
        Connector {
            id: Uuid::new_v4(),
            name: "Acme Foods".to_string(),
            adapter_code: "acme".to_string(),
            connector_type: "VENDOR".to_string(),
            channel: "WEB".to_string(),
            enabled,
            capabilities: serde_json::json!(capabilities),
            login_url: None,
            icon_url: None,
            df_download_url_skip_duplicates: false,
            download_future_invoices: true,
            custom_properties: serde_json::json!({}),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    fn job(connector_id: Uuid, companies: serde_json::Value) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            account_id: "acct-1".to_string(),
            connector_id,
            name: "Acme for Cafe 9".to_string(),
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ftp_credential_handle: None,
            location_id: None,
            location_group_id: None,
            companies,
            login_url: None,
            edi_type: None,
            create_missing_vendors: false,
            suppress_invoices: false,
            download_future_invoices: None,
            enabled: true,
            disabled_reason: None,
            created_at: now.into(),
            updated_at: now.into(),
            deleted_at: None,
        }
    }

    fn run(is_manual: bool, status: &str) -> Run {
        let now = Utc::now();
        Run {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            action: "invoice.download".to_string(),
            status: status.to_string(),
            dry_run: false,
            is_manual,
            created_via: "scheduled".to_string(),
            request_parameters: RequestParameters::default().to_json(),
            execution_start_ts: None,
            execution_end_ts: None,
            failure_issue: None,
            batch_job_id: None,
            cancel_reason: None,
            created_at: now.into(),
            updated_at: now.into(),
            deleted_at: None,
        }
    }

    fn factory() -> RunFactory {
        // Precondition tests never reach the database
        let pool = crate::db::DbPool::single(sea_orm::DatabaseConnection::default());
        RunFactory::new(Repository::new(pool), 30, 60)
    }

    #[tokio::test]
    async fn test_disabled_connector_rejected() {
        let c = connector(false, &["invoice.download"]);
        let j = job(c.id, serde_json::json!([]));
        let result = factory()
            .create_run(
                &j,
                &c,
                Operation::InvoiceDownload,
                CreatedVia::Scheduled,
                RunRequest::default(),
            )
            .await;
        assert!(matches!(result, Err(AppError::ConnectorDisabled)));
    }

    #[tokio::test]
    async fn test_missing_capability_rejected() {
        let c = connector(true, &["invoice.download"]);
        let j = job(c.id, serde_json::json!([]));
        let result = factory()
            .create_run(
                &j,
                &c,
                Operation::StatementDownload,
                CreatedVia::AdminRequest,
                RunRequest::default(),
            )
            .await;
        assert!(matches!(result, Err(AppError::CapabilityMissing { .. })));
    }

    #[tokio::test]
    async fn test_payment_export_requires_companies() {
        let c = connector(true, &["payment.export_info"]);
        let j = job(c.id, serde_json::json!([]));
        let result = factory()
            .create_run(
                &j,
                &c,
                Operation::PaymentExportInfo,
                CreatedVia::ApiRequest,
                RunRequest::default(),
            )
            .await;
        match result {
            Err(AppError::Validation { message, .. }) => {
                assert_eq!(message, "companies cannot be : None");
            }
            other => panic!("unexpected result: {:?}", other.err().map(|e| e.to_string())),
        }
    }

    #[test]
    fn test_default_window_respects_future_toggle() {
        let mut c = connector(true, &["invoice.download"]);
        let j = job(c.id, serde_json::json!([]));
        let f = factory();

        let params = f.default_parameters(&j, &c);
        let today = Utc::now().date_naive();
        assert_eq!(params.start_date, Some(today - Duration::days(30)));
        assert_eq!(params.end_date, Some(today + Duration::days(60)));

        c.download_future_invoices = false;
        let params = f.default_parameters(&j, &c);
        assert_eq!(params.end_date, Some(today));

        // Job-level override wins over the connector default
        let mut j2 = job(c.id, serde_json::json!([]));
        j2.download_future_invoices = Some(true);
        let params = f.default_parameters(&j2, &c);
        assert_eq!(params.end_date, Some(today + Duration::days(60)));
    }

    #[test]
    fn test_manual_runs_use_on_demand_lane() {
        assert_eq!(Dispatcher::lane_for(&run(true, "CREATED")), QueueLane::OnDemand);
        assert_eq!(Dispatcher::lane_for(&run(false, "CREATED")), QueueLane::Tasks);
    }
}
