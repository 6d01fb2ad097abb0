//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations with proper
//! error handling. Run status transitions are guarded conditional updates so
//! the executor and maintenance never clobber each other's writes.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::issues::Issue;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbBackend,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, Statement,
};
use uuid::Uuid;

const TERMINAL_STATUSES: &str = "('SUCCEEDED','PARTIALLY_SUCCEEDED','FAILED','CANCELED')";

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Connector Operations
    // ========================================================================

    /// Find connector by ID
    pub async fn find_connector_by_id(&self, id: Uuid) -> Result<Option<Connector>> {
        ConnectorEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// List all connectors
    pub async fn list_connectors(&self) -> Result<Vec<Connector>> {
        ConnectorEntity::find()
            .order_by_asc(ConnectorColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Match a connector for a user-submitted request by login URL and name
    /// containment, both case-insensitive
    pub async fn match_connector_for_request(
        &self,
        request: &ConnectorRequest,
    ) -> Result<Option<Connector>> {
        let connectors = self.list_connectors().await?;
        let name = request.name.to_lowercase();
        let login_url = request.login_url.as_deref().map(str::to_lowercase);

        Ok(connectors.into_iter().find(|c| {
            let name_matches = c.name.to_lowercase().contains(&name)
                || name.contains(&c.name.to_lowercase());
            let url_matches = match (&login_url, &c.login_url) {
                (Some(req_url), Some(conn_url)) => {
                    conn_url.to_lowercase().contains(req_url.as_str())
                        || req_url.contains(&conn_url.to_lowercase())
                }
                _ => false,
            };
            c.enabled && (url_matches || name_matches)
        }))
    }

    // ========================================================================
    // Job Operations
    // ========================================================================

    /// Find job by ID (soft-deleted jobs are filtered)
    pub async fn find_job_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        JobEntity::find_by_id(id)
            .filter(JobColumn::DeletedAt.is_null())
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find a job together with its connector
    pub async fn find_job_with_connector(&self, id: Uuid) -> Result<Option<(Job, Connector)>> {
        let Some(job) = self.find_job_by_id(id).await? else {
            return Ok(None);
        };
        let connector = self
            .find_connector_by_id(job.connector_id)
            .await?
            .ok_or_else(|| AppError::ConnectorNotFound {
                id: job.connector_id.to_string(),
            })?;
        Ok(Some((job, connector)))
    }

    /// List jobs for an account
    pub async fn list_jobs_for_account(&self, account_id: &str) -> Result<Vec<Job>> {
        JobEntity::find()
            .filter(JobColumn::AccountId.eq(account_id))
            .filter(JobColumn::DeletedAt.is_null())
            .order_by_asc(JobColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// List jobs eligible for scheduling: enabled, not soft-deleted, not
    /// flagged for bad credentials, with an enabled connector
    pub async fn list_runnable_jobs(&self) -> Result<Vec<(Job, Connector)>> {
        let rows = JobEntity::find()
            .find_also_related(ConnectorEntity)
            .filter(JobColumn::Enabled.eq(true))
            .filter(JobColumn::DeletedAt.is_null())
            .filter(JobColumn::DisabledReason.is_null())
            .filter(ConnectorColumn::Enabled.eq(true))
            .all(self.read_conn())
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(job, connector)| connector.map(|c| (job, c)))
            .collect())
    }

    /// Create a job
    #[allow(clippy::too_many_arguments)]
    pub async fn create_job(
        &self,
        account_id: String,
        connector_id: Uuid,
        name: String,
        username: Option<String>,
        password: Option<String>,
        login_url: Option<String>,
        suppress_invoices: bool,
    ) -> Result<Job> {
        let now = Utc::now();
        let job = JobActiveModel {
            id: Set(Uuid::new_v4()),
            account_id: Set(account_id),
            connector_id: Set(connector_id),
            name: Set(name),
            username: Set(username),
            password: Set(password),
            ftp_credential_handle: Set(None),
            location_id: Set(None),
            location_group_id: Set(None),
            companies: Set(serde_json::json!([])),
            login_url: Set(login_url),
            edi_type: Set(None),
            create_missing_vendors: Set(false),
            suppress_invoices: Set(suppress_invoices),
            download_future_invoices: Set(None),
            enabled: Set(true),
            disabled_reason: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            deleted_at: Set(None),
        };
        job.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Update job credentials. A pending INCORRECT_CREDENTIALS flag is
    /// cleared so the job becomes schedulable again.
    pub async fn update_job_credentials(
        &self,
        job_id: Uuid,
        username: Option<String>,
        password: Option<String>,
        ftp_credential_handle: Option<String>,
    ) -> Result<Job> {
        let job = self
            .find_job_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound { id: job_id.to_string() })?;

        let had_credential_failure = job.has_credential_failure();
        let mut active: JobActiveModel = job.into();

        if let Some(username) = username {
            active.username = Set(Some(username));
        }
        if let Some(password) = password {
            active.password = Set(Some(password));
        }
        if let Some(handle) = ftp_credential_handle {
            active.ftp_credential_handle = Set(Some(handle));
        }
        if had_credential_failure {
            active.disabled_reason = Set(None);
        }
        active.updated_at = Set(Utc::now().into());

        active.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Flag a job's credentials as rejected by the portal
    pub async fn set_job_disabled_reason(&self, job_id: Uuid, reason: &str) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE jobs SET disabled_reason = $1, updated_at = NOW() WHERE id = $2 AND deleted_at IS NULL",
            vec![reason.into(), job_id.into()],
        );
        self.write_conn().execute_raw(stmt).await?;
        Ok(())
    }

    /// Soft-delete a job. The username gets a tombstone suffix so it can be
    /// reused, and discovered files reachable through the job's runs are
    /// soft-deleted with their hashes marked so duplicate lookups skip them.
    pub async fn soft_delete_job(&self, job_id: Uuid) -> Result<()> {
        let now = Utc::now();
        let marker = format!("##{}{}", now.timestamp(), DELETED_HASH_MARKER);

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE jobs
            SET deleted_at = $1,
                username = COALESCE(username, '') || $2,
                updated_at = $1
            WHERE id = $3 AND deleted_at IS NULL
            "#,
            vec![now.into(), marker.clone().into(), job_id.into()],
        );
        let result = self.write_conn().execute_raw(stmt).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::JobNotFound { id: job_id.to_string() });
        }

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE discovered_files
            SET deleted_at = $1,
                content_hash = COALESCE(content_hash, '') || $2,
                updated_at = $1
            WHERE job_id = $3 AND deleted_at IS NULL
            "#,
            vec![now.into(), marker.into(), job_id.into()],
        );
        self.write_conn().execute_raw(stmt).await?;

        Ok(())
    }

    // ========================================================================
    // Schedule Operations
    // ========================================================================

    /// Schedules attached to a job
    pub async fn schedules_for_job(&self, job_id: Uuid) -> Result<Vec<JobSchedule>> {
        JobScheduleEntity::find()
            .filter(JobScheduleColumn::JobId.eq(job_id))
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Create a schedule after validating its field constraints
    pub async fn create_schedule(
        &self,
        job_id: Uuid,
        frequency: String,
        day_of_week: Vec<u32>,
        week_of_month: Vec<u32>,
        date_of_month: Vec<u32>,
    ) -> Result<JobSchedule> {
        let schedule = JobSchedule {
            id: Uuid::new_v4(),
            job_id,
            frequency,
            day_of_week: serde_json::json!(day_of_week),
            week_of_month: serde_json::json!(week_of_month),
            date_of_month: serde_json::json!(date_of_month),
            created_at: Utc::now().into(),
        };
        schedule.validate()?;

        let active: JobScheduleActiveModel = JobScheduleActiveModel {
            id: Set(schedule.id),
            job_id: Set(schedule.job_id),
            frequency: Set(schedule.frequency.clone()),
            day_of_week: Set(schedule.day_of_week.clone()),
            week_of_month: Set(schedule.week_of_month.clone()),
            date_of_month: Set(schedule.date_of_month.clone()),
            created_at: Set(schedule.created_at),
        };
        active.insert(self.write_conn()).await.map_err(Into::into)
    }

    // ========================================================================
    // Run Operations
    // ========================================================================

    /// Persist a new run. Runs are always inserted in CREATED state; the
    /// factory owns the precondition checks.
    pub async fn create_run(
        &self,
        job_id: Uuid,
        operation: Operation,
        created_via: CreatedVia,
        dry_run: bool,
        is_manual: bool,
        request_parameters: RequestParameters,
    ) -> Result<Run> {
        let now = Utc::now();
        let run = RunActiveModel {
            id: Set(Uuid::new_v4()),
            job_id: Set(job_id),
            action: Set(operation.as_str().to_string()),
            status: Set(RunStatus::Created.as_str().to_string()),
            dry_run: Set(dry_run),
            is_manual: Set(is_manual),
            created_via: Set(created_via.as_str().to_string()),
            request_parameters: Set(request_parameters.to_json()),
            execution_start_ts: Set(None),
            execution_end_ts: Set(None),
            failure_issue: Set(None),
            batch_job_id: Set(None),
            cancel_reason: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            deleted_at: Set(None),
        };
        run.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find run by ID
    pub async fn find_run_by_id(&self, id: Uuid) -> Result<Option<Run>> {
        RunEntity::find_by_id(id)
            .filter(RunColumn::DeletedAt.is_null())
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Latest run for the job currently in SCHEDULED or STARTED
    pub async fn find_inflight_run(&self, job_id: Uuid) -> Result<Option<Run>> {
        RunEntity::find()
            .filter(RunColumn::JobId.eq(job_id))
            .filter(RunColumn::DeletedAt.is_null())
            .filter(
                RunColumn::Status.is_in([
                    RunStatus::Scheduled.as_str(),
                    RunStatus::Started.as_str(),
                ]),
            )
            .order_by_desc(RunColumn::CreatedAt)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// List runs for a job, newest first
    pub async fn list_runs_for_job(
        &self,
        job_id: Uuid,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Run>, u64)> {
        let paginator = RunEntity::find()
            .filter(RunColumn::JobId.eq(job_id))
            .filter(RunColumn::DeletedAt.is_null())
            .order_by_desc(RunColumn::CreatedAt)
            .paginate(self.read_conn(), limit);

        let total = paginator.num_items().await?;
        let runs = paginator.fetch_page(offset / limit.max(1)).await?;

        Ok((runs, total))
    }

    /// CREATED -> SCHEDULED, storing the dispatch handle. With `force` the
    /// guard is relaxed so maintenance can retrigger an in-flight run.
    pub async fn mark_run_scheduled(
        &self,
        run_id: Uuid,
        batch_job_id: Option<String>,
        force: bool,
    ) -> Result<()> {
        let guard = if force {
            format!("status NOT IN {}", TERMINAL_STATUSES)
        } else {
            "status = 'CREATED'".to_string()
        };
        let sql = format!(
            "UPDATE runs SET status = 'SCHEDULED', batch_job_id = COALESCE($1, batch_job_id), \
             updated_at = NOW() WHERE id = $2 AND deleted_at IS NULL AND {}",
            guard
        );
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            vec![batch_job_id.into(), run_id.into()],
        );
        let result = self.write_conn().execute_raw(stmt).await?;
        if result.rows_affected() == 0 {
            return self.invalid_transition(run_id, "schedule").await;
        }
        Ok(())
    }

    /// Any non-terminal -> STARTED. Idempotent when already STARTED: the
    /// existing execution_start_ts is kept.
    pub async fn record_execution_start(&self, run_id: Uuid) -> Result<Run> {
        let sql = format!(
            "UPDATE runs SET status = 'STARTED', \
             execution_start_ts = COALESCE(execution_start_ts, NOW()), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL AND status NOT IN {}",
            TERMINAL_STATUSES
        );
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, vec![run_id.into()]);
        let result = self.write_conn().execute_raw(stmt).await?;
        if result.rows_affected() == 0 {
            self.invalid_transition(run_id, "record_execution_start").await?;
        }
        self.require_run(run_id).await
    }

    /// STARTED -> SUCCEEDED
    pub async fn record_success(&self, run_id: Uuid) -> Result<Run> {
        self.finish_run(run_id, RunStatus::Succeeded, "record_success").await
    }

    /// STARTED -> PARTIALLY_SUCCEEDED
    pub async fn record_partial_success(&self, run_id: Uuid) -> Result<Run> {
        self.finish_run(run_id, RunStatus::PartiallySucceeded, "record_partial_success")
            .await
    }

    async fn finish_run(&self, run_id: Uuid, status: RunStatus, transition: &str) -> Result<Run> {
        let sql = "UPDATE runs SET status = $1, execution_end_ts = NOW(), updated_at = NOW() \
                   WHERE id = $2 AND deleted_at IS NULL AND status = 'STARTED'";
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            vec![status.as_str().into(), run_id.into()],
        );
        let result = self.write_conn().execute_raw(stmt).await?;
        if result.rows_affected() == 0 {
            self.invalid_transition(run_id, transition).await?;
        }
        self.require_run(run_id).await
    }

    /// Any non-terminal -> FAILED, with an optional failure issue
    pub async fn record_failure(&self, run_id: Uuid, issue: Option<&Issue>) -> Result<Run> {
        let issue_json: Option<serde_json::Value> = issue.map(|i| i.to_json());
        let sql = format!(
            "UPDATE runs SET status = 'FAILED', execution_end_ts = NOW(), \
             failure_issue = $1, updated_at = NOW() \
             WHERE id = $2 AND deleted_at IS NULL AND status NOT IN {}",
            TERMINAL_STATUSES
        );
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            vec![issue_json.into(), run_id.into()],
        );
        let result = self.write_conn().execute_raw(stmt).await?;
        if result.rows_affected() == 0 {
            self.invalid_transition(run_id, "record_failure").await?;
        }
        self.require_run(run_id).await
    }

    /// CREATED/SCHEDULED -> CANCELED, maintenance only
    pub async fn cancel_run(&self, run_id: Uuid, reason: &str) -> Result<Run> {
        let sql = "UPDATE runs SET status = 'CANCELED', execution_end_ts = NOW(), \
                   cancel_reason = $1, updated_at = NOW() \
                   WHERE id = $2 AND deleted_at IS NULL AND status IN ('CREATED','SCHEDULED')";
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            vec![reason.into(), run_id.into()],
        );
        let result = self.write_conn().execute_raw(stmt).await?;
        if result.rows_affected() == 0 {
            self.invalid_transition(run_id, "cancel").await?;
        }
        self.require_run(run_id).await
    }

    /// Cancel a STARTED run that blew past its wall-clock limit. Separate
    /// from `cancel_run` so the normal guard stays strict.
    pub async fn cancel_stuck_run(&self, run_id: Uuid, reason: &str) -> Result<()> {
        let sql = "UPDATE runs SET status = 'CANCELED', execution_end_ts = NOW(), \
                   cancel_reason = $1, updated_at = NOW() \
                   WHERE id = $2 AND deleted_at IS NULL AND status = 'STARTED'";
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            vec![reason.into(), run_id.into()],
        );
        self.write_conn().execute_raw(stmt).await?;
        Ok(())
    }

    /// Clone a run's inputs into a new CREATED run. Provenance is preserved.
    pub async fn duplicate_run(&self, run_id: Uuid) -> Result<Run> {
        let run = self.require_run(run_id).await?;
        self.create_run(
            run.job_id,
            run.operation()?,
            run.created_via(),
            run.dry_run,
            run.is_manual,
            run.request_parameters(),
        )
        .await
    }

    async fn require_run(&self, run_id: Uuid) -> Result<Run> {
        self.find_run_by_id(run_id)
            .await?
            .ok_or_else(|| AppError::RunNotFound { id: run_id.to_string() })
    }

    async fn invalid_transition(&self, run_id: Uuid, transition: &str) -> Result<()> {
        match self.find_run_by_id(run_id).await? {
            Some(run) => Err(AppError::InvalidRunState {
                id: run_id.to_string(),
                status: run.status,
                transition: transition.to_string(),
            }),
            None => Err(AppError::RunNotFound { id: run_id.to_string() }),
        }
    }

    // ========================================================================
    // Run queries for scheduling gates and maintenance
    // ========================================================================

    /// Successful run for (job, operation) since the given instant?
    pub async fn has_recent_successful_run(
        &self,
        job_id: Uuid,
        operation: Operation,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let count = RunEntity::find()
            .filter(RunColumn::JobId.eq(job_id))
            .filter(RunColumn::Action.eq(operation.as_str()))
            .filter(RunColumn::DeletedAt.is_null())
            .filter(
                RunColumn::Status.is_in([
                    RunStatus::Succeeded.as_str(),
                    RunStatus::PartiallySucceeded.as_str(),
                ]),
            )
            .filter(RunColumn::ExecutionEndTs.gte(since))
            .count(self.read_conn())
            .await?;
        Ok(count > 0)
    }

    /// Failed runs for (job, operation) since the given instant
    pub async fn count_recent_failed_runs(
        &self,
        job_id: Uuid,
        operation: Operation,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        RunEntity::find()
            .filter(RunColumn::JobId.eq(job_id))
            .filter(RunColumn::Action.eq(operation.as_str()))
            .filter(RunColumn::DeletedAt.is_null())
            .filter(RunColumn::Status.eq(RunStatus::Failed.as_str()))
            .filter(RunColumn::ExecutionEndTs.gte(since))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Any run for (job, operation) created since the given instant?
    pub async fn has_run_created_since(
        &self,
        job_id: Uuid,
        operation: Operation,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let count = RunEntity::find()
            .filter(RunColumn::JobId.eq(job_id))
            .filter(RunColumn::Action.eq(operation.as_str()))
            .filter(RunColumn::DeletedAt.is_null())
            .filter(RunColumn::CreatedAt.gte(since))
            .count(self.read_conn())
            .await?;
        Ok(count > 0)
    }

    /// CREATED runs older than `older_than` but newer than `max_age`
    pub async fn list_stale_created_runs(
        &self,
        older_than: DateTime<Utc>,
        max_age: DateTime<Utc>,
    ) -> Result<Vec<Run>> {
        RunEntity::find()
            .filter(RunColumn::Status.eq(RunStatus::Created.as_str()))
            .filter(RunColumn::DeletedAt.is_null())
            .filter(RunColumn::CreatedAt.lt(older_than))
            .filter(RunColumn::CreatedAt.gt(max_age))
            .order_by_asc(RunColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// All SCHEDULED runs, oldest first, for duplicate pruning
    pub async fn list_scheduled_runs(&self) -> Result<Vec<Run>> {
        RunEntity::find()
            .filter(RunColumn::Status.eq(RunStatus::Scheduled.as_str()))
            .filter(RunColumn::DeletedAt.is_null())
            .order_by_asc(RunColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// STARTED runs whose execution began before the cutoff
    pub async fn list_stuck_started_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Run>> {
        RunEntity::find()
            .filter(RunColumn::Status.eq(RunStatus::Started.as_str()))
            .filter(RunColumn::DeletedAt.is_null())
            .filter(RunColumn::ExecutionStartTs.lt(cutoff))
            .order_by_asc(RunColumn::ExecutionStartTs)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Manual SCHEDULED runs created before the cutoff (queue backlog)
    pub async fn list_stale_manual_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Run>> {
        RunEntity::find()
            .filter(RunColumn::Status.eq(RunStatus::Scheduled.as_str()))
            .filter(RunColumn::IsManual.eq(true))
            .filter(RunColumn::DeletedAt.is_null())
            .filter(RunColumn::CreatedAt.lt(cutoff))
            .order_by_asc(RunColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Terminal runs that ended before the cutoff, for temp-file cleanup
    pub async fn list_terminal_runs_ended_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Run>> {
        RunEntity::find()
            .filter(
                RunColumn::Status.is_in(
                    RunStatus::TERMINAL.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                ),
            )
            .filter(RunColumn::DeletedAt.is_null())
            .filter(RunColumn::ExecutionEndTs.lt(cutoff))
            .order_by_desc(RunColumn::ExecutionEndTs)
            .paginate(self.read_conn(), limit)
            .fetch_page(0)
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // DiscoveredFile Operations
    // ========================================================================

    /// Insert a discovered file, enforcing (run, reference_code) uniqueness
    #[allow(clippy::too_many_arguments)]
    pub async fn build_unique_discovered_file(
        &self,
        run: &Run,
        connector_id: Uuid,
        reference_code: String,
        document_type: DocumentType,
        file_format: String,
        original_download_url: Option<String>,
        original_filename: Option<String>,
        document_properties: serde_json::Value,
    ) -> Result<DiscoveredFile> {
        let existing = DiscoveredFileEntity::find()
            .filter(DiscoveredFileColumn::RunId.eq(run.id))
            .filter(DiscoveredFileColumn::ReferenceCode.eq(reference_code.as_str()))
            .one(self.read_conn())
            .await?;
        if existing.is_some() {
            return Err(AppError::DiscoveredFileExists {
                run_id: run.id.to_string(),
                reference_code,
            });
        }

        let now = Utc::now();
        let file = DiscoveredFileActiveModel {
            id: Set(Uuid::new_v4()),
            run_id: Set(run.id),
            job_id: Set(run.job_id),
            connector_id: Set(connector_id),
            document_type: Set(document_type.as_str().to_string()),
            file_format: Set(file_format),
            original_filename: Set(original_filename),
            original_download_url: Set(original_download_url),
            reference_code: Set(reference_code.clone()),
            document_properties: Set(document_properties),
            content_hash: Set(None),
            extracted_text_hash: Set(None),
            downloaded_successfully: Set(false),
            downloaded_at: Set(None),
            local_filepath: Set(None),
            original_file: Set(None),
            piq_upload_id: Set(None),
            piq_url: Set(None),
            piq_container_id: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            deleted_at: Set(None),
        };

        // The unique index on (run_id, reference_code) backs up the check
        // above under concurrent inserts.
        file.insert(self.write_conn()).await.map_err(|e| match e {
            sea_orm::DbErr::Query(ref err) if err.to_string().contains("duplicate key") => {
                AppError::DiscoveredFileExists {
                    run_id: run.id.to_string(),
                    reference_code,
                }
            }
            other => other.into(),
        })
    }

    /// Find discovered file by ID
    pub async fn find_discovered_file_by_id(&self, id: Uuid) -> Result<Option<DiscoveredFile>> {
        DiscoveredFileEntity::find_by_id(id)
            .filter(DiscoveredFileColumn::DeletedAt.is_null())
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// List discovered files for a run
    pub async fn list_files_for_run(&self, run_id: Uuid) -> Result<Vec<DiscoveredFile>> {
        DiscoveredFileEntity::find()
            .filter(DiscoveredFileColumn::RunId.eq(run_id))
            .filter(DiscoveredFileColumn::DeletedAt.is_null())
            .order_by_asc(DiscoveredFileColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Prior successful file for the job matching reference code or download
    /// URL, used for pre-download skip when the connector opts in
    pub async fn find_prior_file_by_reference(
        &self,
        job_id: Uuid,
        exclude_run_id: Uuid,
        reference_code: &str,
        original_download_url: Option<&str>,
    ) -> Result<Option<DiscoveredFile>> {
        let mut matcher = Condition::any()
            .add(DiscoveredFileColumn::ReferenceCode.eq(reference_code));
        if let Some(url) = original_download_url {
            matcher = matcher.add(DiscoveredFileColumn::OriginalDownloadUrl.eq(url));
        }

        DiscoveredFileEntity::find()
            .filter(DiscoveredFileColumn::JobId.eq(job_id))
            .filter(DiscoveredFileColumn::RunId.ne(exclude_run_id))
            .filter(DiscoveredFileColumn::DownloadedSuccessfully.eq(true))
            .filter(DiscoveredFileColumn::DeletedAt.is_null())
            .filter(matcher)
            .order_by_desc(DiscoveredFileColumn::CreatedAt)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Prior successful file for the job with a matching fingerprint
    pub async fn find_prior_file_by_fingerprint(
        &self,
        job_id: Uuid,
        exclude_id: Uuid,
        content_hash: &str,
        extracted_text_hash: Option<&str>,
    ) -> Result<Option<DiscoveredFile>> {
        let mut matcher = Condition::any().add(DiscoveredFileColumn::ContentHash.eq(content_hash));
        if let Some(text_hash) = extracted_text_hash {
            matcher = matcher.add(DiscoveredFileColumn::ExtractedTextHash.eq(text_hash));
        }

        DiscoveredFileEntity::find()
            .filter(DiscoveredFileColumn::JobId.eq(job_id))
            .filter(DiscoveredFileColumn::Id.ne(exclude_id))
            .filter(DiscoveredFileColumn::DownloadedSuccessfully.eq(true))
            .filter(DiscoveredFileColumn::DeletedAt.is_null())
            .filter(matcher)
            .order_by_desc(DiscoveredFileColumn::CreatedAt)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Record content handling results after download and upload
    pub async fn save_discovered_file_content(
        &self,
        file_id: Uuid,
        local_filepath: String,
        content_hash: String,
        extracted_text_hash: Option<String>,
        original_file: Option<String>,
    ) -> Result<DiscoveredFile> {
        let file = self
            .find_discovered_file_by_id(file_id)
            .await?
            .ok_or_else(|| AppError::DiscoveredFileNotFound { id: file_id.to_string() })?;

        let now = Utc::now();
        let mut active: DiscoveredFileActiveModel = file.into();
        active.local_filepath = Set(Some(local_filepath));
        active.content_hash = Set(Some(content_hash));
        active.extracted_text_hash = Set(extracted_text_hash);
        active.original_file = Set(original_file);
        active.downloaded_successfully = Set(true);
        active.downloaded_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        active.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Record the downstream upload handle
    pub async fn set_piq_upload(
        &self,
        file_id: Uuid,
        upload_id: String,
        piq_url: String,
    ) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE discovered_files SET piq_upload_id = $1, piq_url = $2, updated_at = NOW() \
             WHERE id = $3 AND deleted_at IS NULL",
            vec![upload_id.into(), piq_url.into(), file_id.into()],
        );
        self.write_conn().execute_raw(stmt).await?;
        Ok(())
    }

    /// Record the downstream invoice container
    pub async fn set_piq_container(&self, file_id: Uuid, container_id: i64) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE discovered_files SET piq_container_id = $1, updated_at = NOW() \
             WHERE id = $2 AND deleted_at IS NULL",
            vec![container_id.into(), file_id.into()],
        );
        self.write_conn().execute_raw(stmt).await?;
        Ok(())
    }

    /// Clear the ephemeral local path once the worker host file is gone
    pub async fn clear_local_filepath(&self, file_id: Uuid) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE discovered_files SET local_filepath = NULL, updated_at = NOW() WHERE id = $1",
            vec![file_id.into()],
        );
        self.write_conn().execute_raw(stmt).await?;
        Ok(())
    }

    /// Files downloaded successfully but never handed downstream, older than
    /// the cutoff. Initial-backfill jobs are excluded by the caller.
    pub async fn list_files_pending_processing(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<DiscoveredFile>> {
        DiscoveredFileEntity::find()
            .filter(DiscoveredFileColumn::DownloadedSuccessfully.eq(true))
            .filter(DiscoveredFileColumn::PiqContainerId.is_null())
            .filter(DiscoveredFileColumn::DeletedAt.is_null())
            .filter(DiscoveredFileColumn::DocumentType.eq(DocumentType::Invoice.as_str()))
            .filter(DiscoveredFileColumn::CreatedAt.lt(cutoff))
            .order_by_asc(DiscoveredFileColumn::CreatedAt)
            .paginate(self.read_conn(), limit)
            .fetch_page(0)
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // CheckRun Operations
    // ========================================================================

    /// Insert a checkrun, enforcing per-chequerun uniqueness rules: a prior
    /// disabled attempt rejects with CheckRunDisabled, a prior successful
    /// export rejects with CheckRunExists, and a prior failure allows retry.
    pub async fn create_unique_check_run(
        &self,
        run_id: Uuid,
        chequerun_id: i64,
        payment_date: Option<NaiveDate>,
    ) -> Result<CheckRun> {
        let priors = CheckRunEntity::find()
            .filter(CheckRunColumn::ChequerunId.eq(chequerun_id))
            .order_by_desc(CheckRunColumn::CreatedAt)
            .all(self.read_conn())
            .await?;

        if priors.iter().any(|c| c.is_disabled) {
            return Err(AppError::CheckRunDisabled { chequerun_id });
        }
        if priors.iter().any(|c| c.is_checkrun_success) {
            return Err(AppError::CheckRunExists { chequerun_id });
        }

        let check_run = CheckRunActiveModel {
            id: Set(Uuid::new_v4()),
            run_id: Set(run_id),
            chequerun_id: Set(chequerun_id),
            is_patch_success: Set(false),
            is_checkrun_success: Set(false),
            is_disabled: Set(false),
            payment_date: Set(payment_date),
            created_at: Set(Utc::now().into()),
        };
        check_run.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Record export outcome on a checkrun
    pub async fn update_check_run_outcome(
        &self,
        check_run_id: Uuid,
        is_checkrun_success: bool,
        is_patch_success: bool,
    ) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE check_runs SET is_checkrun_success = $1, is_patch_success = $2 WHERE id = $3",
            vec![
                is_checkrun_success.into(),
                is_patch_success.into(),
                check_run_id.into(),
            ],
        );
        self.write_conn().execute_raw(stmt).await?;
        Ok(())
    }

    /// Failed attempts since the window start, grouped by chequerun
    pub async fn list_failing_check_runs(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckRun>> {
        CheckRunEntity::find()
            .filter(CheckRunColumn::IsCheckrunSuccess.eq(false))
            .filter(CheckRunColumn::IsDisabled.eq(false))
            .filter(CheckRunColumn::CreatedAt.gte(since))
            .order_by_asc(CheckRunColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// First recorded attempt for a chequerun
    pub async fn first_check_run_attempt(&self, chequerun_id: i64) -> Result<Option<CheckRun>> {
        CheckRunEntity::find()
            .filter(CheckRunColumn::ChequerunId.eq(chequerun_id))
            .order_by_asc(CheckRunColumn::CreatedAt)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Disable every attempt for a chequerun so create_unique rejects it
    pub async fn disable_chequerun(&self, chequerun_id: i64) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE check_runs SET is_disabled = TRUE WHERE chequerun_id = $1",
            vec![chequerun_id.into()],
        );
        let result = self.write_conn().execute_raw(stmt).await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // PIQMapping Operations
    // ========================================================================

    /// Create a mapping; mapping_data is normalized to lowercase
    pub async fn create_piq_mapping(
        &self,
        job_id: Uuid,
        mapping_data: &str,
        piq_data: String,
    ) -> Result<PiqMapping> {
        let mapping = PiqMappingActiveModel {
            id: Set(Uuid::new_v4()),
            job_id: Set(job_id),
            mapping_data: Set(mapping_data.to_lowercase()),
            piq_data: Set(piq_data),
            created_at: Set(Utc::now().into()),
        };
        mapping.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Case-insensitive mapping lookup
    pub async fn get_piq_mapped_data(&self, job_id: Uuid, key: &str) -> Result<Option<String>> {
        let mapping = PiqMappingEntity::find()
            .filter(PiqMappingColumn::JobId.eq(job_id))
            .filter(PiqMappingColumn::MappingData.eq(key.to_lowercase()))
            .one(self.read_conn())
            .await?;
        Ok(mapping.map(|m| m.piq_data))
    }

    // ========================================================================
    // FileDiscoveryAction Operations
    // ========================================================================

    /// Action binding for (job, document_type); job-level wins over
    /// connector-level
    pub async fn find_file_action(
        &self,
        job_id: Uuid,
        connector_id: Uuid,
        document_type: DocumentType,
    ) -> Result<Option<FileDiscoveryAction>> {
        let job_level = FileDiscoveryActionEntity::find()
            .filter(FileDiscoveryActionColumn::JobId.eq(job_id))
            .filter(FileDiscoveryActionColumn::DocumentType.eq(document_type.as_str()))
            .one(self.read_conn())
            .await?;
        if job_level.is_some() {
            return Ok(job_level);
        }

        FileDiscoveryActionEntity::find()
            .filter(FileDiscoveryActionColumn::ConnectorId.eq(connector_id))
            .filter(FileDiscoveryActionColumn::DocumentType.eq(document_type.as_str()))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // JobStat Operations
    // ========================================================================

    /// Total discovered files for a job over a date window (inclusive)
    pub async fn sum_df_count(
        &self,
        job_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<i64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT COALESCE(SUM(df_count), 0)::bigint AS total FROM job_stats \
             WHERE job_id = $1 AND stat_date >= $2 AND stat_date <= $3",
            vec![job_id.into(), from.into(), to.into()],
        );
        let row = self.read_conn().query_one_raw(stmt).await?;
        match row {
            Some(row) => row.try_get_by::<i64, _>("total").map_err(Into::into),
            None => Ok(0),
        }
    }

    /// Bump the daily aggregate for a job
    #[allow(clippy::too_many_arguments)]
    pub async fn increment_job_stat(
        &self,
        job_id: Uuid,
        stat_date: NaiveDate,
        runs: i32,
        successes: i32,
        manual: i32,
        login_failures: i32,
        discovered_files: i32,
    ) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO job_stats (
                id, job_id, stat_date, run_count, success_run_count,
                manual_run_count, login_failure_count, df_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (job_id, stat_date) DO UPDATE SET
                run_count = job_stats.run_count + EXCLUDED.run_count,
                success_run_count = job_stats.success_run_count + EXCLUDED.success_run_count,
                manual_run_count = job_stats.manual_run_count + EXCLUDED.manual_run_count,
                login_failure_count = job_stats.login_failure_count + EXCLUDED.login_failure_count,
                df_count = job_stats.df_count + EXCLUDED.df_count
            "#,
            vec![
                Uuid::new_v4().into(),
                job_id.into(),
                stat_date.into(),
                runs.into(),
                successes.into(),
                manual.into(),
                login_failures.into(),
                discovered_files.into(),
            ],
        );
        self.write_conn().execute_raw(stmt).await?;
        Ok(())
    }

    // ========================================================================
    // JobAlertRule Operations
    // ========================================================================

    /// Enabled delivery alert rules, joined with their jobs
    pub async fn list_enabled_alert_rules(&self) -> Result<Vec<(JobAlertRule, Job)>> {
        let rows = JobAlertRuleEntity::find()
            .filter(JobAlertRuleColumn::Enabled.eq(true))
            .find_also_related(JobEntity)
            .all(self.read_conn())
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(rule, job)| match job {
                Some(job) if !job.is_deleted() => Some((rule, job)),
                _ => None,
            })
            .collect())
    }

    // ========================================================================
    // ConnectorRequest Operations
    // ========================================================================

    /// Requests not yet converted to a job
    pub async fn list_unconverted_connector_requests(&self) -> Result<Vec<ConnectorRequest>> {
        ConnectorRequestEntity::find()
            .filter(ConnectorRequestColumn::ConvertedJobId.is_null())
            .order_by_asc(ConnectorRequestColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Link a connector to a request
    pub async fn link_connector_request(
        &self,
        request_id: Uuid,
        connector_id: Uuid,
    ) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE connector_requests SET connector_id = $1 WHERE id = $2",
            vec![connector_id.into(), request_id.into()],
        );
        self.write_conn().execute_raw(stmt).await?;
        Ok(())
    }

    /// Convert a linked request into an enabled job carrying the submitted
    /// credentials
    pub async fn convert_connector_request(&self, request: &ConnectorRequest) -> Result<Job> {
        let connector_id = request.connector_id.ok_or_else(|| AppError::Validation {
            message: "Connector request has no linked connector".to_string(),
            field: Some("connector_id".to_string()),
        })?;

        let job = self
            .create_job(
                request.account_id.clone(),
                connector_id,
                request.name.clone(),
                request.username.clone(),
                request.password.clone(),
                request.login_url.clone(),
                false,
            )
            .await?;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE connector_requests SET converted_job_id = $1 WHERE id = $2",
            vec![job.id.into(), request.id.into()],
        );
        self.write_conn().execute_raw(stmt).await?;

        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn run_row(status: &str) -> Run {
        let now = Utc::now();
        Run {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            action: "invoice.download".to_string(),
            status: status.to_string(),
            dry_run: false,
            is_manual: false,
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

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult { last_insert_id: 0, rows_affected }
    }

    /// Repository over a mocked connection, plus a handle that yields the
    /// statements the repository issued.
    fn mocked_repo(db: MockDatabase) -> (Repository, DatabaseConnection) {
        let conn = db.into_connection();
        (Repository::new(DbPool::single(conn.clone())), conn)
    }

    #[tokio::test]
    async fn test_schedule_guard_requires_created() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).append_exec_results([exec(1)]);
        let (repo, conn) = mocked_repo(db);

        repo.mark_run_scheduled(Uuid::new_v4(), Some("batch-1".to_string()), false)
            .await
            .unwrap();

        let issued = format!("{:?}", conn.into_transaction_log());
        assert!(issued.contains("status = 'CREATED'"));
        assert!(!issued.contains("status NOT IN"));
    }

    #[tokio::test]
    async fn test_forced_schedule_only_skips_terminal_runs() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).append_exec_results([exec(1)]);
        let (repo, conn) = mocked_repo(db);

        repo.mark_run_scheduled(Uuid::new_v4(), None, true).await.unwrap();

        let issued = format!("{:?}", conn.into_transaction_log());
        assert!(issued.contains(&format!("status NOT IN {}", TERMINAL_STATUSES)));
    }

    #[tokio::test]
    async fn test_schedule_conflict_reports_current_status() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(0)])
            .append_query_results([[run_row("STARTED")]]);
        let (repo, _conn) = mocked_repo(db);

        let result = repo.mark_run_scheduled(Uuid::new_v4(), None, false).await;
        match result {
            Err(AppError::InvalidRunState { status, transition, .. }) => {
                assert_eq!(status, "STARTED");
                assert_eq!(transition, "schedule");
            }
            other => panic!("expected InvalidRunState, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_finish_guard_requires_started() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(0)])
            .append_query_results([[run_row("CREATED")]]);
        let (repo, conn) = mocked_repo(db);

        let result = repo.record_success(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::InvalidRunState { .. })));

        let issued = format!("{:?}", conn.into_transaction_log());
        assert!(issued.contains("status = 'STARTED'"));
    }

    #[tokio::test]
    async fn test_failure_guard_skips_terminal_runs() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(0)])
            .append_query_results([[run_row("SUCCEEDED")]]);
        let (repo, conn) = mocked_repo(db);

        let result = repo.record_failure(Uuid::new_v4(), None).await;
        match result {
            Err(AppError::InvalidRunState { status, .. }) => assert_eq!(status, "SUCCEEDED"),
            other => panic!("expected InvalidRunState, got {:?}", other),
        }

        let issued = format!("{:?}", conn.into_transaction_log());
        assert!(issued.contains(&format!("status NOT IN {}", TERMINAL_STATUSES)));
    }

    #[tokio::test]
    async fn test_cancel_guard_rejects_started_runs() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(0)])
            .append_query_results([[run_row("STARTED")]]);
        let (repo, conn) = mocked_repo(db);

        let result = repo.cancel_run(Uuid::new_v4(), "operator request").await;
        match result {
            Err(AppError::InvalidRunState { status, transition, .. }) => {
                assert_eq!(status, "STARTED");
                assert_eq!(transition, "cancel");
            }
            other => panic!("expected InvalidRunState, got {:?}", other),
        }

        let issued = format!("{:?}", conn.into_transaction_log());
        assert!(issued.contains("status IN ('CREATED','SCHEDULED')"));
    }

    #[tokio::test]
    async fn test_cancel_stuck_targets_started_and_tolerates_races() {
        // A run that finished between the sweep query and the update is
        // left alone without an error.
        let db = MockDatabase::new(DatabaseBackend::Postgres).append_exec_results([exec(0)]);
        let (repo, conn) = mocked_repo(db);

        repo.cancel_stuck_run(Uuid::new_v4(), "exceeded wall clock").await.unwrap();

        let issued = format!("{:?}", conn.into_transaction_log());
        assert!(issued.contains("status = 'STARTED'"));
    }

    #[tokio::test]
    async fn test_guard_failure_on_missing_run_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([exec(0)])
            .append_query_results([Vec::<Run>::new()]);
        let (repo, _conn) = mocked_repo(db);

        let result = repo.record_failure(Uuid::new_v4(), None).await;
        assert!(matches!(result, Err(AppError::RunNotFound { .. })));
    }
}
