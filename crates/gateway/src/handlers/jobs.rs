//! Job management handlers
//!
//! Jobs are the account-scoped resource; schedules, mappings, and the
//! run-job action hang off them.

use crate::handlers::{owned_job, AccountContext};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use harvester_common::db::models::{CreatedVia, Job, JobSchedule, Operation, RequestParameters};
use harvester_common::dispatch::{DispatchOutcome, RunRequest};
use harvester_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    pub connector_id: Uuid,

    #[validate(length(min = 1, max = 255))]
    pub name: String,

    pub username: Option<String>,

    pub password: Option<String>,

    pub login_url: Option<String>,

    #[serde(default)]
    pub suppress_invoices: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCredentialsRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub ftp_credential_handle: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub frequency: String,
    #[serde(default)]
    pub day_of_week: Vec<u32>,
    #[serde(default)]
    pub week_of_month: Vec<u32>,
    #[serde(default)]
    pub date_of_month: Vec<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMappingRequest {
    #[validate(length(min = 1, max = 255))]
    pub mapping_data: String,

    #[validate(length(min = 1, max = 255))]
    pub piq_data: String,
}

/// Request body for the run-job action. Everything is optional; the
/// connector's default operation and document window apply.
#[derive(Debug, Default, Deserialize)]
pub struct RunJobRequest {
    pub operation: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    pub start_date: Option<chrono::NaiveDate>,
    pub end_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub import_entities: Vec<String>,
    #[serde(default)]
    pub payment_ids: Vec<i64>,
}

#[derive(Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub account_id: String,
    pub connector_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    pub suppress_invoices: bool,
    pub created_at: String,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            account_id: job.account_id,
            connector_id: job.connector_id,
            name: job.name,
            username: job.username,
            enabled: job.enabled,
            disabled_reason: job.disabled_reason,
            suppress_invoices: job.suppress_invoices,
            created_at: job.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
}

#[derive(Serialize)]
pub struct ScheduleResponse {
    pub id: Uuid,
    pub frequency: String,
    pub day_of_week: serde_json::Value,
    pub week_of_month: serde_json::Value,
    pub date_of_month: serde_json::Value,
}

impl From<JobSchedule> for ScheduleResponse {
    fn from(schedule: JobSchedule) -> Self {
        Self {
            id: schedule.id,
            frequency: schedule.frequency,
            day_of_week: schedule.day_of_week,
            week_of_month: schedule.week_of_month,
            date_of_month: schedule.date_of_month,
        }
    }
}

#[derive(Serialize)]
pub struct RunJobResponse {
    pub run_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inflight_run_id: Option<Uuid>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    account: AccountContext,
) -> Result<Json<JobListResponse>> {
    let jobs = state
        .repo
        .list_jobs_for_account(&account.account_id)
        .await?
        .into_iter()
        .map(JobResponse::from)
        .collect();
    Ok(Json(JobListResponse { jobs }))
}

pub async fn create_job(
    State(state): State<AppState>,
    account: AccountContext,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    state
        .repo
        .find_connector_by_id(request.connector_id)
        .await?
        .ok_or_else(|| AppError::ConnectorNotFound {
            id: request.connector_id.to_string(),
        })?;

    let job = state
        .repo
        .create_job(
            account.account_id,
            request.connector_id,
            request.name,
            request.username,
            request.password,
            request.login_url,
            request.suppress_invoices,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(job.into())))
}

pub async fn get_job(
    State(state): State<AppState>,
    account: AccountContext,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>> {
    let job = owned_job(&state, &account, id).await?;
    Ok(Json(job.into()))
}

pub async fn update_credentials(
    State(state): State<AppState>,
    account: AccountContext,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateCredentialsRequest>,
) -> Result<Json<JobResponse>> {
    owned_job(&state, &account, id).await?;
    let job = state
        .repo
        .update_job_credentials(
            id,
            request.username,
            request.password,
            request.ftp_credential_handle,
        )
        .await?;
    Ok(Json(job.into()))
}

pub async fn delete_job(
    State(state): State<AppState>,
    account: AccountContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    owned_job(&state, &account, id).await?;
    state.repo.soft_delete_job(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_schedules(
    State(state): State<AppState>,
    account: AccountContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ScheduleResponse>>> {
    owned_job(&state, &account, id).await?;
    let schedules = state
        .repo
        .schedules_for_job(id)
        .await?
        .into_iter()
        .map(ScheduleResponse::from)
        .collect();
    Ok(Json(schedules))
}

pub async fn create_schedule(
    State(state): State<AppState>,
    account: AccountContext,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleResponse>)> {
    owned_job(&state, &account, id).await?;
    let schedule = state
        .repo
        .create_schedule(
            id,
            request.frequency,
            request.day_of_week,
            request.week_of_month,
            request.date_of_month,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(schedule.into())))
}

pub async fn create_mapping(
    State(state): State<AppState>,
    account: AccountContext,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateMappingRequest>,
) -> Result<StatusCode> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;
    owned_job(&state, &account, id).await?;
    state
        .repo
        .create_piq_mapping(id, &request.mapping_data, request.piq_data)
        .await?;
    Ok(StatusCode::CREATED)
}

/// Create and dispatch a user-initiated run for the job
pub async fn run_job(
    State(state): State<AppState>,
    account: AccountContext,
    Path(id): Path<Uuid>,
    Json(request): Json<RunJobRequest>,
) -> Result<(StatusCode, Json<RunJobResponse>)> {
    let job = owned_job(&state, &account, id).await?;
    let connector = state
        .repo
        .find_connector_by_id(job.connector_id)
        .await?
        .ok_or_else(|| AppError::ConnectorNotFound {
            id: job.connector_id.to_string(),
        })?;

    let operation = match &request.operation {
        Some(tag) => Operation::parse(tag)?,
        None => connector.default_operation(),
    };

    let params = (request.start_date.is_some()
        || request.end_date.is_some()
        || !request.import_entities.is_empty()
        || !request.payment_ids.is_empty())
    .then(|| RequestParameters {
        start_date: request.start_date,
        end_date: request.end_date,
        suppress_invoices: job.suppress_invoices,
        import_entities: request.import_entities.clone(),
        payment_ids: request.payment_ids.clone(),
        ..Default::default()
    });

    let run = state
        .factory
        .create_run(
            &job,
            &connector,
            operation,
            CreatedVia::ApiRequest,
            RunRequest {
                dry_run: request.dry_run,
                is_manual: true,
                request_parameters: params,
            },
        )
        .await?;

    let response = match state.dispatcher.dispatch(&run, false).await? {
        DispatchOutcome::Submitted(handle) => RunJobResponse {
            run_id: run.id,
            status: "SCHEDULED".to_string(),
            handle: Some(handle),
            inflight_run_id: None,
        },
        DispatchOutcome::SkippedInflight { inflight_run_id } => RunJobResponse {
            run_id: run.id,
            status: "CREATED".to_string(),
            handle: None,
            inflight_run_id: Some(inflight_run_id),
        },
    };

    Ok((StatusCode::ACCEPTED, Json(response)))
}
