//! Run listing handlers (read-only)

use crate::handlers::{owned_job, AccountContext};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use harvester_common::errors::{AppError, Result};
use harvester_common::models::Run;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: u64 = 25;
const MAX_PAGE_SIZE: u64 = 200;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: u64,
    pub limit: Option<u64>,
}

impl Pagination {
    fn limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Serialize)]
pub struct RunResponse {
    pub id: Uuid,
    pub job_id: Uuid,
    pub operation: String,
    pub status: String,
    pub dry_run: bool,
    pub is_manual: bool,
    pub created_via: String,
    pub request_parameters: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_start_ts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_end_ts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_issue: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    pub created_at: String,
}

impl From<Run> for RunResponse {
    fn from(run: Run) -> Self {
        Self {
            id: run.id,
            job_id: run.job_id,
            operation: run.action,
            status: run.status,
            dry_run: run.dry_run,
            is_manual: run.is_manual,
            created_via: run.created_via,
            request_parameters: run.request_parameters,
            execution_start_ts: run.execution_start_ts.map(|ts| ts.to_rfc3339()),
            execution_end_ts: run.execution_end_ts.map(|ts| ts.to_rfc3339()),
            failure_issue: run.failure_issue,
            cancel_reason: run.cancel_reason,
            created_at: run.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct RunListResponse {
    pub runs: Vec<RunResponse>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

pub async fn list_runs(
    State(state): State<AppState>,
    account: AccountContext,
    Path(job_id): Path<Uuid>,
    Query(page): Query<Pagination>,
) -> Result<Json<RunListResponse>> {
    owned_job(&state, &account, job_id).await?;

    let limit = page.limit();
    let (runs, total) = state.repo.list_runs_for_job(job_id, page.offset, limit).await?;

    Ok(Json(RunListResponse {
        runs: runs.into_iter().map(RunResponse::from).collect(),
        total,
        offset: page.offset,
        limit,
    }))
}

pub async fn get_run(
    State(state): State<AppState>,
    account: AccountContext,
    Path(id): Path<Uuid>,
) -> Result<Json<RunResponse>> {
    let run = state
        .repo
        .find_run_by_id(id)
        .await?
        .ok_or_else(|| AppError::RunNotFound { id: id.to_string() })?;
    owned_job(&state, &account, run.job_id)
        .await
        .map_err(|_| AppError::RunNotFound { id: id.to_string() })?;
    Ok(Json(run.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_clamps_limit() {
        let page = Pagination {
            offset: 0,
            limit: Some(10_000),
        };
        assert_eq!(page.limit(), MAX_PAGE_SIZE);

        let page = Pagination {
            offset: 0,
            limit: Some(0),
        };
        assert_eq!(page.limit(), 1);

        let page = Pagination {
            offset: 0,
            limit: None,
        };
        assert_eq!(page.limit(), DEFAULT_PAGE_SIZE);
    }
}
