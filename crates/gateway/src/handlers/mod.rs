//! Request handlers for the admin surface

pub mod connectors;
pub mod files;
pub mod health;
pub mod jobs;
pub mod runs;

use crate::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use harvester_common::errors::AppError;

/// The account the request operates on, taken from the scoping header.
///
/// Admin callers act on behalf of one account per request; every job-level
/// handler verifies ownership against this value.
#[derive(Debug, Clone)]
pub struct AccountContext {
    pub account_id: String,
}

impl FromRequestParts<AppState> for AccountContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = &state.config.server.account_header;
        let account_id = parts
            .headers
            .get(header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::Unauthorized {
                message: format!("Missing {} header", header),
            })?
            .to_string();

        Ok(AccountContext { account_id })
    }
}

/// Load a job and verify it belongs to the requesting account. Foreign jobs
/// are reported as not found so ids do not leak across accounts.
pub(crate) async fn owned_job(
    state: &AppState,
    account: &AccountContext,
    job_id: uuid::Uuid,
) -> Result<harvester_common::models::Job, AppError> {
    let job = state
        .repo
        .find_job_by_id(job_id)
        .await?
        .filter(|job| job.account_id == account.account_id)
        .ok_or_else(|| AppError::JobNotFound {
            id: job_id.to_string(),
        })?;
    Ok(job)
}
