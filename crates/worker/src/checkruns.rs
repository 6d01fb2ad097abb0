//! Checkrun bookkeeping for payment export flows
//!
//! A chequerun is exported at most once. Every attempt is recorded; a prior
//! successful or disabled attempt rejects the new one before the adapter
//! talks to the portal.

use chrono::NaiveDate;
use harvester_common::db::models::{CheckRun, Run};
use harvester_common::errors::AppError;
use harvester_common::Repository;
use tracing::info;

#[derive(Clone)]
pub struct CheckRunRecorder {
    repo: Repository,
}

impl CheckRunRecorder {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Open an attempt for a chequerun. The payment date is pinned on the
    /// first attempt; retries inherit it when the adapter does not resend one.
    pub async fn open(
        &self,
        run: &Run,
        chequerun_id: i64,
        payment_date: Option<NaiveDate>,
    ) -> Result<CheckRun, AppError> {
        let payment_date = match payment_date {
            Some(date) => Some(date),
            None => self
                .repo
                .first_check_run_attempt(chequerun_id)
                .await?
                .and_then(|first| first.payment_date),
        };
        let check_run = self
            .repo
            .create_unique_check_run(run.id, chequerun_id, payment_date)
            .await?;
        info!(run_id = %run.id, chequerun_id, "Checkrun attempt opened");
        Ok(check_run)
    }

    /// Record the export outcome on an open attempt
    pub async fn close(
        &self,
        check_run: &CheckRun,
        is_checkrun_success: bool,
        is_patch_success: bool,
    ) -> Result<(), AppError> {
        self.repo
            .update_check_run_outcome(check_run.id, is_checkrun_success, is_patch_success)
            .await
    }
}
