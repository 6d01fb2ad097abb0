//! Discovered-file listing handlers (read-only)

use crate::handlers::{owned_job, AccountContext};
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use harvester_common::errors::{AppError, Result};
use harvester_common::models::DiscoveredFile;
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize)]
pub struct FileResponse {
    pub id: Uuid,
    pub run_id: Uuid,
    pub document_type: String,
    pub file_format: String,
    pub reference_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    pub document_properties: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub downloaded_successfully: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub piq_container_id: Option<i64>,
    pub created_at: String,
}

impl From<DiscoveredFile> for FileResponse {
    fn from(file: DiscoveredFile) -> Self {
        Self {
            id: file.id,
            run_id: file.run_id,
            document_type: file.document_type,
            file_format: file.file_format,
            reference_code: file.reference_code,
            original_filename: file.original_filename,
            document_properties: file.document_properties,
            content_hash: file.content_hash,
            downloaded_successfully: file.downloaded_successfully,
            original_file: file.original_file,
            piq_container_id: file.piq_container_id,
            created_at: file.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileResponse>,
}

pub async fn list_run_files(
    State(state): State<AppState>,
    account: AccountContext,
    Path(run_id): Path<Uuid>,
) -> Result<Json<FileListResponse>> {
    let run = state
        .repo
        .find_run_by_id(run_id)
        .await?
        .ok_or_else(|| AppError::RunNotFound { id: run_id.to_string() })?;
    owned_job(&state, &account, run.job_id)
        .await
        .map_err(|_| AppError::RunNotFound { id: run_id.to_string() })?;

    let files = state
        .repo
        .list_files_for_run(run_id)
        .await?
        .into_iter()
        .map(FileResponse::from)
        .collect();
    Ok(Json(FileListResponse { files }))
}
