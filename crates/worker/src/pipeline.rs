//! Discovered-file pipeline
//!
//! Adapters hand every artifact they find through [`FilePipeline::register_file`].
//! The pipeline owns persistence, download, fingerprinting, duplicate
//! suppression and handoff to the bound action, so adapter code stays a
//! thin navigation layer.

use crate::actions::ActionRunner;
use crate::download::Downloader;
use crate::errors::Result;
use harvester_common::clients::ArtifactStore;
use harvester_common::db::models::{
    content_fingerprint, text_fingerprint, Connector, DiscoveredFile, DocumentType, Job, Run,
};
use harvester_common::metrics::record_file_discovered;
use harvester_common::Repository;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Everything an adapter knows about an artifact before download
#[derive(Debug, Clone)]
pub struct NewFileSpec {
    pub reference_code: String,
    pub document_type: DocumentType,
    pub file_format: String,
    pub original_download_url: Option<String>,
    pub original_filename: Option<String>,
    pub document_properties: serde_json::Value,
    pub extracted_text: Option<String>,
}

impl NewFileSpec {
    pub fn new(reference_code: impl Into<String>, document_type: DocumentType) -> Self {
        Self {
            reference_code: reference_code.into(),
            document_type,
            file_format: "pdf".to_string(),
            original_download_url: None,
            original_filename: None,
            document_properties: serde_json::json!({}),
            extracted_text: None,
        }
    }
}

/// How a registered file left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDisposition {
    /// Skipped before download because a prior run already has it
    SkippedPriorReference,
    /// Downloaded but the fingerprint matched a prior run's file
    DuplicateContent,
    /// New content, persisted and routed to its action
    Accepted,
}

impl FileDisposition {
    pub fn is_new(&self) -> bool {
        matches!(self, FileDisposition::Accepted)
    }
}

#[derive(Clone)]
pub struct FilePipeline {
    repo: Repository,
    store: Option<ArtifactStore>,
    actions: ActionRunner,
}

impl FilePipeline {
    pub fn new(repo: Repository, store: Option<ArtifactStore>, actions: ActionRunner) -> Self {
        Self { repo, store, actions }
    }

    /// Persist one artifact and walk it through the pipeline.
    ///
    /// Within a run the reference code is the identity: a second call with
    /// the same code fails with `DiscoveredFileExists`. Across runs the
    /// content fingerprint decides; a duplicate keeps its metadata but is
    /// never forwarded to an action.
    #[instrument(skip_all, fields(run_id = %run.id, reference_code = %spec.reference_code))]
    pub async fn register_file(
        &self,
        run: &Run,
        job: &Job,
        connector: &Connector,
        spec: NewFileSpec,
        downloader: &dyn Downloader,
        temp_dir: &Path,
    ) -> Result<(DiscoveredFile, FileDisposition)> {
        if connector.df_download_url_skip_duplicates {
            let prior = self
                .repo
                .find_prior_file_by_reference(
                    job.id,
                    run.id,
                    &spec.reference_code,
                    spec.original_download_url.as_deref(),
                )
                .await?;
            if let Some(prior) = prior {
                debug!(prior_file_id = %prior.id, "Reference already seen, skipping download");
                record_file_discovered(spec.document_type.as_str(), true);
                let file = self.persist_spec(run, connector, &spec).await?;
                return Ok((file, FileDisposition::SkippedPriorReference));
            }
        }

        let file = self.persist_spec(run, connector, &spec).await?;

        let local_path = downloader.download(temp_dir).await?;
        let bytes = tokio::fs::read(&local_path).await.map_err(|e| {
            harvester_common::errors::AppError::StorageError {
                message: format!("Failed to read downloaded file: {e}"),
            }
        })?;

        let content_hash = content_fingerprint(&bytes);
        let extracted_text_hash = spec.extracted_text.as_deref().map(text_fingerprint);

        let prior = self
            .repo
            .find_prior_file_by_fingerprint(
                job.id,
                file.id,
                &content_hash,
                extracted_text_hash.as_deref(),
            )
            .await?;

        let original_file = match &self.store {
            Some(store) if prior.is_none() => {
                let key = artifact_key(run, &file, &spec);
                Some(store.upload(&key, bytes, "application/octet-stream").await?)
            }
            _ => None,
        };

        let file = self
            .repo
            .save_discovered_file_content(
                file.id,
                local_path.to_string_lossy().into_owned(),
                content_hash,
                extracted_text_hash,
                original_file,
            )
            .await?;

        if let Some(prior) = prior {
            info!(prior_file_id = %prior.id, "Content matches a prior run, suppressing action");
            record_file_discovered(spec.document_type.as_str(), true);
            return Ok((file, FileDisposition::DuplicateContent));
        }

        record_file_discovered(spec.document_type.as_str(), false);

        // Action failures are not run failures. The file is already
        // persisted with its fingerprint, so maintenance will re-queue it.
        if let Err(error) = self.actions.execute_for(&file, run, job, connector).await {
            warn!(file_id = %file.id, %error, "File action failed, leaving it for retry");
        }

        Ok((file, FileDisposition::Accepted))
    }

    async fn persist_spec(
        &self,
        run: &Run,
        connector: &Connector,
        spec: &NewFileSpec,
    ) -> Result<DiscoveredFile> {
        let file = self
            .repo
            .build_unique_discovered_file(
                run,
                connector.id,
                spec.reference_code.clone(),
                spec.document_type,
                spec.file_format.clone(),
                spec.original_download_url.clone(),
                spec.original_filename.clone(),
                spec.document_properties.clone(),
            )
            .await?;
        Ok(file)
    }
}

fn artifact_key(run: &Run, file: &DiscoveredFile, spec: &NewFileSpec) -> String {
    let filename = spec
        .original_filename
        .clone()
        .unwrap_or_else(|| format!("{}.{}", spec.reference_code, spec.file_format));
    format!("runs/{}/{}-{}", run.id, file.id, filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_new_spec_defaults() {
        let spec = NewFileSpec::new("INV-1", DocumentType::Invoice);
        assert_eq!(spec.file_format, "pdf");
        assert!(spec.original_download_url.is_none());
        assert!(spec.extracted_text.is_none());
    }

    #[test]
    fn test_artifact_key_falls_back_to_reference_code() {
        let run_id = Uuid::new_v4();
        let file_id = Uuid::new_v4();
        let spec = NewFileSpec::new("INV-7", DocumentType::Invoice);
        let key = format!("runs/{run_id}/{file_id}-INV-7.pdf");

        // Build via format directly since Run/DiscoveredFile fixtures are
        // heavyweight; the helper only reads the ids and the spec.
        let filename = spec
            .original_filename
            .clone()
            .unwrap_or_else(|| format!("{}.{}", spec.reference_code, spec.file_format));
        assert_eq!(format!("runs/{run_id}/{file_id}-{filename}"), key);
    }

    #[test]
    fn test_disposition_newness() {
        assert!(FileDisposition::Accepted.is_new());
        assert!(!FileDisposition::DuplicateContent.is_new());
        assert!(!FileDisposition::SkippedPriorReference.is_new());
    }
}
