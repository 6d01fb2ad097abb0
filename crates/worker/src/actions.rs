//! Post-discovery action handlers
//!
//! Once a file is persisted, its (document type, action type) binding picks
//! a handler. Handlers are idempotent: maintenance re-queues files whose
//! action died halfway, so every guard here has to tolerate a rerun.

use crate::errors::{Result, WorkerError};
use harvester_common::clients::{signed_filename, ArtifactStore, ContainerJob, InvoiceContainerRequest, PiqClient};
use harvester_common::config::DownstreamConfig;
use harvester_common::db::models::{ActionType, Connector, DiscoveredFile, Job, Run};
use harvester_common::errors::AppError;
use harvester_common::metrics::record_file_action;
use harvester_common::queue::{PaymentEdiMessage, QueueLane, QueueSet, ShortTaskMessage};
use harvester_common::Repository;
use tracing::{debug, info, instrument, warn};

const PAYMENT_EDI_DELAY_SECS: i32 = 5;

/// What the action runner did with a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// No action bound, or the bound action is `none`
    NoAction,
    /// A guard short-circuited (switch off, already processed)
    Skipped,
    /// The handler ran to completion
    Executed,
}

/// Executes the handler bound to a file's document type
#[derive(Clone)]
pub struct ActionRunner {
    repo: Repository,
    piq: Option<PiqClient>,
    store: Option<ArtifactStore>,
    queues: QueueSet,
    config: DownstreamConfig,
}

impl ActionRunner {
    pub fn new(
        repo: Repository,
        piq: Option<PiqClient>,
        store: Option<ArtifactStore>,
        queues: QueueSet,
        config: DownstreamConfig,
    ) -> Self {
        Self {
            repo,
            piq,
            store,
            queues,
            config,
        }
    }

    /// Look up the binding for (job, connector, document type) and run it
    #[instrument(skip_all, fields(file_id = %file.id))]
    pub async fn execute_for(
        &self,
        file: &DiscoveredFile,
        run: &Run,
        job: &Job,
        connector: &Connector,
    ) -> Result<ActionOutcome> {
        let document_type = file.document_type();
        let binding = self
            .repo
            .find_file_action(job.id, connector.id, document_type)
            .await?;

        let Some(binding) = binding else {
            debug!("No action bound for document type");
            return Ok(ActionOutcome::NoAction);
        };

        let action_type = binding.action_type();
        let outcome = match action_type {
            ActionType::None => Ok(ActionOutcome::NoAction),
            ActionType::PiqStandardUpload => self.invoice_upload(file, job, false, None).await,
            ActionType::PiqEdiUpload => {
                self.invoice_upload(file, job, true, binding.edi_parser_code.clone())
                    .await
            }
            ActionType::PaymentsEdiUpload => {
                self.payment_edi(file, run, job, binding.edi_parser_code.clone()).await
            }
        };

        record_file_action(action_type.as_str(), outcome.is_ok());
        outcome
    }

    /// Signed-URL upload plus invoice container creation
    async fn invoice_upload(
        &self,
        file: &DiscoveredFile,
        job: &Job,
        is_edi: bool,
        edi_parser_code: Option<String>,
    ) -> Result<ActionOutcome> {
        if !self.config.discovered_file_api_switch {
            debug!("Upload switch is off");
            return Ok(ActionOutcome::Skipped);
        }
        if file.piq_container_id.is_some() {
            debug!("File already has a container");
            return Ok(ActionOutcome::Skipped);
        }

        let piq = self.piq.as_ref().ok_or_else(|| AppError::Configuration {
            message: "Document-processing API is not configured".to_string(),
        })?;
        let content_hash = file.content_hash.as_deref().ok_or_else(|| AppError::Validation {
            message: "Discovered file has no content hash".to_string(),
            field: Some("content_hash".to_string()),
        })?;

        let bytes = self.load_file_bytes(file).await?;
        let filename = signed_filename(file.id, content_hash, &file.file_format);

        let signed = piq.fetch_signed_upload(&filename).await?;
        if signed.upload_id.is_empty() || signed.url.is_empty() {
            return Err(AppError::Validation {
                message: "Signed upload response missing upload_id or url".to_string(),
                field: None,
            }
            .into());
        }

        piq.upload_file(&signed.url, bytes, content_type(&file.file_format)).await?;
        self.repo
            .set_piq_upload(file.id, signed.upload_id.clone(), signed.url.clone())
            .await?;

        if !self.config.discovered_file_create_doc {
            info!(upload_id = %signed.upload_id, "Uploaded, container creation is off");
            return Ok(ActionOutcome::Executed);
        }

        let request = self
            .container_request(file, job, &signed.upload_id, &filename, is_edi, edi_parser_code)
            .await?;
        let container_id = piq.create_invoice_container(&request).await?;
        self.repo.set_piq_container(file.id, container_id).await?;

        info!(container_id, "Invoice container created");
        Ok(ActionOutcome::Executed)
    }

    /// Queue the payment file for the EDI step function
    async fn payment_edi(
        &self,
        file: &DiscoveredFile,
        run: &Run,
        job: &Job,
        edi_parser_code: Option<String>,
    ) -> Result<ActionOutcome> {
        let payload = serde_json::json!({
            "run": { "id": run.id, "action": run.action },
            "discovered_file": {
                "id": file.id,
                "reference_code": file.reference_code,
                "original_file": file.original_file,
            },
            "type": edi_parser_code.or_else(|| job.edi_type.clone()),
            "job": {
                "id": job.id,
                "name": job.name,
                "create_missing_vendors": job.create_missing_vendors,
            },
        });

        let message = ShortTaskMessage::PaymentEdi(PaymentEdiMessage {
            run_id: run.id,
            discovered_file_id: file.id,
            payload,
        });
        self.queues
            .lane(QueueLane::ShortTasks)?
            .send_delayed(&message, PAYMENT_EDI_DELAY_SECS)
            .await?;

        info!("Payment file queued for EDI processing");
        Ok(ActionOutcome::Executed)
    }

    /// Local file if the run is still on this host, otherwise the stable
    /// copy from the artifact store
    async fn load_file_bytes(&self, file: &DiscoveredFile) -> Result<Vec<u8>> {
        if let Some(path) = &file.local_filepath {
            if let Ok(bytes) = tokio::fs::read(path).await {
                return Ok(bytes);
            }
            warn!(path = %path, "Local file is gone, falling back to the artifact store");
        }

        let reference = file.original_file.as_deref().ok_or_else(|| AppError::Validation {
            message: "Discovered file has neither a local path nor a stored artifact".to_string(),
            field: Some("original_file".to_string()),
        })?;
        let store = self.store.as_ref().ok_or_else(|| AppError::Configuration {
            message: "Artifact store is not configured".to_string(),
        })?;
        store.download(reference).await.map_err(WorkerError::from)
    }

    /// Resolve the owning entity for the invoice container. The job's
    /// location wins; otherwise a vendor-supplied identifier is translated
    /// through the job's mappings; the well-known fallback id catches the
    /// rest so the document is never dropped.
    async fn container_request(
        &self,
        file: &DiscoveredFile,
        job: &Job,
        upload_id: &str,
        filename: &str,
        is_edi: bool,
        edi_parser_code: Option<String>,
    ) -> Result<InvoiceContainerRequest> {
        let vendor_identifier = file
            .document_properties
            .get("restaurant_name")
            .or_else(|| file.document_properties.get("customer_number"))
            .and_then(|v| v.as_str());

        let mut restaurant = job.location_id;
        let mut restaurant_account = None;

        if restaurant.is_none() {
            if let Some(identifier) = vendor_identifier {
                match self.repo.get_piq_mapped_data(job.id, identifier).await? {
                    Some(mapped) => match mapped.parse::<i64>() {
                        Ok(id) => restaurant = Some(id),
                        Err(_) => restaurant_account = Some(mapped),
                    },
                    None => {
                        warn!(identifier, "No mapping found, using the fallback restaurant");
                        restaurant = Some(self.config.unknown_restaurant_id);
                    }
                }
            } else if job.location_group_id.is_none() {
                restaurant = Some(self.config.unknown_restaurant_id);
            }
        }

        Ok(InvoiceContainerRequest {
            restaurant,
            restaurant_account,
            restaurant_group: job.location_group_id,
            upload_id: upload_id.to_string(),
            image: filename.to_string(),
            contains_support_document: false,
            upload_through: "webedi".to_string(),
            is_edi,
            edi_parser_code,
            job: ContainerJob {
                id: job.id,
                name: job.name.clone(),
                create_missing_vendors: job.create_missing_vendors,
            },
        })
    }
}

fn content_type(file_format: &str) -> &'static str {
    match file_format {
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        "edi" | "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type("pdf"), "application/pdf");
        assert_eq!(content_type("csv"), "text/csv");
        assert_eq!(content_type("edi"), "text/plain");
        assert_eq!(content_type("zip"), "application/octet-stream");
    }
}
