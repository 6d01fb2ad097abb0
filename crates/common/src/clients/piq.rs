//! Client for the document-processing (PIQ) API
//!
//! Uploads go through a signed-URL handshake: request a signed upload slot,
//! PUT the file bytes against it, then register an invoice container that
//! references the upload.

use crate::config::DownstreamConfig;
use crate::errors::{AppError, Result};
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::time::Duration;
use uuid::Uuid;

/// A signed upload slot issued by the API
#[derive(Debug, Clone, Deserialize)]
pub struct SignedUpload {
    pub upload_id: String,
    pub url: String,
}

/// Job identity forwarded with each invoice container
#[derive(Debug, Clone, Serialize)]
pub struct ContainerJob {
    pub id: Uuid,
    pub name: String,
    pub create_missing_vendors: bool,
}

/// Invoice container registration payload
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceContainerRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restaurant: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restaurant_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restaurant_group: Option<i64>,
    pub upload_id: String,
    pub image: String,
    pub contains_support_document: bool,
    pub upload_through: String,
    pub is_edi: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edi_parser_code: Option<String>,
    pub job: ContainerJob,
}

#[derive(Debug, Deserialize)]
struct ContainerResponse {
    id: i64,
}

/// Stable upload filename derived from the file identity and fingerprint,
/// so retried uploads of the same content land on the same object
pub fn signed_filename(file_id: Uuid, content_hash: &str, extension: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{}-{}", file_id, content_hash).as_bytes());
    let digest = hex::encode(hasher.finalize());
    if extension.is_empty() {
        digest
    } else {
        format!("{}.{}", digest, extension.trim_start_matches('.'))
    }
}

/// Client for the document-processing API
#[derive(Clone)]
pub struct PiqClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    max_retries: u32,
}

impl PiqClient {
    pub fn new(config: &DownstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.piq_api_base.trim_end_matches('/').to_string(),
            token: config.piq_api_token.clone(),
            max_retries: config.max_retries,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Token {}", token)),
            None => request,
        }
    }

    /// Request a signed upload slot for the given filename
    pub async fn fetch_signed_upload(&self, filename: &str) -> Result<SignedUpload> {
        let url = format!("{}/api/v1/uploads/sign/", self.base_url);
        let response = self
            .authorized(self.client.post(&url))
            .json(&serde_json::json!({ "filename": filename }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                message: format!("Signed upload request failed ({}): {}", status, body),
            });
        }

        response.json::<SignedUpload>().await.map_err(Into::into)
    }

    /// PUT file bytes against a signed URL, retrying transient failures
    pub async fn upload_file(
        &self,
        signed_url: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(2))
            .with_multiplier(3.0)
            .with_max_elapsed_time(Some(Duration::from_secs(300)))
            .build();

        backoff::future::retry(policy, || {
            let bytes = bytes.clone();
            async move {
                let response = self
                    .client
                    .put(signed_url)
                    .header("Content-Type", content_type)
                    .body(bytes)
                    .send()
                    .await
                    .map_err(|e| backoff::Error::transient(AppError::from(e)))?;

                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else if status.is_server_error() {
                    Err(backoff::Error::transient(AppError::Upstream {
                        message: format!("Signed upload PUT failed ({})", status),
                    }))
                } else {
                    Err(backoff::Error::permanent(AppError::Upstream {
                        message: format!("Signed upload PUT rejected ({})", status),
                    }))
                }
            }
        })
        .await
    }

    /// Register an invoice container for a completed upload, returning the
    /// container ID
    pub async fn create_invoice_container(
        &self,
        request: &InvoiceContainerRequest,
    ) -> Result<i64> {
        let url = format!("{}/api/v1/invoice-containers/", self.base_url);

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let response = self
                .authorized(self.client.post(&url))
                .json(request)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                let container = response.json::<ContainerResponse>().await?;
                return Ok(container.id);
            }

            let body = response.text().await.unwrap_or_default();
            let error = AppError::Upstream {
                message: format!("Invoice container request failed ({}): {}", status, body),
            };
            if !status.is_server_error() {
                return Err(error);
            }
            last_error = Some(error);
            if attempt < self.max_retries {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }

        Err(last_error.unwrap_or(AppError::Upstream {
            message: "Invoice container request failed".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_filename_is_stable() {
        let id = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let first = signed_filename(id, "abc123", "pdf");
        let second = signed_filename(id, "abc123", "pdf");
        assert_eq!(first, second);
        assert!(first.ends_with(".pdf"));
    }

    #[test]
    fn test_signed_filename_varies_with_content() {
        let id = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        assert_ne!(
            signed_filename(id, "abc123", "pdf"),
            signed_filename(id, "def456", "pdf")
        );
    }

    #[test]
    fn test_signed_filename_without_extension() {
        let id = Uuid::new_v4();
        let name = signed_filename(id, "abc", "");
        assert_eq!(name.len(), 40);
        assert!(!name.contains('.'));
    }

    #[test]
    fn test_container_request_skips_absent_owners() {
        let request = InvoiceContainerRequest {
            restaurant: None,
            restaurant_account: Some("ACCT-9".to_string()),
            restaurant_group: None,
            upload_id: "up-1".to_string(),
            image: "img.pdf".to_string(),
            contains_support_document: false,
            upload_through: "webedi".to_string(),
            is_edi: false,
            edi_parser_code: None,
            job: ContainerJob {
                id: Uuid::new_v4(),
                name: "Job".to_string(),
                create_missing_vendors: true,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("restaurant").is_none());
        assert_eq!(json["restaurant_account"], "ACCT-9");
        assert_eq!(json["upload_through"], "webedi");
    }
}
