//! S3-backed stable storage for discovered-file artifacts

use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

/// Stable artifact storage. Local run files are ephemeral; every downloaded
/// file also gets copied here so actions can repopulate it later.
#[derive(Clone)]
pub struct ArtifactStore {
    client: S3Client,
    bucket: String,
}

impl ArtifactStore {
    /// Create a store from the ambient AWS configuration
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let bucket = config
            .artifact_bucket
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "artifact_bucket is not configured".to_string(),
            })?;

        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Ok(Self {
            client: S3Client::new(&aws_config),
            bucket,
        })
    }

    pub fn from_client(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Upload bytes under the given key, returning the stable reference
    pub async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| AppError::StorageError {
                message: format!("Failed to upload {}: {}", key, e),
            })?;

        Ok(format!("s3://{}/{}", self.bucket, key))
    }

    /// Fetch an artifact by its stable reference or bare key
    pub async fn download(&self, reference: &str) -> Result<Vec<u8>> {
        let key = self.key_from_reference(reference)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::StorageError {
                message: format!("Failed to fetch {}: {}", reference, e),
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| AppError::StorageError {
                message: format!("Failed to read {}: {}", reference, e),
            })?;

        Ok(bytes.into_bytes().to_vec())
    }

    fn key_from_reference<'a>(&self, reference: &'a str) -> Result<&'a str> {
        match reference.strip_prefix("s3://") {
            Some(rest) => {
                let (bucket, key) = rest.split_once('/').ok_or_else(|| AppError::StorageError {
                    message: format!("Malformed artifact reference: {}", reference),
                })?;
                if bucket != self.bucket {
                    return Err(AppError::StorageError {
                        message: format!("Artifact {} belongs to another bucket", reference),
                    });
                }
                Ok(key)
            }
            None => Ok(reference),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::Config;

    fn store() -> ArtifactStore {
        let config = Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .build();
        ArtifactStore::from_client(S3Client::from_conf(config), "artifacts".to_string())
    }

    #[test]
    fn test_key_from_bare_reference() {
        let store = store();
        assert_eq!(store.key_from_reference("runs/1/file.pdf").unwrap(), "runs/1/file.pdf");
    }

    #[test]
    fn test_key_from_s3_reference() {
        let store = store();
        assert_eq!(
            store.key_from_reference("s3://artifacts/runs/1/file.pdf").unwrap(),
            "runs/1/file.pdf"
        );
    }

    #[test]
    fn test_foreign_bucket_rejected() {
        let store = store();
        assert!(store.key_from_reference("s3://other/runs/1/file.pdf").is_err());
    }
}
