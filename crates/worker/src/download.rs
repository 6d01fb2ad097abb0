//! Per-file downloader abstraction
//!
//! Adapters hand the pipeline a downloader instead of bytes so the transport
//! (plain GET, click-to-download, FTP fetch) stays an adapter concern.

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use harvester_common::errors::{AppError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch the file and return its local path. An empty fetch is an error;
    /// zero-byte artifacts are never worth recording.
    async fn download(&self, dest_dir: &Path) -> Result<PathBuf>;
}

/// Plain HTTP GET downloader with retry on transient faults
pub struct UrlDownloader {
    client: reqwest::Client,
    url: String,
    filename: String,
}

impl UrlDownloader {
    pub fn new(client: reqwest::Client, url: String, filename: String) -> Self {
        Self {
            client,
            url,
            filename,
        }
    }
}

#[async_trait]
impl Downloader for UrlDownloader {
    async fn download(&self, dest_dir: &Path) -> Result<PathBuf> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(1))
            .with_max_elapsed_time(Some(Duration::from_secs(120)))
            .build();

        let bytes = backoff::future::retry(policy, || async {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(AppError::from(e)))?;

            let status = response.status();
            if status.is_server_error() {
                return Err(backoff::Error::transient(AppError::Upstream {
                    message: format!("Download failed ({}): {}", status, self.url),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(AppError::Upstream {
                    message: format!("Download rejected ({}): {}", status, self.url),
                }));
            }

            response
                .bytes()
                .await
                .map_err(|e| backoff::Error::transient(AppError::from(e)))
        })
        .await?;

        if bytes.is_empty() {
            return Err(AppError::Upstream {
                message: format!("Downloaded zero bytes from {}", self.url),
            });
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(&self.filename);
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        Ok(path)
    }
}

/// Downloader over bytes already in memory, for adapters that extract
/// content inline and for tests
pub struct StaticDownloader {
    filename: String,
    bytes: Vec<u8>,
}

impl StaticDownloader {
    pub fn new(filename: String, bytes: Vec<u8>) -> Self {
        Self { filename, bytes }
    }
}

#[async_trait]
impl Downloader for StaticDownloader {
    async fn download(&self, dest_dir: &Path) -> Result<PathBuf> {
        if self.bytes.is_empty() {
            return Err(AppError::Upstream {
                message: format!("Refusing to write zero bytes to {}", self.filename),
            });
        }
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(&self.filename);
        tokio::fs::write(&path, &self.bytes).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_downloader_writes_file() {
        let dir = std::env::temp_dir().join(format!("harvester-test-{}", uuid::Uuid::new_v4()));
        let downloader = StaticDownloader::new("inv.pdf".to_string(), b"content".to_vec());
        let path = downloader.download(&dir).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"content");
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_static_downloader_rejects_empty() {
        let dir = std::env::temp_dir();
        let downloader = StaticDownloader::new("empty.pdf".to_string(), Vec::new());
        assert!(downloader.download(&dir).await.is_err());
    }
}
