//! Client for the payment EDI step function

use crate::config::DownstreamConfig;
use crate::errors::{AppError, Result};
use backoff::ExponentialBackoffBuilder;
use std::time::Duration;

/// Client for the payment EDI step-function endpoint
#[derive(Clone)]
pub struct EdiClient {
    client: reqwest::Client,
    endpoint: String,
}

impl EdiClient {
    pub fn new(config: &DownstreamConfig) -> Result<Self> {
        let endpoint = config
            .edi_step_function_url
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "edi_step_function_url is not configured".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}process_payment", ensure_trailing_slash(&endpoint)),
        })
    }

    /// Submit a payment payload. Transport failures and server errors are
    /// retried with backoff, anything else at or above 300 is a hard failure.
    pub async fn process_payment(&self, payload: &serde_json::Value) -> Result<()> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(2))
            .with_multiplier(3.0)
            .with_max_elapsed_time(Some(Duration::from_secs(300)))
            .build();

        backoff::future::retry(policy, || async move {
            let response = self
                .client
                .post(&self.endpoint)
                .json(payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(AppError::from(e)))?;

            let status = response.status();
            if status.as_u16() < 300 {
                return Ok(());
            }

            let body = response.text().await.unwrap_or_default();
            let error = AppError::Upstream {
                message: format!("Payment EDI submission failed ({}): {}", status, body),
            };
            if status.is_server_error() {
                Err(backoff::Error::transient(error))
            } else {
                Err(backoff::Error::permanent(error))
            }
        })
        .await
    }
}

fn ensure_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_trailing_slash() {
        assert_eq!(ensure_trailing_slash("https://x/y"), "https://x/y/");
        assert_eq!(ensure_trailing_slash("https://x/y/"), "https://x/y/");
    }

    #[test]
    fn test_missing_endpoint_is_a_config_error() {
        let config = crate::config::AppConfig::default().downstream;
        let result = EdiClient::new(&config);
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }

    async fn read_request(stream: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let length = text
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + length {
                    return;
                }
            }
            if n == 0 {
                return;
            }
        }
    }

    /// One scripted reply per connection; `None` hangs up without
    /// responding so the caller sees a transport error.
    async fn scripted_endpoint(replies: Vec<Option<u16>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for reply in replies {
                let (mut stream, _) = listener.accept().await.unwrap();
                read_request(&mut stream).await;
                if let Some(status) = reply {
                    let response = format!(
                        "HTTP/1.1 {} \r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                        status
                    );
                    stream.write_all(response.as_bytes()).await.unwrap();
                }
            }
        });
        format!("http://{}/", addr)
    }

    fn client_for(endpoint: String) -> EdiClient {
        let mut config = crate::config::AppConfig::default().downstream;
        config.edi_step_function_url = Some(endpoint);
        EdiClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let endpoint = scripted_endpoint(vec![Some(500), Some(200)]).await;
        let client = client_for(endpoint);
        let result = client.process_payment(&serde_json::json!({"run": 1})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connection_drop_is_retried() {
        let endpoint = scripted_endpoint(vec![None, Some(200)]).await;
        let client = client_for(endpoint);
        let result = client.process_payment(&serde_json::json!({"run": 2})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let endpoint = scripted_endpoint(vec![Some(400)]).await;
        let client = client_for(endpoint);
        let result = client.process_payment(&serde_json::json!({"run": 3})).await;
        assert!(matches!(result, Err(AppError::Upstream { .. })));
    }
}
