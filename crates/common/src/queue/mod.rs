//! SQS queue utilities for run dispatch and notifications

use crate::config::QueueConfig;
use crate::errors::{AppError, Result};
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three dispatch lanes, with distinct wall-clock limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLane {
    /// Scheduled runs
    Tasks,
    /// Maintenance work and notifications
    ShortTasks,
    /// User-initiated runs
    OnDemand,
}

impl QueueLane {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueLane::Tasks => "tasks",
            QueueLane::ShortTasks => "short-tasks",
            QueueLane::OnDemand => "tasks-on-demand",
        }
    }

    /// Wall-clock limit for work consumed from this lane
    pub fn time_limit_secs(&self, config: &QueueConfig) -> u64 {
        match self {
            QueueLane::Tasks => config.task_time_limit_secs,
            QueueLane::ShortTasks => config.short_task_time_limit_secs,
            QueueLane::OnDemand => config.on_demand_time_limit_secs,
        }
    }
}

/// A run handed to the worker fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTaskMessage {
    pub run_id: Uuid,
    pub lane: String,
}

/// A rendered notification email for the short-tasks lane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub job_id: Uuid,
    pub template: String,
    pub subject: String,
    pub body: String,
}

/// Work items carried on the short-tasks lane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShortTaskMessage {
    /// Re-run the post-discovery action for a file that never finished
    FileAction { discovered_file_id: Uuid },
    /// Sweep local temp files for terminal runs on the worker host
    DeleteRunFiles { older_than_minutes: i64 },
    /// Deliver a rendered notification email
    Email(EmailMessage),
    /// Hand a payment file to the EDI step function
    PaymentEdi(PaymentEdiMessage),
}

/// A payment file handed to the EDI step function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEdiMessage {
    pub run_id: Uuid,
    pub discovered_file_id: Uuid,
    pub payload: serde_json::Value,
}

/// SQS queue wrapper
#[derive(Clone)]
pub struct Queue {
    client: SqsClient,
    queue_url: String,
}

impl Queue {
    /// Create a new queue client from the ambient AWS configuration
    pub async fn new(queue_url: String) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);
        Self { client, queue_url }
    }

    /// Create a queue from an existing client
    pub fn from_client(client: SqsClient, queue_url: String) -> Self {
        Self { client, queue_url }
    }

    /// Queue URL this client sends to
    pub fn url(&self) -> &str {
        &self.queue_url
    }

    /// Send a message to the queue, returning the SQS message ID
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<String> {
        self.send_with_delay(message, None).await
    }

    /// Send a message with a delivery delay in seconds
    pub async fn send_delayed<T: Serialize>(&self, message: &T, delay_secs: i32) -> Result<String> {
        self.send_with_delay(message, Some(delay_secs)).await
    }

    async fn send_with_delay<T: Serialize>(
        &self,
        message: &T,
        delay_secs: Option<i32>,
    ) -> Result<String> {
        let body = serde_json::to_string(message)?;

        let mut request = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body);
        if let Some(delay) = delay_secs {
            request = request.delay_seconds(delay);
        }

        let output = request.send().await.map_err(|e| AppError::QueueError {
            message: format!("Failed to send message: {}", e),
        })?;

        output.message_id().map(String::from).ok_or_else(|| AppError::QueueError {
            message: "SQS returned no message ID".to_string(),
        })
    }

    /// Receive messages with long polling
    pub async fn receive(
        &self,
        max_messages: i32,
        wait_time_secs: i32,
        visibility_timeout_secs: i32,
    ) -> Result<Vec<Message>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_time_secs)
            .visibility_timeout(visibility_timeout_secs)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        Ok(output.messages.unwrap_or_default())
    }

    /// Delete a message after successful processing
    pub async fn delete_message(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;
        Ok(())
    }

    /// Extend a message's visibility timeout for long-running work
    pub async fn extend_visibility(&self, receipt_handle: &str, timeout_secs: i32) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(timeout_secs)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to extend visibility: {}", e),
            })?;
        Ok(())
    }

    /// Deserialize a message body
    pub fn parse_message<T: DeserializeOwned>(message: &Message) -> Result<T> {
        let body = message.body().ok_or_else(|| AppError::QueueError {
            message: "Message has no body".to_string(),
        })?;
        serde_json::from_str(body).map_err(Into::into)
    }
}

/// All dispatch lanes resolved from configuration
#[derive(Clone)]
pub struct QueueSet {
    pub tasks: Option<Queue>,
    pub short_tasks: Option<Queue>,
    pub on_demand: Option<Queue>,
    pub batch: Option<Queue>,
}

impl QueueSet {
    /// Build queue clients for every configured lane
    pub async fn from_config(config: &QueueConfig) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);

        let make = |url: &Option<String>| {
            url.as_ref()
                .map(|u| Queue::from_client(client.clone(), u.clone()))
        };

        Self {
            tasks: make(&config.tasks_queue_url),
            short_tasks: make(&config.short_tasks_queue_url),
            on_demand: make(&config.on_demand_queue_url),
            batch: make(&config.batch_queue_url),
        }
    }

    /// Queue for a dispatch lane, erroring when the lane is not configured
    pub fn lane(&self, lane: QueueLane) -> Result<&Queue> {
        let queue = match lane {
            QueueLane::Tasks => self.tasks.as_ref(),
            QueueLane::ShortTasks => self.short_tasks.as_ref(),
            QueueLane::OnDemand => self.on_demand.as_ref(),
        };
        queue.ok_or_else(|| AppError::QueueError {
            message: format!("Queue lane {} is not configured", lane.as_str()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_names() {
        assert_eq!(QueueLane::Tasks.as_str(), "tasks");
        assert_eq!(QueueLane::ShortTasks.as_str(), "short-tasks");
        assert_eq!(QueueLane::OnDemand.as_str(), "tasks-on-demand");
    }

    #[test]
    fn test_lane_time_limits() {
        let config = crate::config::AppConfig::default().queue;
        assert_eq!(QueueLane::Tasks.time_limit_secs(&config), 5400);
        assert_eq!(QueueLane::ShortTasks.time_limit_secs(&config), 900);
        assert_eq!(QueueLane::OnDemand.time_limit_secs(&config), 3600);
    }

    #[test]
    fn test_run_task_message_roundtrip() {
        let message = RunTaskMessage {
            run_id: Uuid::new_v4(),
            lane: QueueLane::OnDemand.as_str().to_string(),
        };
        let json = serde_json::to_string(&message).unwrap();
        let parsed: RunTaskMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.run_id, message.run_id);
        assert_eq!(parsed.lane, "tasks-on-demand");
    }
}
