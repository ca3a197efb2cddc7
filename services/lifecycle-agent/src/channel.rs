//! Notification channel: the queue lifecycle hook notifications arrive on.
//!
//! The channel delivers at least once. A delivery that is neither
//! acknowledged nor extended becomes visible again once its visibility
//! timeout lapses, which is what makes failed cycles retry.

use std::collections::HashMap;

use async_trait::async_trait;
use drainhook_events::{decode_notification, EventError, LifecycleEvent};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::aws::AwsCli;
use crate::command::CommandError;
use crate::config::Config;

/// A single message read from the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-assigned message ID (stable across redeliveries).
    pub message_id: String,

    /// Handle for acknowledging or extending this particular delivery.
    pub receipt_handle: String,

    /// Raw message body.
    pub body: String,

    /// How many times the channel has delivered this message, if known.
    pub receive_count: Option<u32>,
}

impl Delivery {
    /// Decode the body into a lifecycle event.
    pub fn decode(&self) -> Result<LifecycleEvent, EventError> {
        decode_notification(&self.body)
    }
}

/// Errors from channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("queue command failed: {0}")]
    Command(#[from] CommandError),

    #[error("unusable queue response: {0}")]
    Response(String),
}

/// Read/acknowledge/extend operations on the notification queue.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Read at most one message. `None` means the queue had nothing to deliver.
    async fn read(&self) -> Result<Option<Delivery>, ChannelError>;

    /// Permanently remove a delivered message.
    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), ChannelError>;

    /// Defer redelivery of a message that could not be handled yet.
    async fn extend_visibility(&self, delivery: &Delivery) -> Result<(), ChannelError>;
}

// =============================================================================
// Queue adapter
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageOutput {
    #[serde(default)]
    messages: Vec<QueueMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueueMessage {
    message_id: Option<String>,
    receipt_handle: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

/// Notification channel backed by an SQS queue via the `aws` CLI.
pub struct SqsChannel {
    cli: AwsCli,
    queue_url: String,
    receive_wait_secs: u32,
    visibility_extension_secs: u32,
}

impl SqsChannel {
    pub fn new(cli: AwsCli, queue_url: impl Into<String>) -> Self {
        Self {
            cli,
            queue_url: queue_url.into(),
            receive_wait_secs: 0,
            visibility_extension_secs: 60,
        }
    }

    pub fn from_config(cli: AwsCli, config: &Config) -> Self {
        Self {
            cli,
            queue_url: config.queue_url.clone(),
            receive_wait_secs: config.receive_wait_secs,
            visibility_extension_secs: config.visibility_extension_secs,
        }
    }

    pub fn with_visibility_extension(mut self, secs: u32) -> Self {
        self.visibility_extension_secs = secs;
        self
    }
}

#[async_trait]
impl NotificationChannel for SqsChannel {
    async fn read(&self) -> Result<Option<Delivery>, ChannelError> {
        let output: Option<ReceiveMessageOutput> = self
            .cli
            .call(
                "sqs",
                "receive-message",
                vec![
                    "--queue-url".to_string(),
                    self.queue_url.clone(),
                    "--max-number-of-messages".to_string(),
                    "1".to_string(),
                    "--wait-time-seconds".to_string(),
                    self.receive_wait_secs.to_string(),
                    "--attribute-names".to_string(),
                    "ApproximateReceiveCount".to_string(),
                ],
            )
            .await?;

        let Some(message) = output.and_then(|o| o.messages.into_iter().next()) else {
            return Ok(None);
        };

        let receipt_handle = message
            .receipt_handle
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ChannelError::Response("message has no receipt handle".to_string()))?;

        let delivery = Delivery {
            message_id: message.message_id.unwrap_or_default(),
            receipt_handle,
            body: message.body,
            receive_count: message
                .attributes
                .get("ApproximateReceiveCount")
                .and_then(|c| c.parse().ok()),
        };

        debug!(
            message_id = %delivery.message_id,
            receive_count = ?delivery.receive_count,
            "Received message"
        );

        Ok(Some(delivery))
    }

    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let _: Option<serde_json::Value> = self
            .cli
            .call(
                "sqs",
                "delete-message",
                vec![
                    "--queue-url".to_string(),
                    self.queue_url.clone(),
                    "--receipt-handle".to_string(),
                    delivery.receipt_handle.clone(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn extend_visibility(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let _: Option<serde_json::Value> = self
            .cli
            .call(
                "sqs",
                "change-message-visibility",
                vec![
                    "--queue-url".to_string(),
                    self.queue_url.clone(),
                    "--receipt-handle".to_string(),
                    delivery.receipt_handle.clone(),
                    "--visibility-timeout".to_string(),
                    self.visibility_extension_secs.to_string(),
                ],
            )
            .await?;
        Ok(())
    }
}
