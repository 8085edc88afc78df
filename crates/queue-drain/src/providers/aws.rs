//! AWS SQS provider implementation using the AWS SDK.
//!
//! Credentials, region and retry behaviour of the SDK itself come from the
//! standard AWS configuration chain. [`AwsSqsConfig`] can override the
//! region and point the client at a custom endpoint such as LocalStack.
//!
//! ## Error mapping
//!
//! SDK failures are folded into [`QueueError`]:
//! - timeouts, dispatch failures, throttling and 5xx responses become
//!   [`QueueError::Transient`]
//! - missing queues become [`QueueError::QueueNotFound`]
//! - invalid receipts become [`QueueError::MessageNotFound`]
//! - credential problems become [`QueueError::AuthenticationFailed`]
//! - any other service error keeps its code in [`QueueError::ProviderError`]
//!
//! ## Example
//!
//! ```no_run
//! use queue_drain::{AwsSqsConfig, AwsSqsProvider};
//!
//! # async fn example() {
//! let provider = AwsSqsProvider::from_config(&AwsSqsConfig {
//!     region: Some("us-east-1".to_string()),
//!     endpoint_url: Some("http://localhost:4566".to_string()),
//! })
//! .await;
//! # }
//! ```

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{
    BatchEntry, BatchEntryFailure, BatchSendOutcome, MessageId, QueueName, ReceiptHandle,
    ReceivedMessage,
};
use crate::provider::{AwsSqsConfig, ProviderType, SQS_MAX_BATCH_SIZE};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::http::HttpResponse;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::{
    BatchResultErrorEntry, MessageSystemAttributeName, QueueAttributeName,
    SendMessageBatchRequestEntry, SendMessageBatchResultEntry,
};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

const NON_EXISTENT_QUEUE_CODES: &[&str] = &[
    "AWS.SimpleQueueService.NonExistentQueue",
    "QueueDoesNotExist",
];

const INVALID_RECEIPT_CODES: &[&str] = &["ReceiptHandleIsInvalid", "InvalidParameterValue"];

const AUTHENTICATION_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "ExpiredToken",
    "InvalidClientTokenId",
    "MissingAuthenticationToken",
    "SignatureDoesNotMatch",
    "UnrecognizedClientException",
];

const THROTTLING_CODES: &[&str] = &[
    "RequestThrottled",
    "ServiceUnavailable",
    "Throttling",
    "ThrottlingException",
    "InternalError",
    "KmsThrottled",
];

// ============================================================================
// Error Mapping
// ============================================================================

/// Map a service error code and HTTP status onto a [`QueueError`].
///
/// `resource` names what the call was about (queue name, queue URL or
/// receipt handle) and ends up in the not-found variants.
pub(crate) fn classify_service_error(
    operation: &'static str,
    resource: &str,
    code: Option<&str>,
    status: Option<u16>,
    message: String,
) -> QueueError {
    match code {
        Some(code) if NON_EXISTENT_QUEUE_CODES.contains(&code) => QueueError::QueueNotFound {
            queue_name: resource.to_string(),
        },
        Some(code) if operation == "delete_message" && INVALID_RECEIPT_CODES.contains(&code) => {
            QueueError::MessageNotFound {
                receipt: resource.to_string(),
            }
        }
        Some(code) if AUTHENTICATION_CODES.contains(&code) => {
            QueueError::AuthenticationFailed { message }
        }
        Some(code) if THROTTLING_CODES.contains(&code) => {
            QueueError::Transient { operation, message }
        }
        _ if matches!(status, Some(429) | Some(500..=599)) => {
            QueueError::Transient { operation, message }
        }
        Some(code) => QueueError::ProviderError {
            code: code.to_string(),
            message,
        },
        None => QueueError::ProviderError {
            code: "Unknown".to_string(),
            message,
        },
    }
}

fn map_sdk_error<E>(
    operation: &'static str,
    resource: &str,
    error: SdkError<E, HttpResponse>,
) -> QueueError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&error).to_string();
    match &error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            QueueError::Transient { operation, message }
        }
        SdkError::ServiceError(_) => classify_service_error(
            operation,
            resource,
            error.code(),
            error.raw_response().map(|r| r.status().as_u16()),
            message,
        ),
        _ => QueueError::ProviderError {
            code: "RequestConstruction".to_string(),
            message,
        },
    }
}

fn missing_field(operation: &'static str, field: &str) -> QueueError {
    QueueError::ProviderError {
        code: "MalformedResponse".to_string(),
        message: format!("{} response is missing {}", operation, field),
    }
}

// ============================================================================
// AwsSqsProvider
// ============================================================================

/// AWS SQS queue provider
#[derive(Clone)]
pub struct AwsSqsProvider {
    client: aws_sdk_sqs::Client,
}

impl AwsSqsProvider {
    /// Wrap an already configured SDK client
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        Self { client }
    }

    /// Build an SDK client from the default AWS configuration chain
    pub async fn from_config(config: &AwsSqsConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint_url) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let shared_config = loader.load().await;
        debug!(
            region = ?shared_config.region(),
            endpoint_url = ?config.endpoint_url,
            "Loaded AWS configuration"
        );

        Self::new(aws_sdk_sqs::Client::new(&shared_config))
    }

    fn convert_message(
        message: &aws_sdk_sqs::types::Message,
    ) -> Result<ReceivedMessage, QueueError> {
        let receipt_handle = message
            .receipt_handle()
            .ok_or_else(|| missing_field("receive_message", "ReceiptHandle"))?;
        let message_id = message
            .message_id()
            .ok_or_else(|| missing_field("receive_message", "MessageId"))?
            .parse::<MessageId>()?;

        let receive_count = message
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);

        Ok(ReceivedMessage {
            message_id,
            body: message.body().unwrap_or_default().to_string(),
            receipt_handle: ReceiptHandle::new(receipt_handle),
            receive_count,
            received_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for AwsSqsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSqsProvider").finish_non_exhaustive()
    }
}

/// Map a batch-send result back onto the request entries by entry id
fn batch_outcome(
    entries: &[BatchEntry],
    successful: &[SendMessageBatchResultEntry],
    failed: &[BatchResultErrorEntry],
) -> BatchSendOutcome {
    let mut outcome = BatchSendOutcome::default();

    // An accepted entry is queued whether or not its message id is usable
    for entry in successful {
        let message_id = match entry.message_id().parse() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(
                    entry_id = entry.id(),
                    error = %e,
                    "Accepted batch entry has no usable message id"
                );
                None
            }
        };
        outcome.successful.push((entry.id().to_string(), message_id));
    }

    for entry in failed {
        let Some(index) = entries.iter().position(|e| e.id == entry.id()) else {
            warn!(
                entry_id = entry.id(),
                code = entry.code(),
                "Dropping failure for an entry id not in the request"
            );
            continue;
        };
        warn!(
            entry_id = entry.id(),
            code = entry.code(),
            sender_fault = entry.sender_fault(),
            "Batch entry rejected"
        );
        outcome.failed.push(BatchEntryFailure {
            index,
            id: entry.id().to_string(),
            code: entry.code().to_string(),
            message: entry.message().map(str::to_string),
            sender_fault: entry.sender_fault(),
        });
    }

    outcome
}

#[async_trait]
impl QueueProvider for AwsSqsProvider {
    async fn resolve_queue_url(&self, name: &QueueName) -> Result<String, QueueError> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(name.as_str())
            .send()
            .await
            .map_err(|e| map_sdk_error("get_queue_url", name.as_str(), e))?;

        output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| missing_field("get_queue_url", "QueueUrl"))
    }

    async fn create_queue(&self, name: &QueueName) -> Result<String, QueueError> {
        let mut request = self
            .client
            .create_queue()
            .queue_name(name.as_str())
            .attributes(QueueAttributeName::DelaySeconds, "0")
            .attributes(QueueAttributeName::MessageRetentionPeriod, "86400");
        if name.is_fifo() {
            request = request.attributes(QueueAttributeName::FifoQueue, "true");
        }

        let output = request
            .send()
            .await
            .map_err(|e| map_sdk_error("create_queue", name.as_str(), e))?;

        output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| missing_field("create_queue", "QueueUrl"))
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), QueueError> {
        self.client
            .delete_queue()
            .queue_url(queue_url)
            .send()
            .await
            .map_err(|e| map_sdk_error("delete_queue", queue_url, e))?;
        Ok(())
    }

    async fn list_queues(&self) -> Result<Vec<String>, QueueError> {
        let mut urls = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.client.list_queues();
            if let Some(token) = &next_token {
                request = request.next_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|e| map_sdk_error("list_queues", "", e))?;
            urls.extend(output.queue_urls().iter().cloned());

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(urls)
    }

    async fn approximate_message_count(&self, queue_url: &str) -> Result<u64, QueueError> {
        let attribute = QueueAttributeName::ApproximateNumberOfMessages;
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(attribute.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error("get_queue_attributes", queue_url, e))?;

        let raw = output
            .attributes()
            .and_then(|attrs| attrs.get(&attribute))
            .ok_or_else(|| missing_field("get_queue_attributes", attribute.as_str()))?;

        raw.parse().map_err(|_| QueueError::ProviderError {
            code: "MalformedResponse".to_string(),
            message: format!("{} is not a number: {}", attribute.as_str(), raw),
        })
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait_time: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages as i32)
            .wait_time_seconds(wait_time.as_secs() as i32)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| map_sdk_error("receive_message", queue_url, e))?;

        output
            .messages()
            .iter()
            .map(Self::convert_message)
            .collect()
    }

    async fn send_message(&self, queue_url: &str, body: &str) -> Result<MessageId, QueueError> {
        let output = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| map_sdk_error("send_message", queue_url, e))?;

        Ok(output
            .message_id()
            .ok_or_else(|| missing_field("send_message", "MessageId"))?
            .parse()?)
    }

    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: &[BatchEntry],
    ) -> Result<BatchSendOutcome, QueueError> {
        if entries.len() > SQS_MAX_BATCH_SIZE {
            return Err(QueueError::BatchTooLarge {
                size: entries.len(),
                max_size: SQS_MAX_BATCH_SIZE,
            });
        }

        let request_entries = entries
            .iter()
            .map(|entry| {
                SendMessageBatchRequestEntry::builder()
                    .id(&entry.id)
                    .message_body(&entry.body)
                    .build()
                    .map_err(|e| QueueError::invalid_argument("entries", e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .send_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(request_entries))
            .send()
            .await
            .map_err(|e| map_sdk_error("send_message_batch", queue_url, e))?;

        Ok(batch_outcome(entries, output.successful(), output.failed()))
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt.as_str())
            .send()
            .await
            .map_err(|e| map_sdk_error("delete_message", receipt.as_str(), e))?;
        Ok(())
    }

    async fn purge_queue(&self, queue_url: &str) -> Result<(), QueueError> {
        self.client
            .purge_queue()
            .queue_url(queue_url)
            .send()
            .await
            .map_err(|e| map_sdk_error("purge_queue", queue_url, e))?;
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSqs
    }

    fn max_batch_size(&self) -> usize {
        self.provider_type().max_batch_size()
    }

    fn max_message_size(&self) -> usize {
        self.provider_type().max_message_size()
    }
}
