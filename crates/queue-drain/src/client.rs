//! Client traits and implementations for queue operations.

use crate::chunk::chunk;
use crate::drain::{DrainEvent, DrainRequest, DrainSession};
use crate::error::QueueError;
use crate::message::{
    BatchEntry, BatchSendOutcome, MessageId, QueueHandle, QueueName, ReceiptHandle,
    ReceivedMessage, ReceiveOptions,
};
use crate::provider::{
    ClientSettings, InMemoryConfig, ProviderConfig, ProviderType, QueueConfig, SQS_MAX_WAIT_TIME,
};
use crate::providers::{AwsSqsProvider, InMemoryProvider};
use crate::retry::RetryPolicy;
use crate::role::Role;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Interface implemented by specific queue providers (AWS SQS, in-memory)
///
/// Every call addresses a queue by the URL the provider resolved for it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Look up the URL of an existing queue
    async fn resolve_queue_url(&self, name: &QueueName) -> Result<String, QueueError>;

    /// Create a queue (idempotent) and return its URL
    async fn create_queue(&self, name: &QueueName) -> Result<String, QueueError>;

    async fn delete_queue(&self, queue_url: &str) -> Result<(), QueueError>;

    /// URLs of all queues visible to the caller
    async fn list_queues(&self) -> Result<Vec<String>, QueueError>;

    /// Approximate number of visible messages
    async fn approximate_message_count(&self, queue_url: &str) -> Result<u64, QueueError>;

    /// One receive call, long-polling for up to `wait_time`
    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait_time: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    async fn send_message(&self, queue_url: &str, body: &str) -> Result<MessageId, QueueError>;

    /// One batch-send call; per-entry rejections are reported in the outcome
    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: &[BatchEntry],
    ) -> Result<BatchSendOutcome, QueueError>;

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError>;

    async fn purge_queue(&self, queue_url: &str) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Get maximum batch size
    fn max_batch_size(&self) -> usize;

    /// Get maximum message body size in bytes
    fn max_message_size(&self) -> usize;
}

/// Factory for creating queue clients with appropriate providers
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Build the provider selected by the configuration
    pub async fn create_provider(
        config: &ProviderConfig,
    ) -> Result<Arc<dyn QueueProvider>, QueueError> {
        let provider: Arc<dyn QueueProvider> = match config {
            ProviderConfig::AwsSqs(aws_config) => {
                Arc::new(AwsSqsProvider::from_config(aws_config).await)
            }
            ProviderConfig::InMemory(memory_config) => {
                Arc::new(InMemoryProvider::new(memory_config.clone()))
            }
        };
        Ok(provider)
    }

    /// Create queue client bound to an existing queue
    pub async fn create_client(
        config: QueueConfig,
        queue: QueueName,
    ) -> Result<QueueClient, QueueError> {
        config.validate()?;
        let provider = Self::create_provider(&config.provider).await?;
        QueueClient::connect(provider, queue, config.settings, config.role).await
    }

    /// Create the queue if needed, then a client bound to it
    pub async fn create_client_and_queue(
        config: QueueConfig,
        queue: QueueName,
    ) -> Result<QueueClient, QueueError> {
        config.validate()?;
        let provider = Self::create_provider(&config.provider).await?;
        QueueClient::create(provider, queue, config.settings, config.role).await
    }

    /// Create test client on a fresh in-memory provider
    pub async fn create_test_client(queue: QueueName) -> Result<QueueClient, QueueError> {
        let provider = Arc::new(InMemoryProvider::new(InMemoryConfig::default()));
        QueueClient::create(provider, queue, ClientSettings::default(), Role::ADMIN).await
    }
}

/// Wrapper bound to one queue.
///
/// Owns an immutable [`QueueHandle`] resolved at construction together with
/// the provider, operation settings and access role. Cloning is cheap and
/// every clone talks to the same queue.
#[derive(Clone)]
pub struct QueueClient {
    provider: Arc<dyn QueueProvider>,
    handle: Arc<QueueHandle>,
    settings: ClientSettings,
    role: Role,
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("queue", &self.handle)
            .field("provider", &self.provider.provider_type())
            .field("role", &self.role)
            .finish()
    }
}

impl QueueClient {
    /// Create a client for a queue whose URL is already known
    pub fn new(
        provider: Arc<dyn QueueProvider>,
        handle: QueueHandle,
        settings: ClientSettings,
        role: Role,
    ) -> Self {
        Self {
            provider,
            handle: Arc::new(handle),
            settings,
            role,
        }
    }

    /// Resolve `queue` by name and bind to it
    pub async fn connect(
        provider: Arc<dyn QueueProvider>,
        queue: QueueName,
        settings: ClientSettings,
        role: Role,
    ) -> Result<Self, QueueError> {
        let url = provider.resolve_queue_url(&queue).await?;
        info!(queue = %queue, queue_url = %url, "Connected to queue");
        Ok(Self::new(provider, QueueHandle::new(queue, url), settings, role))
    }

    /// Create `queue` with zero delay and one-day retention, then bind to it
    pub async fn create(
        provider: Arc<dyn QueueProvider>,
        queue: QueueName,
        settings: ClientSettings,
        role: Role,
    ) -> Result<Self, QueueError> {
        role.check(Role::CREATE, "create_queue")?;
        let url = provider.create_queue(&queue).await?;
        info!(queue = %queue, queue_url = %url, "Created queue");
        Ok(Self::new(provider, QueueHandle::new(queue, url), settings, role))
    }

    pub fn handle(&self) -> &QueueHandle {
        &self.handle
    }

    pub fn queue_name(&self) -> &QueueName {
        self.handle.name()
    }

    pub fn queue_url(&self) -> &str {
        self.handle.url()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }

    /// Receive options built from the client settings
    pub fn default_receive_options(&self) -> ReceiveOptions {
        ReceiveOptions::new()
            .with_max_messages(self.settings.receive_batch_size)
            .with_wait_time(self.settings.wait_time)
    }

    /// Approximate number of messages waiting in the queue
    pub async fn approximate_message_count(&self) -> Result<u64, QueueError> {
        self.role.check(Role::READ, "approximate_message_count")?;
        self.provider
            .approximate_message_count(self.handle.url())
            .await
    }

    /// Send one message, bounded by the configured send timeout
    #[instrument(skip(self, body), fields(queue = %self.handle.name(), size = body.len()))]
    pub async fn send_message(&self, body: &str) -> Result<MessageId, QueueError> {
        self.role.check(Role::CREATE, "send_message")?;

        if body.is_empty() {
            return Err(QueueError::invalid_argument(
                "body",
                "message body must not be empty",
            ));
        }
        let max_size = self.provider.max_message_size();
        if body.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: body.len(),
                max_size,
            });
        }

        let timeout = self.settings.send_timeout;
        let message_id =
            tokio::time::timeout(timeout, self.provider.send_message(self.handle.url(), body))
                .await
                .map_err(|_| QueueError::Timeout { duration: timeout })??;

        debug!(message_id = %message_id, "Message sent");
        Ok(message_id)
    }

    /// Send one message, retrying transient failures per `policy`
    pub async fn send_message_with_retry(
        &self,
        body: &str,
        policy: &RetryPolicy,
    ) -> Result<MessageId, QueueError> {
        policy.run("send_message", || self.send_message(body)).await
    }

    /// Send many messages in service-sized batches.
    ///
    /// Entry ids are the position in `bodies`. Stops at the first batch with
    /// rejected entries and reports [`QueueError::PartialBatchFailure`];
    /// messages accepted before that point stay in the queue. Returns the
    /// number of messages sent.
    #[instrument(skip(self, bodies), fields(queue = %self.handle.name(), count = bodies.len()))]
    pub async fn send_messages<S: AsRef<str>>(&self, bodies: &[S]) -> Result<usize, QueueError> {
        self.role.check(Role::CREATE, "send_messages")?;

        if let Some(index) = bodies.iter().position(|b| b.as_ref().is_empty()) {
            return Err(QueueError::invalid_argument(
                format!("bodies[{}]", index),
                "message body must not be empty",
            ));
        }

        let batch_size = self
            .settings
            .max_batch_size
            .min(self.provider.max_batch_size());
        let chunks = chunk(bodies, batch_size)?;

        let mut sent = 0;
        for (chunk_index, group) in chunks.into_iter().enumerate() {
            let offset = chunk_index * batch_size;
            let entries: Vec<BatchEntry> = group
                .iter()
                .enumerate()
                .map(|(i, body)| BatchEntry::new((offset + i).to_string(), body.as_ref()))
                .collect();

            let outcome = match self
                .provider
                .send_message_batch(self.handle.url(), &entries)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(chunk_index, sent, error = %e, "Batch send failed");
                    return Err(e);
                }
            };

            sent += outcome.successful.len();
            if !outcome.is_complete() {
                let failed = outcome
                    .failed
                    .into_iter()
                    .map(|mut failure| {
                        failure.index += offset;
                        failure
                    })
                    .collect::<Vec<_>>();
                warn!(
                    chunk_index,
                    sent,
                    failed = failed.len(),
                    "Batch partially rejected"
                );
                return Err(QueueError::PartialBatchFailure {
                    chunk_index,
                    sent,
                    failed,
                });
            }
        }

        debug!(sent, "Batch send complete");
        Ok(sent)
    }

    /// One receive call
    pub async fn receive_messages(
        &self,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.role.check(Role::READ, "receive_messages")?;
        if options.max_messages == 0 {
            return Err(QueueError::invalid_argument(
                "max_messages",
                "must be at least 1",
            ));
        }
        if options.wait_time > SQS_MAX_WAIT_TIME {
            return Err(QueueError::invalid_argument(
                "wait_time",
                format!("must not exceed {}s", SQS_MAX_WAIT_TIME.as_secs()),
            ));
        }

        self.provider
            .receive_messages(self.handle.url(), options.max_messages, options.wait_time)
            .await
    }

    /// Receive at most one message with the configured wait time
    pub async fn receive_message(&self) -> Result<Option<ReceivedMessage>, QueueError> {
        let options = self.default_receive_options().with_max_messages(1);
        Ok(self.receive_messages(&options).await?.into_iter().next())
    }

    /// Delete a received message.
    ///
    /// Deleting the same receipt twice is left to the service; SQS accepts it.
    pub async fn delete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.role.check(Role::DELETE, "delete_message")?;
        self.provider
            .delete_message(self.handle.url(), receipt)
            .await
    }

    /// Remove every message from the queue
    pub async fn purge(&self) -> Result<(), QueueError> {
        self.role.check(Role::DELETE, "purge_queue")?;
        self.provider.purge_queue(self.handle.url()).await?;
        info!(queue = %self.handle.name(), "Queue purged");
        Ok(())
    }

    /// URLs of every queue the provider can see
    pub async fn list_queues(&self) -> Result<Vec<String>, QueueError> {
        self.role.check(Role::READ, "list_queues")?;
        self.provider.list_queues().await
    }

    /// Resolve the URL of any queue by name
    pub async fn resolve_queue_url(&self, name: &QueueName) -> Result<String, QueueError> {
        self.role.check(Role::READ, "resolve_queue_url")?;
        self.provider.resolve_queue_url(name).await
    }

    /// Delete the bound queue.
    ///
    /// `name` must resolve to the same URL as this client's handle; anything
    /// else is rejected with [`QueueError::QueueNameMismatch`] before the
    /// queue is touched.
    pub async fn delete_queue(&self, name: &QueueName) -> Result<(), QueueError> {
        self.role.check(Role::DELETE, "delete_queue")?;

        let url = self.provider.resolve_queue_url(name).await?;
        if url != self.handle.url() {
            return Err(QueueError::QueueNameMismatch {
                requested: name.to_string(),
                expected_url: self.handle.url().to_string(),
                actual_url: url,
            });
        }

        self.provider.delete_queue(&url).await?;
        info!(queue = %name, queue_url = %url, "Queue deleted");
        Ok(())
    }

    /// Start a drain session with its own output channel
    pub fn drain(
        &self,
        request: DrainRequest,
    ) -> Result<(DrainSession, mpsc::Receiver<DrainEvent>), QueueError> {
        request.validate()?;
        let (tx, rx) = mpsc::channel(request.channel_capacity);
        let session = self.spawn_drain(tx, request)?;
        Ok((session, rx))
    }

    /// Start a drain session publishing into a caller-owned channel
    pub fn spawn_drain(
        &self,
        tx: mpsc::Sender<DrainEvent>,
        request: DrainRequest,
    ) -> Result<DrainSession, QueueError> {
        self.role.check(Role::READ, "drain")?;
        request.validate()?;
        Ok(DrainSession::spawn(
            Arc::clone(&self.provider),
            Arc::clone(&self.handle),
            request,
            tx,
        ))
    }
}
