//! Common test utilities for queue-drain integration tests
//!
//! This module provides:
//! - Builders for clients bound to fresh in-memory queues
//! - `ScriptedProvider`, an in-memory provider wrapper that records batch
//!   requests, rejects selected entries and fails scripted calls

use async_trait::async_trait;
use queue_drain::{
    BatchEntry, BatchEntryFailure, BatchSendOutcome, ClientSettings, InMemoryConfig,
    InMemoryProvider, MessageId, ProviderType, QueueClient, QueueError, QueueName, QueueProvider,
    ReceiptHandle, ReceivedMessage, Role,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Bodies starting with this prefix are rejected by [`ScriptedProvider`]
#[allow(dead_code)]
pub const REJECT_PREFIX: &str = "reject:";

#[allow(dead_code)]
pub fn queue_name(name: &str) -> QueueName {
    QueueName::new(name.to_string()).expect("valid queue name")
}

/// Client with the given role on a freshly created queue of `provider`
#[allow(dead_code)]
pub async fn client_on(
    provider: Arc<dyn QueueProvider>,
    name: &str,
    settings: ClientSettings,
    role: Role,
) -> QueueClient {
    QueueClient::create(provider, queue_name(name), settings, role)
        .await
        .expect("queue creation should succeed")
}

/// Admin client on a fresh in-memory provider
#[allow(dead_code)]
pub async fn in_memory_client(name: &str) -> QueueClient {
    client_on(
        Arc::new(InMemoryProvider::default()),
        name,
        ClientSettings::default(),
        Role::ADMIN,
    )
    .await
}

/// `n` distinct message bodies, `msg-00`, `msg-01`, ...
#[allow(dead_code)]
pub fn bodies(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("msg-{:02}", i)).collect()
}

// ============================================================================
// Scripted Provider
// ============================================================================

/// In-memory provider with scriptable failures
#[derive(Default)]
#[allow(dead_code)]
pub struct ScriptedProvider {
    inner: InMemoryProvider,
    batch_sizes: Mutex<Vec<usize>>,
    failing_receives: AtomicU32,
    failing_sends: AtomicU32,
}

#[allow(dead_code)]
impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            inner: InMemoryProvider::new(InMemoryConfig {
                visibility_timeout,
                ..InMemoryConfig::default()
            }),
            ..Self::default()
        }
    }

    /// Fail the next `n` receive calls with a transient error
    pub fn fail_next_receives(&self, n: u32) {
        self.failing_receives.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` single sends with a transient error
    pub fn fail_next_sends(&self, n: u32) {
        self.failing_sends.store(n, Ordering::SeqCst);
    }

    /// Entry counts of every batch request seen so far
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl QueueProvider for ScriptedProvider {
    async fn resolve_queue_url(&self, name: &QueueName) -> Result<String, QueueError> {
        self.inner.resolve_queue_url(name).await
    }

    async fn create_queue(&self, name: &QueueName) -> Result<String, QueueError> {
        self.inner.create_queue(name).await
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), QueueError> {
        self.inner.delete_queue(queue_url).await
    }

    async fn list_queues(&self) -> Result<Vec<String>, QueueError> {
        self.inner.list_queues().await
    }

    async fn approximate_message_count(&self, queue_url: &str) -> Result<u64, QueueError> {
        self.inner.approximate_message_count(queue_url).await
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait_time: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        if Self::take_failure(&self.failing_receives) {
            return Err(QueueError::Transient {
                operation: "receive_messages",
                message: "scripted receive failure".to_string(),
            });
        }
        self.inner
            .receive_messages(queue_url, max_messages, wait_time)
            .await
    }

    async fn send_message(&self, queue_url: &str, body: &str) -> Result<MessageId, QueueError> {
        if Self::take_failure(&self.failing_sends) {
            return Err(QueueError::Transient {
                operation: "send_message",
                message: "scripted send failure".to_string(),
            });
        }
        self.inner.send_message(queue_url, body).await
    }

    /// Rejects entries carrying [`REJECT_PREFIX`] and forwards the rest
    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: &[BatchEntry],
    ) -> Result<BatchSendOutcome, QueueError> {
        self.batch_sizes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(entries.len());

        let mut failed = Vec::new();
        let mut accepted = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            if entry.body.starts_with(REJECT_PREFIX) {
                failed.push(BatchEntryFailure {
                    index,
                    id: entry.id.clone(),
                    code: "InvalidMessageContents".to_string(),
                    message: Some("rejected by test".to_string()),
                    sender_fault: true,
                });
            } else {
                accepted.push(entry.clone());
            }
        }

        let successful = if accepted.is_empty() {
            Vec::new()
        } else {
            self.inner
                .send_message_batch(queue_url, &accepted)
                .await?
                .successful
        };

        Ok(BatchSendOutcome { successful, failed })
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        self.inner.delete_message(queue_url, receipt).await
    }

    async fn purge_queue(&self, queue_url: &str) -> Result<(), QueueError> {
        self.inner.purge_queue(queue_url).await
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size()
    }

    fn max_message_size(&self) -> usize {
        self.inner.max_message_size()
    }
}
