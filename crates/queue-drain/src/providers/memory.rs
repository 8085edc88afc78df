//! In-memory queue provider implementation for testing and development.
//!
//! Behaves like a standard SQS queue as far as this crate can observe:
//! - Received messages stay invisible until deleted or until the visibility
//!   timeout lapses, after which they are delivered again
//! - Receives long-poll until a message arrives or the wait time runs out
//! - The approximate count only includes visible messages
//! - Deleting an already deleted message succeeds
//!
//! Time is measured with `tokio::time::Instant`, so tests running on a
//! paused clock can step through visibility timeouts deterministically.

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{
    BatchEntry, BatchEntryFailure, BatchSendOutcome, MessageId, QueueName, ReceiptHandle,
    ReceivedMessage,
};
use crate::provider::{InMemoryConfig, ProviderType, SQS_MAX_BATCH_SIZE};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// All queues, keyed by URL
#[derive(Default)]
struct QueueStorage {
    queues: HashMap<String, InMemoryQueue>,
}

impl QueueStorage {
    fn queue_mut(&mut self, queue_url: &str) -> Result<&mut InMemoryQueue, QueueError> {
        self.queues
            .get_mut(queue_url)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: queue_url.to_string(),
            })
    }
}

/// Internal queue state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    /// Visible messages in delivery order
    messages: VecDeque<StoredMessage>,
    /// Received but not yet deleted, keyed by receipt handle
    in_flight: HashMap<String, InFlightMessage>,
}

impl InMemoryQueue {
    /// Move messages whose visibility timeout has lapsed back to the queue
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(in_flight) = self.in_flight.remove(&receipt) {
                self.messages.push_back(in_flight.message);
            }
        }
    }

    /// Earliest moment an in-flight message becomes visible again
    fn next_visibility_change(&self) -> Option<Instant> {
        self.in_flight.values().map(|m| m.visible_at).min()
    }
}

#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: String,
    receive_count: u32,
}

struct InFlightMessage {
    message: StoredMessage,
    visible_at: Instant,
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider implementation
///
/// Cloning yields another handle onto the same queues.
#[derive(Clone)]
pub struct InMemoryProvider {
    storage: Arc<Mutex<QueueStorage>>,
    arrivals: Arc<Notify>,
    config: InMemoryConfig,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(Mutex::new(QueueStorage::default())),
            arrivals: Arc::new(Notify::new()),
            config,
        }
    }

    /// URL a queue of the given name gets from this provider
    pub fn queue_url(&self, name: &QueueName) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), name)
    }

    fn lock(&self) -> MutexGuard<'_, QueueStorage> {
        // Every critical section leaves the storage consistent, so a
        // poisoned lock still guards valid data.
        self.storage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_body(&self, body: &str) -> Result<(), QueueError> {
        if body.is_empty() {
            return Err(QueueError::invalid_argument(
                "body",
                "message body must not be empty",
            ));
        }
        if body.len() > self.config.max_message_size {
            return Err(QueueError::MessageTooLarge {
                size: body.len(),
                max_size: self.config.max_message_size,
            });
        }
        Ok(())
    }

    /// Take up to `max_messages` visible messages and mark them in flight.
    ///
    /// Returns the messages plus the next instant at which polling could
    /// yield something new.
    fn try_receive(
        &self,
        queue_url: &str,
        max_messages: usize,
    ) -> Result<(Vec<ReceivedMessage>, Option<Instant>), QueueError> {
        let now = Instant::now();
        let mut storage = self.lock();
        let queue = storage.queue_mut(queue_url)?;
        queue.release_expired(now);

        let mut received = Vec::new();
        while received.len() < max_messages {
            let Some(mut message) = queue.messages.pop_front() else {
                break;
            };
            message.receive_count += 1;

            let receipt = uuid::Uuid::new_v4().to_string();
            received.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                body: message.body.clone(),
                receipt_handle: ReceiptHandle::new(receipt.clone()),
                receive_count: message.receive_count,
                received_at: Utc::now(),
            });
            queue.in_flight.insert(
                receipt,
                InFlightMessage {
                    message,
                    visible_at: now + self.config.visibility_timeout,
                },
            );
        }

        Ok((received, queue.next_visibility_change()))
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl std::fmt::Debug for InMemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryProvider")
            .field("endpoint", &self.config.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn resolve_queue_url(&self, name: &QueueName) -> Result<String, QueueError> {
        let url = self.queue_url(name);
        if self.lock().queues.contains_key(&url) {
            Ok(url)
        } else {
            Err(QueueError::QueueNotFound {
                queue_name: name.to_string(),
            })
        }
    }

    async fn create_queue(&self, name: &QueueName) -> Result<String, QueueError> {
        let url = self.queue_url(name);
        self.lock().queues.entry(url.clone()).or_default();
        debug!(queue_url = %url, "Created in-memory queue");
        Ok(url)
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), QueueError> {
        self.lock()
            .queues
            .remove(queue_url)
            .map(|_| ())
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: queue_url.to_string(),
            })
    }

    async fn list_queues(&self) -> Result<Vec<String>, QueueError> {
        let mut urls: Vec<String> = self.lock().queues.keys().cloned().collect();
        urls.sort();
        Ok(urls)
    }

    async fn approximate_message_count(&self, queue_url: &str) -> Result<u64, QueueError> {
        let mut storage = self.lock();
        let queue = storage.queue_mut(queue_url)?;
        queue.release_expired(Instant::now());
        Ok(queue.messages.len() as u64)
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait_time: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        if max_messages == 0 || max_messages as usize > SQS_MAX_BATCH_SIZE {
            return Err(QueueError::invalid_argument(
                "max_messages",
                format!("must be between 1 and {}", SQS_MAX_BATCH_SIZE),
            ));
        }

        let deadline = Instant::now() + wait_time;
        loop {
            // Register interest before looking so a send in between is not missed
            let arrival = self.arrivals.notified();

            let (received, next_change) = self.try_receive(queue_url, max_messages as usize)?;
            if !received.is_empty() || Instant::now() >= deadline {
                return Ok(received);
            }

            let wake_at = next_change.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = arrival => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn send_message(&self, queue_url: &str, body: &str) -> Result<MessageId, QueueError> {
        self.check_body(body)?;

        let message_id = MessageId::new();
        {
            let mut storage = self.lock();
            storage.queue_mut(queue_url)?.messages.push_back(StoredMessage {
                message_id: message_id.clone(),
                body: body.to_string(),
                receive_count: 0,
            });
        }
        self.arrivals.notify_waiters();

        Ok(message_id)
    }

    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: &[BatchEntry],
    ) -> Result<BatchSendOutcome, QueueError> {
        if entries.is_empty() {
            return Err(QueueError::invalid_argument(
                "entries",
                "batch request must contain at least one entry",
            ));
        }
        if entries.len() > SQS_MAX_BATCH_SIZE {
            return Err(QueueError::BatchTooLarge {
                size: entries.len(),
                max_size: SQS_MAX_BATCH_SIZE,
            });
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = entries.iter().find(|e| !seen.insert(e.id.as_str())) {
            return Err(QueueError::invalid_argument(
                "entries",
                format!("entry id '{}' is not distinct", duplicate.id),
            ));
        }

        let mut outcome = BatchSendOutcome::default();
        {
            let mut storage = self.lock();
            let queue = storage.queue_mut(queue_url)?;

            for (index, entry) in entries.iter().enumerate() {
                match self.check_body(&entry.body) {
                    Ok(()) => {
                        let message_id = MessageId::new();
                        queue.messages.push_back(StoredMessage {
                            message_id: message_id.clone(),
                            body: entry.body.clone(),
                            receive_count: 0,
                        });
                        outcome.successful.push((entry.id.clone(), Some(message_id)));
                    }
                    Err(e) => outcome.failed.push(BatchEntryFailure {
                        index,
                        id: entry.id.clone(),
                        code: match e {
                            QueueError::MessageTooLarge { .. } => "MessageTooLong",
                            _ => "MissingParameter",
                        }
                        .to_string(),
                        message: Some(e.to_string()),
                        sender_fault: true,
                    }),
                }
            }
        }

        if !outcome.successful.is_empty() {
            self.arrivals.notify_waiters();
        }

        Ok(outcome)
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        if receipt.as_str().is_empty() {
            return Err(QueueError::MessageNotFound {
                receipt: String::new(),
            });
        }

        let mut storage = self.lock();
        let queue = storage.queue_mut(queue_url)?;
        if queue.in_flight.remove(receipt.as_str()).is_none() {
            debug!(receipt = %receipt, "Receipt already deleted or expired");
        }
        Ok(())
    }

    async fn purge_queue(&self, queue_url: &str) -> Result<(), QueueError> {
        let mut storage = self.lock();
        let queue = storage.queue_mut(queue_url)?;
        queue.messages.clear();
        queue.in_flight.clear();
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn max_batch_size(&self) -> usize {
        self.provider_type().max_batch_size()
    }

    fn max_message_size(&self) -> usize {
        self.config.max_message_size
    }
}
