//! # Drain Pipeline
//!
//! A background task that repeatedly receives from one queue and publishes
//! what it finds on a bounded channel until a stop condition is met.
//!
//! Each iteration:
//! 1. asks the queue for its approximate message count and stops with
//!    [`DrainEvent::Exhausted`] once it reports zero
//! 2. issues one receive call
//! 3. publishes every message as [`DrainEvent::Delivered`], stopping with
//!    [`DrainEvent::QuotaReached`] as soon as the requested number of
//!    messages has been delivered
//!
//! Failed count or receive calls are published as non-terminal
//! [`DrainEvent::Failed`] events and retried after a backoff delay. Once
//! more than `retry.max_attempts` calls fail in a row, a terminal `Failed`
//! event ends the session.
//!
//! The pipeline never deletes messages. The consumer deletes what it has
//! processed through [`QueueClient::delete_message`](crate::QueueClient::delete_message);
//! anything left undeleted becomes visible again after the queue's
//! visibility timeout.
//!
//! Every wait (remote calls, backoff sleeps and channel sends) is raced
//! against the session's cancellation token, so cancelling or dropping the
//! [`DrainSession`] ends the task promptly. Dropping the receiver ends it at
//! the next publish.

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{QueueHandle, ReceivedMessage};
use crate::provider::{SQS_MAX_BATCH_SIZE, SQS_MAX_WAIT_TIME};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "drain_tests.rs"]
mod tests;

// ============================================================================
// Request
// ============================================================================

/// Configuration for one drain session
#[derive(Debug, Clone, PartialEq)]
pub struct DrainRequest {
    /// Stop after this many deliveries; 0 drains until the queue is empty
    pub max_messages: usize,
    /// Messages requested per receive call
    pub batch_size: u32,
    /// Long-poll wait per receive call
    pub wait_time: Duration,
    /// Capacity of the output channel created by [`QueueClient::drain`](crate::QueueClient::drain)
    pub channel_capacity: usize,
    /// Backoff between failed calls and the consecutive-failure budget
    pub retry: RetryPolicy,
}

impl Default for DrainRequest {
    fn default() -> Self {
        Self {
            max_messages: 0,
            batch_size: SQS_MAX_BATCH_SIZE as u32,
            wait_time: Duration::from_secs(2),
            channel_capacity: 32,
            retry: RetryPolicy::default(),
        }
    }
}

impl DrainRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.batch_size == 0 || self.batch_size as usize > SQS_MAX_BATCH_SIZE {
            return Err(QueueError::invalid_argument(
                "batch_size",
                format!("must be between 1 and {}", SQS_MAX_BATCH_SIZE),
            ));
        }
        if self.wait_time > SQS_MAX_WAIT_TIME {
            return Err(QueueError::invalid_argument(
                "wait_time",
                format!("must not exceed {}s", SQS_MAX_WAIT_TIME.as_secs()),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(QueueError::invalid_argument(
                "channel_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Receive batch size, shrunk so the quota is never overshot
    fn next_batch_size(&self, delivered: usize) -> u32 {
        if self.max_messages == 0 {
            return self.batch_size;
        }
        let remaining = self.max_messages.saturating_sub(delivered);
        (remaining.min(self.batch_size as usize) as u32).max(1)
    }
}

// ============================================================================
// Events and Outcome
// ============================================================================

/// Event published on the drain output channel
#[derive(Debug)]
pub enum DrainEvent {
    /// A received message; delete it through the client once processed
    Delivered(ReceivedMessage),

    /// The queue reported no remaining messages
    Exhausted,

    /// The requested number of messages has been delivered
    QuotaReached { delivered: usize },

    /// A count or receive call failed
    Failed {
        error: QueueError,
        /// Failures in a row including this one
        consecutive_failures: u32,
        /// `true` when the session gives up after this event
        terminal: bool,
    },
}

impl DrainEvent {
    /// Whether this is the last event of the session
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Delivered(_) => false,
            Self::Exhausted => true,
            Self::QuotaReached { .. } => true,
            Self::Failed { terminal, .. } => *terminal,
        }
    }
}

/// Why a drain session ended, with the number of messages delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Exhausted { delivered: usize },
    QuotaReached { delivered: usize },
    Failed { delivered: usize },
    Cancelled { delivered: usize },
    ConsumerGone { delivered: usize },
}

impl DrainOutcome {
    pub fn delivered(&self) -> usize {
        match *self {
            Self::Exhausted { delivered }
            | Self::QuotaReached { delivered }
            | Self::Failed { delivered }
            | Self::Cancelled { delivered }
            | Self::ConsumerGone { delivered } => delivered,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Handle to a running drain task.
///
/// Dropping the session cancels the task. Use [`DrainSession::detach`] to
/// let it run on its own.
#[derive(Debug)]
pub struct DrainSession {
    cancel: CancellationToken,
    task: Option<JoinHandle<DrainOutcome>>,
}

impl DrainSession {
    pub(crate) fn spawn(
        provider: Arc<dyn QueueProvider>,
        handle: Arc<QueueHandle>,
        request: DrainRequest,
        tx: mpsc::Sender<DrainEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let drain = DrainLoop {
            provider,
            handle,
            request,
            tx,
            cancel: cancel.clone(),
            delivered: 0,
            consecutive_failures: 0,
        };

        Self {
            cancel,
            task: Some(tokio::spawn(drain.run())),
        }
    }

    /// Ask the task to stop; it closes the channel without a terminal event
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this session, e.g. to tie it to a parent shutdown
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the task to end on its own
    pub async fn join(mut self) -> Result<DrainOutcome, QueueError> {
        let Some(task) = self.task.as_mut() else {
            return Err(task_gone());
        };

        let result = task.await;
        self.task = None;

        result.map_err(|e| QueueError::ProviderError {
            code: "DrainTaskFailed".to_string(),
            message: e.to_string(),
        })
    }

    /// Cancel the task and wait for it to finish
    pub async fn shutdown(self) -> Result<DrainOutcome, QueueError> {
        self.cancel();
        self.join().await
    }

    /// Let the task run to completion without this handle
    pub fn detach(mut self) {
        self.task = None;
    }
}

impl Drop for DrainSession {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel.cancel();
        }
    }
}

fn task_gone() -> QueueError {
    QueueError::ProviderError {
        code: "DrainTaskFailed".to_string(),
        message: "drain task already joined".to_string(),
    }
}

// ============================================================================
// Loop
// ============================================================================

struct DrainLoop {
    provider: Arc<dyn QueueProvider>,
    handle: Arc<QueueHandle>,
    request: DrainRequest,
    tx: mpsc::Sender<DrainEvent>,
    cancel: CancellationToken,
    delivered: usize,
    consecutive_failures: u32,
}

impl DrainLoop {
    async fn run(mut self) -> DrainOutcome {
        info!(
            queue = %self.handle.name(),
            max_messages = self.request.max_messages,
            batch_size = self.request.batch_size,
            "Drain started"
        );

        let outcome = match self.drain().await {
            Ok(outcome) | Err(outcome) => outcome,
        };

        info!(
            queue = %self.handle.name(),
            outcome = ?outcome,
            delivered = self.delivered,
            "Drain stopped"
        );
        outcome
    }

    /// Runs until a stop condition; `Err` carries an early exit
    async fn drain(&mut self) -> Result<DrainOutcome, DrainOutcome> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled());
            }

            let count = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                count = self.provider.approximate_message_count(self.handle.url()) => count,
            };

            match count {
                Ok(0) => {
                    debug!(queue = %self.handle.name(), "Queue reports no messages");
                    self.publish(DrainEvent::Exhausted).await?;
                    return Ok(DrainOutcome::Exhausted {
                        delivered: self.delivered,
                    });
                }
                Ok(remaining) => {
                    debug!(queue = %self.handle.name(), remaining, "Polling queue");
                }
                Err(error) => {
                    self.fail(error).await?;
                    continue;
                }
            }

            let batch_size = self.request.next_batch_size(self.delivered);
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                received = self.provider.receive_messages(
                    self.handle.url(),
                    batch_size,
                    self.request.wait_time,
                ) => received,
            };

            let messages = match received {
                // Only a completed count + receive cycle clears the failure streak
                Ok(messages) => {
                    self.consecutive_failures = 0;
                    messages
                }
                Err(error) => {
                    self.fail(error).await?;
                    continue;
                }
            };
            debug!(received = messages.len(), "Receive call returned");

            for message in messages {
                self.publish(DrainEvent::Delivered(message)).await?;
                self.delivered += 1;

                if self.request.max_messages != 0 && self.delivered >= self.request.max_messages {
                    self.publish(DrainEvent::QuotaReached {
                        delivered: self.delivered,
                    })
                    .await?;
                    return Ok(DrainOutcome::QuotaReached {
                        delivered: self.delivered,
                    });
                }
            }
        }
    }

    /// Send one event, waiting for channel capacity
    async fn publish(&self, event: DrainEvent) -> Result<(), DrainOutcome> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled()),
            sent = self.tx.send(event) => sent.map_err(|_| {
                debug!(queue = %self.handle.name(), "Drain receiver dropped");
                DrainOutcome::ConsumerGone { delivered: self.delivered }
            }),
        }
    }

    /// Report a failed call and back off, or give up once the budget is spent
    async fn fail(&mut self, error: QueueError) -> Result<(), DrainOutcome> {
        self.consecutive_failures += 1;
        let failures = self.consecutive_failures;
        let terminal = !self.request.retry.should_retry(failures - 1);

        warn!(
            queue = %self.handle.name(),
            consecutive_failures = failures,
            terminal,
            error = %error,
            "Drain call failed"
        );

        self.publish(DrainEvent::Failed {
            error,
            consecutive_failures: failures,
            terminal,
        })
        .await?;

        if terminal {
            return Err(DrainOutcome::Failed {
                delivered: self.delivered,
            });
        }

        let delay = self.request.retry.calculate_delay(failures - 1);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled()),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn cancelled(&self) -> DrainOutcome {
        DrainOutcome::Cancelled {
            delivered: self.delivered,
        }
    }
}
