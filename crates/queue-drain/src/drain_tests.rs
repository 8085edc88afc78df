//! Tests for the drain pipeline.

use super::*;
use crate::client::MockQueueProvider;
use crate::message::{
    BatchEntry, BatchSendOutcome, MessageId, QueueName, ReceiptHandle, ReceivedMessage,
};
use crate::provider::ProviderType;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Test Helpers
// ============================================================================

fn handle() -> Arc<QueueHandle> {
    Arc::new(QueueHandle::new(
        QueueName::new("orders".to_string()).unwrap(),
        "memory://local/orders",
    ))
}

fn message(n: usize) -> ReceivedMessage {
    ReceivedMessage {
        message_id: MessageId::new(),
        body: format!("m{}", n),
        receipt_handle: ReceiptHandle::new(format!("r{}", n)),
        receive_count: 1,
        received_at: Utc::now(),
    }
}

fn transient() -> QueueError {
    QueueError::Transient {
        operation: "receive_message",
        message: "connection reset".to_string(),
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(10),
        Duration::from_millis(100),
        2.0,
    )
    .without_jitter()
}

fn start(
    provider: impl QueueProvider + 'static,
    request: DrainRequest,
) -> (DrainSession, mpsc::Receiver<DrainEvent>) {
    let (tx, rx) = mpsc::channel(request.channel_capacity);
    let session = DrainSession::spawn(Arc::new(provider), handle(), request, tx);
    (session, rx)
}

async fn collect(mut rx: mpsc::Receiver<DrainEvent>) -> Vec<DrainEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn delivered_bodies(events: &[DrainEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            DrainEvent::Delivered(m) => Some(m.body.clone()),
            _ => None,
        })
        .collect()
}

/// Provider whose receive call never returns
struct StalledProvider;

#[async_trait]
impl QueueProvider for StalledProvider {
    async fn resolve_queue_url(&self, _name: &QueueName) -> Result<String, QueueError> {
        unimplemented!()
    }

    async fn create_queue(&self, _name: &QueueName) -> Result<String, QueueError> {
        unimplemented!()
    }

    async fn delete_queue(&self, _queue_url: &str) -> Result<(), QueueError> {
        unimplemented!()
    }

    async fn list_queues(&self) -> Result<Vec<String>, QueueError> {
        unimplemented!()
    }

    async fn approximate_message_count(&self, _queue_url: &str) -> Result<u64, QueueError> {
        Ok(1)
    }

    async fn receive_messages(
        &self,
        _queue_url: &str,
        _max_messages: u32,
        _wait_time: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        std::future::pending().await
    }

    async fn send_message(&self, _queue_url: &str, _body: &str) -> Result<MessageId, QueueError> {
        unimplemented!()
    }

    async fn send_message_batch(
        &self,
        _queue_url: &str,
        _entries: &[BatchEntry],
    ) -> Result<BatchSendOutcome, QueueError> {
        unimplemented!()
    }

    async fn delete_message(
        &self,
        _queue_url: &str,
        _receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        unimplemented!()
    }

    async fn purge_queue(&self, _queue_url: &str) -> Result<(), QueueError> {
        unimplemented!()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn max_batch_size(&self) -> usize {
        10
    }

    fn max_message_size(&self) -> usize {
        256 * 1024
    }
}

// ============================================================================
// DrainRequest Tests
// ============================================================================

#[test]
fn test_request_defaults() {
    let request = DrainRequest::default();

    assert_eq!(request.max_messages, 0);
    assert_eq!(request.batch_size, 10);
    assert_eq!(request.wait_time, Duration::from_secs(2));
    assert!(request.validate().is_ok());
}

#[test]
fn test_request_validation() {
    assert!(DrainRequest::new().with_batch_size(0).validate().is_err());
    assert!(DrainRequest::new().with_batch_size(11).validate().is_err());
    assert!(DrainRequest::new()
        .with_channel_capacity(0)
        .validate()
        .is_err());
}

#[test]
fn test_request_wait_time_is_capped_at_long_poll_limit() {
    assert!(DrainRequest::new()
        .with_wait_time(Duration::from_secs(20))
        .validate()
        .is_ok());

    match DrainRequest::new()
        .with_wait_time(Duration::from_secs(21))
        .validate()
    {
        Err(QueueError::InvalidArgument { field, .. }) => assert_eq!(field, "wait_time"),
        other => panic!("Expected InvalidArgument, got {:?}", other),
    }
}

#[test]
fn test_batch_size_shrinks_near_quota() {
    let request = DrainRequest::new().with_max_messages(5).with_batch_size(3);

    assert_eq!(request.next_batch_size(0), 3);
    assert_eq!(request.next_batch_size(3), 2);
    assert_eq!(request.next_batch_size(4), 1);

    let unbounded = DrainRequest::new().with_batch_size(7);
    assert_eq!(unbounded.next_batch_size(1_000), 7);
}

// ============================================================================
// Stop Condition Tests
// ============================================================================

#[tokio::test]
async fn test_stops_at_quota_without_overdelivering() {
    let mut provider = MockQueueProvider::new();
    provider
        .expect_approximate_message_count()
        .returning(|_| Ok(100));
    // Always hands out four messages no matter how many were asked for
    let next = Arc::new(AtomicUsize::new(0));
    provider.expect_receive_messages().returning(move |_, _, _| {
        Ok((0..4)
            .map(|_| message(next.fetch_add(1, Ordering::SeqCst)))
            .collect())
    });

    let request = DrainRequest::new()
        .with_max_messages(5)
        .with_batch_size(3)
        .with_wait_time(Duration::ZERO);
    let (session, rx) = start(provider, request);

    let events = collect(rx).await;

    assert_eq!(delivered_bodies(&events), vec!["m0", "m1", "m2", "m3", "m4"]);
    assert!(matches!(
        events.last(),
        Some(DrainEvent::QuotaReached { delivered: 5 })
    ));
    assert_eq!(
        session.join().await.unwrap(),
        DrainOutcome::QuotaReached { delivered: 5 }
    );
}

#[tokio::test]
async fn test_stops_when_queue_reports_zero() {
    let mut provider = MockQueueProvider::new();
    let counts = AtomicUsize::new(0);
    provider
        .expect_approximate_message_count()
        .times(2)
        .returning(move |_| {
            Ok(if counts.fetch_add(1, Ordering::SeqCst) == 0 {
                2
            } else {
                0
            })
        });
    provider
        .expect_receive_messages()
        .times(1)
        .returning(|_, _, _| Ok(vec![message(0), message(1)]));

    let (session, rx) = start(provider, DrainRequest::new());
    let events = collect(rx).await;

    assert_eq!(delivered_bodies(&events), vec!["m0", "m1"]);
    assert_eq!(events.len(), 3);
    assert!(matches!(events[2], DrainEvent::Exhausted));
    assert!(events[2].is_terminal());
    assert_eq!(
        session.join().await.unwrap(),
        DrainOutcome::Exhausted { delivered: 2 }
    );
}

#[tokio::test]
async fn test_empty_queue_is_exhausted_without_receiving() {
    let mut provider = MockQueueProvider::new();
    provider
        .expect_approximate_message_count()
        .times(1)
        .returning(|_| Ok(0));
    provider.expect_receive_messages().never();

    let (session, rx) = start(provider, DrainRequest::new().with_max_messages(3));
    let events = collect(rx).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], DrainEvent::Exhausted));
    assert_eq!(
        session.join().await.unwrap(),
        DrainOutcome::Exhausted { delivered: 0 }
    );
}

// ============================================================================
// Failure Handling Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_repeated_failures_end_in_terminal_event() {
    let mut provider = MockQueueProvider::new();
    provider
        .expect_approximate_message_count()
        .times(3)
        .returning(|_| Err(transient()));
    provider.expect_receive_messages().never();

    let request = DrainRequest::new().with_retry_policy(fast_retry(2));
    let (session, rx) = start(provider, request);
    let events = collect(rx).await;

    let failures: Vec<(u32, bool)> = events
        .iter()
        .map(|e| match e {
            DrainEvent::Failed {
                consecutive_failures,
                terminal,
                ..
            } => (*consecutive_failures, *terminal),
            other => panic!("Expected only failures, got: {:?}", other),
        })
        .collect();
    assert_eq!(failures, vec![(1, false), (2, false), (3, true)]);
    assert_eq!(
        session.join().await.unwrap(),
        DrainOutcome::Failed { delivered: 0 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_counter() {
    let mut provider = MockQueueProvider::new();
    let counts = AtomicUsize::new(0);
    provider
        .expect_approximate_message_count()
        .returning(move |_| match counts.fetch_add(1, Ordering::SeqCst) {
            0 => Err(transient()),
            1..=4 => Ok(1),
            _ => Ok(0),
        });
    let receives = AtomicUsize::new(0);
    provider
        .expect_receive_messages()
        .returning(move |_, _, _| match receives.fetch_add(1, Ordering::SeqCst) {
            0 | 2 => Err(transient()),
            n => Ok(vec![message(n)]),
        });

    let request = DrainRequest::new().with_retry_policy(fast_retry(2));
    let (session, rx) = start(provider, request);
    let events = collect(rx).await;

    let failures: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            DrainEvent::Failed {
                consecutive_failures,
                terminal,
                ..
            } => {
                assert!(!terminal);
                Some(*consecutive_failures)
            }
            _ => None,
        })
        .collect();
    // A successful count alone keeps the streak; a successful receive ends it
    assert_eq!(failures, vec![1, 2, 1], "events: {:?}", events);
    assert_eq!(events.len(), 6, "events: {:?}", events);
    assert!(matches!(events[2], DrainEvent::Delivered(_)));
    assert!(matches!(events[4], DrainEvent::Delivered(_)));
    assert!(matches!(events[5], DrainEvent::Exhausted));
    assert_eq!(
        session.join().await.unwrap(),
        DrainOutcome::Exhausted { delivered: 2 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_receive_failures_after_successful_counts_become_terminal() {
    let mut provider = MockQueueProvider::new();
    provider
        .expect_approximate_message_count()
        .returning(|_| Ok(3));
    provider
        .expect_receive_messages()
        .times(3)
        .returning(|_, _, _| Err(transient()));

    let request = DrainRequest::new().with_retry_policy(fast_retry(2));
    let (session, rx) = start(provider, request);
    let events = tokio::time::timeout(Duration::from_secs(60), collect(rx))
        .await
        .expect("drain should give up instead of retrying forever");

    let streak: Vec<(u32, bool)> = events
        .iter()
        .map(|e| match e {
            DrainEvent::Failed {
                consecutive_failures,
                terminal,
                ..
            } => (*consecutive_failures, *terminal),
            other => panic!("Unexpected event {:?}", other),
        })
        .collect();
    assert_eq!(streak, vec![(1, false), (2, false), (3, true)]);
    assert_eq!(
        session.join().await.unwrap(),
        DrainOutcome::Failed { delivered: 0 }
    );
}

#[tokio::test]
async fn test_no_retry_policy_gives_up_on_first_failure() {
    let mut provider = MockQueueProvider::new();
    provider
        .expect_approximate_message_count()
        .returning(|_| Ok(4));
    provider
        .expect_receive_messages()
        .times(1)
        .returning(|_, _, _| {
            Err(QueueError::AuthenticationFailed {
                message: "expired".to_string(),
            })
        });

    let request = DrainRequest::new().with_retry_policy(RetryPolicy::no_retry());
    let (_session, rx) = start(provider, request);
    let events = collect(rx).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        DrainEvent::Failed {
            error: QueueError::AuthenticationFailed { .. },
            consecutive_failures: 1,
            terminal: true,
        } => {}
        other => panic!("Expected terminal failure, got: {:?}", other),
    }
}

// ============================================================================
// Cancellation and Consumer Tests
// ============================================================================

#[tokio::test]
async fn test_cancel_ends_blocked_receive() {
    let (session, mut rx) = start(StalledProvider, DrainRequest::new());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let outcome = tokio::time::timeout(Duration::from_secs(1), session.shutdown())
        .await
        .expect("drain did not stop after cancellation")
        .unwrap();

    assert_eq!(outcome, DrainOutcome::Cancelled { delivered: 0 });
    // Cancellation closes the channel without a terminal event
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_cancel_ends_backoff_sleep() {
    let mut provider = MockQueueProvider::new();
    provider
        .expect_approximate_message_count()
        .returning(|_| Err(transient()));

    let request = DrainRequest::new().with_retry_policy(
        RetryPolicy::new(5, Duration::from_secs(3600), Duration::from_secs(3600), 1.0)
            .without_jitter(),
    );
    let (session, mut rx) = start(provider, request);

    assert!(matches!(rx.recv().await, Some(DrainEvent::Failed { .. })));
    let outcome = tokio::time::timeout(Duration::from_secs(1), session.shutdown())
        .await
        .expect("drain did not stop after cancellation")
        .unwrap();

    assert_eq!(outcome, DrainOutcome::Cancelled { delivered: 0 });
}

#[tokio::test]
async fn test_cancel_ends_blocked_publish() {
    let mut provider = MockQueueProvider::new();
    provider
        .expect_approximate_message_count()
        .returning(|_| Ok(50));
    provider
        .expect_receive_messages()
        .returning(|_, _, _| Ok((0..10).map(message).collect()));

    // Nobody reads, so the second publish waits for capacity forever
    let (session, _rx) = start(provider, DrainRequest::new().with_channel_capacity(1));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let outcome = tokio::time::timeout(Duration::from_secs(1), session.shutdown())
        .await
        .expect("drain did not stop after cancellation")
        .unwrap();

    assert_eq!(outcome, DrainOutcome::Cancelled { delivered: 1 });
}

#[tokio::test]
async fn test_dropped_receiver_stops_producer() {
    let mut provider = MockQueueProvider::new();
    provider
        .expect_approximate_message_count()
        .returning(|_| Ok(50));
    provider
        .expect_receive_messages()
        .returning(|_, _, _| Ok((0..10).map(message).collect()));

    let (session, rx) = start(provider, DrainRequest::new());
    drop(rx);

    let outcome = tokio::time::timeout(Duration::from_secs(1), session.join())
        .await
        .expect("drain did not notice the dropped receiver")
        .unwrap();

    assert_eq!(outcome, DrainOutcome::ConsumerGone { delivered: 0 });
}

#[tokio::test]
async fn test_dropping_session_cancels_task() {
    let (session, rx) = start(StalledProvider, DrainRequest::new());
    let token = session.cancellation_token();

    drop(session);

    assert!(token.is_cancelled());
    let events = tokio::time::timeout(Duration::from_secs(1), collect(rx))
        .await
        .expect("channel was not closed");
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_detached_session_keeps_running() {
    let mut provider = MockQueueProvider::new();
    let counts = AtomicUsize::new(0);
    provider
        .expect_approximate_message_count()
        .returning(move |_| {
            Ok(if counts.fetch_add(1, Ordering::SeqCst) == 0 {
                1
            } else {
                0
            })
        });
    provider
        .expect_receive_messages()
        .returning(|_, _, _| Ok(vec![message(7)]));

    let (session, rx) = start(provider, DrainRequest::new());
    let token = session.cancellation_token();
    session.detach();

    let events = collect(rx).await;

    assert!(!token.is_cancelled());
    assert_eq!(delivered_bodies(&events), vec!["m7"]);
    assert!(matches!(events.last(), Some(DrainEvent::Exhausted)));
}
