//! Panic-on-error variants of the common client operations.
//!
//! Meant for scripts and tests where a failed queue call should abort the
//! program. Each helper panics with the error's display text.

use crate::client::QueueClient;
use crate::error::QueueError;
use crate::message::{MessageId, ReceiptHandle};
use crate::retry::RetryPolicy;

#[cfg(test)]
#[path = "must_tests.rs"]
mod tests;

fn must<T>(operation: &str, result: Result<T, QueueError>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{} failed: {}", operation, e),
    }
}

impl QueueClient {
    pub async fn must_send_message(&self, body: &str) -> MessageId {
        must("send_message", self.send_message(body).await)
    }

    pub async fn must_send_message_with_retry(
        &self,
        body: &str,
        policy: &RetryPolicy,
    ) -> MessageId {
        must(
            "send_message_with_retry",
            self.send_message_with_retry(body, policy).await,
        )
    }

    /// Bodies of one receive call with the client's default options
    pub async fn must_receive_bodies(&self) -> Vec<String> {
        let options = self.default_receive_options();
        must("receive_messages", self.receive_messages(&options).await)
            .into_iter()
            .map(|m| m.body)
            .collect()
    }

    /// Body of exactly one message; panics when the queue yields none
    pub async fn must_receive_body(&self) -> String {
        match must("receive_message", self.receive_message().await) {
            Some(message) => message.body,
            None => panic!("receive_message failed: no message available"),
        }
    }

    pub async fn must_delete_message(&self, receipt: &ReceiptHandle) {
        must("delete_message", self.delete_message(receipt).await)
    }

    pub async fn must_approximate_message_count(&self) -> u64 {
        must(
            "approximate_message_count",
            self.approximate_message_count().await,
        )
    }
}
