//! # Queue Drain
//!
//! Convenience layer over a managed message queue (AWS SQS) with an
//! in-memory implementation for tests and local development.
//!
//! This library provides:
//! - A [`QueueClient`] wrapper bound to one immutable [`QueueHandle`]
//! - Batch sends split into service-sized chunks
//! - A cancellable background drain pipeline publishing [`DrainEvent`]s
//! - Retry policies with exponential backoff
//! - Role-based guards for producer / consumer / admin clients
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Queue names, handles and received messages
//! - [`provider`] - Provider types and configuration
//! - [`client`] - The provider trait and the `QueueClient` wrapper
//! - [`chunk`] - Fixed-size batch chunking
//! - [`drain`] - The drain pipeline
//! - [`retry`] - Backoff policy
//! - [`role`] - Access roles
//! - [`must`] - Panic-on-error helpers for scripts

// Module declarations
pub mod chunk;
pub mod client;
pub mod drain;
pub mod error;
pub mod message;
pub mod must;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod role;

// Re-export commonly used types at crate root for convenience
pub use chunk::chunk;
pub use client::{QueueClient, QueueClientFactory, QueueProvider};
pub use drain::{DrainEvent, DrainOutcome, DrainRequest, DrainSession};
pub use error::{ConfigurationError, QueueError, ValidationError};
pub use message::{
    BatchEntry, BatchEntryFailure, BatchSendOutcome, MessageId, QueueHandle, QueueName,
    ReceiptHandle, ReceivedMessage, ReceiveOptions,
};
pub use provider::{
    AwsSqsConfig, ClientSettings, InMemoryConfig, ProviderConfig, ProviderType, QueueConfig,
};
pub use providers::{AwsSqsProvider, InMemoryProvider};
pub use retry::RetryPolicy;
pub use role::Role;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
