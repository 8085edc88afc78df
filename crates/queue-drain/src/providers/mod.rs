//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `QueueProvider`
//! trait for the supported backends.

pub mod aws;
pub mod memory;

pub use aws::AwsSqsProvider;
pub use memory::InMemoryProvider;
