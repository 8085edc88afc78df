//! Error types for queue operations.

use crate::message::BatchEntryFailure;
use crate::role::Role;
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Transient failure during {operation}: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },

    #[error("Invalid argument '{field}': {message}")]
    InvalidArgument { field: String, message: String },

    #[error(
        "Batch {chunk_index} partially failed: {} entries rejected, {sent} accepted so far",
        failed.len()
    )]
    PartialBatchFailure {
        chunk_index: usize,
        sent: usize,
        failed: Vec<BatchEntryFailure>,
    },

    #[error("Queue '{requested}' resolves to {actual_url}, but this client is bound to {expected_url}")]
    QueueNameMismatch {
        requested: String,
        expected_url: String,
        actual_url: String,
    },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message not found or receipt invalid: {receipt}")]
    MessageNotFound { receipt: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Batch size {size} exceeds maximum {max_size}")]
    BatchTooLarge { size: usize, max_size: usize },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Role '{role}' is not allowed to perform {operation} (requires '{required}')")]
    RoleViolation {
        role: Role,
        required: Role,
        operation: &'static str,
    },

    #[error("Provider error ({code}): {message}")]
    ProviderError { code: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl QueueError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient { .. } => true,
            Self::Timeout { .. } => true,
            Self::InvalidArgument { .. } => false,
            Self::PartialBatchFailure { .. } => false,
            Self::QueueNameMismatch { .. } => false,
            Self::QueueNotFound { .. } => false,
            Self::MessageNotFound { .. } => false,
            Self::MessageTooLarge { .. } => false,
            Self::BatchTooLarge { .. } => false,
            Self::AuthenticationFailed { .. } => false,
            Self::RoleViolation { .. } => false,
            Self::ProviderError { .. } => false,
            Self::Configuration(_) => false,
            Self::Validation(_) => false,
        }
    }

    /// Check if error should be retried
    pub fn should_retry(&self) -> bool {
        self.is_transient()
    }

    /// Shorthand for an [`QueueError::InvalidArgument`]
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
