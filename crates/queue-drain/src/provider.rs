//! Provider types and configuration.

use crate::error::ConfigurationError;
use crate::retry::{duration_millis, RetryPolicy};
use crate::role::Role;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// SQS rejects bodies above 256 KiB
pub const SQS_MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// SQS accepts at most 10 entries per batch request
pub const SQS_MAX_BATCH_SIZE: usize = 10;

/// SQS caps long polling at 20 seconds
pub const SQS_MAX_WAIT_TIME: Duration = Duration::from_secs(20);

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    AwsSqs,
    InMemory,
}

impl ProviderType {
    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AwsSqs => SQS_MAX_MESSAGE_SIZE,
            Self::InMemory => SQS_MAX_MESSAGE_SIZE,
        }
    }

    /// Get maximum entries per batch request
    pub fn max_batch_size(&self) -> usize {
        match self {
            Self::AwsSqs => SQS_MAX_BATCH_SIZE,
            Self::InMemory => SQS_MAX_BATCH_SIZE,
        }
    }
}

/// Configuration for queue client initialization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub provider: ProviderConfig,
    pub settings: ClientSettings,
    pub role: Role,
}

impl QueueConfig {
    /// Reject settings the service would refuse anyway
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.settings.validate()
    }
}

/// Per-client operation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Messages requested per receive call
    pub receive_batch_size: u32,

    /// Long-poll wait for receive calls
    #[serde(with = "duration_millis", rename = "wait_time_ms")]
    pub wait_time: Duration,

    /// Upper bound for a single send call
    #[serde(with = "duration_millis", rename = "send_timeout_ms")]
    pub send_timeout: Duration,

    /// Entries per batch-send request
    pub max_batch_size: usize,

    /// Backoff used by retrying sends and by the drain pipeline
    pub retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            receive_batch_size: 10,
            wait_time: Duration::from_secs(2),
            send_timeout: Duration::from_secs(60),
            max_batch_size: SQS_MAX_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.receive_batch_size == 0 || self.receive_batch_size as usize > SQS_MAX_BATCH_SIZE {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "receive_batch_size must be between 1 and {}, got {}",
                    SQS_MAX_BATCH_SIZE, self.receive_batch_size
                ),
            });
        }

        if self.max_batch_size == 0 || self.max_batch_size > SQS_MAX_BATCH_SIZE {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "max_batch_size must be between 1 and {}, got {}",
                    SQS_MAX_BATCH_SIZE, self.max_batch_size
                ),
            });
        }

        if self.wait_time > SQS_MAX_WAIT_TIME {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "wait_time must not exceed {}s, got {:?}",
                    SQS_MAX_WAIT_TIME.as_secs(),
                    self.wait_time
                ),
            });
        }

        if self.send_timeout.is_zero() {
            return Err(ConfigurationError::Invalid {
                message: "send_timeout must be positive".to_string(),
            });
        }

        Ok(())
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    AwsSqs(AwsSqsConfig),
    InMemory(InMemoryConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::AwsSqs(AwsSqsConfig::default())
    }
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::AwsSqs(_) => ProviderType::AwsSqs,
            Self::InMemory(_) => ProviderType::InMemory,
        }
    }
}

/// AWS SQS configuration
///
/// Credentials always come from the AWS default provider chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSqsConfig {
    /// Overrides the region from the environment / profile
    pub region: Option<String>,
    /// Custom endpoint, e.g. LocalStack
    pub endpoint_url: Option<String>,
}

/// In-memory provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// Prefix for generated queue URLs
    pub endpoint: String,
    pub max_message_size: usize,
    /// How long a received message stays hidden before it is redelivered
    #[serde(with = "duration_millis", rename = "visibility_timeout_ms")]
    pub visibility_timeout: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            endpoint: "memory://local".to_string(),
            max_message_size: ProviderType::InMemory.max_message_size(),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
