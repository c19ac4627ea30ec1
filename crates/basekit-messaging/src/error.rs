//! Error types for broker operations.

use thiserror::Error;

/// Errors raised by broker connections, channels and deliveries.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Invalid broker URL: {message}")]
    InvalidUrl { message: String },

    #[error("Unsupported broker scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("Invalid queue name '{name}': {message}")]
    InvalidQueueName { name: String, message: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Channel operation '{operation}' failed: {message}")]
    ChannelFailed { operation: String, message: String },

    #[error("Failed to publish to {queue}: {message}")]
    PublishFailed { queue: String, message: String },

    #[error("Failed to settle delivery {tag}: {message}")]
    SettleFailed { tag: u64, message: String },

    #[error("Connection or channel is closed")]
    Closed,

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MessagingError {
    pub(crate) fn channel(operation: &str, error: impl std::fmt::Display) -> Self {
        Self::ChannelFailed {
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }

    /// Check if the operation may succeed when retried on a fresh channel.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::ChannelFailed { .. } => true,
            Self::PublishFailed { .. } => true,
            Self::SettleFailed { .. } => false,
            Self::Closed => false,
            Self::InvalidUrl { .. } => false,
            Self::UnsupportedScheme { .. } => false,
            Self::InvalidQueueName { .. } => false,
            Self::Serialization(_) => false,
        }
    }
}
