//! Queue names, deliveries and acknowledgement.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::MessagingError;

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;

// ============================================================================
// Queue name
// ============================================================================

/// Validated queue name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create a queue name, rejecting names the broker would refuse.
    pub fn new(name: impl Into<String>) -> Result<Self, MessagingError> {
        let name = name.into();
        let invalid = |message: &str| MessagingError::InvalidQueueName {
            name: name.clone(),
            message: message.to_string(),
        };

        if name.is_empty() || name.len() > 255 {
            return Err(invalid("must be 1-255 bytes"));
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        {
            return Err(invalid(
                "only ASCII alphanumeric, hyphens, underscores, dots and colons allowed",
            ));
        }

        // Reserved for server-named queues.
        if name.starts_with("amq.") {
            return Err(invalid("the 'amq.' prefix is reserved"));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Acknowledgement
// ============================================================================

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Confirm the delivery was processed.
    async fn ack(&self) -> Result<(), MessagingError>;

    /// Reject the delivery, returning it to the queue when `requeue` is set.
    async fn nack(&self, requeue: bool) -> Result<(), MessagingError>;
}

// ============================================================================
// Delivery
// ============================================================================

/// A message received from a queue, pending acknowledgement.
///
/// Settling consumes the delivery, so it can be acked or nacked only once.
pub struct Delivery {
    tag: u64,
    body: Bytes,
    redelivered: bool,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(tag: u64, body: Bytes, redelivered: bool, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            tag,
            body,
            redelivered,
            acker,
        }
    }

    /// Broker-assigned delivery tag. Zero marks a closed channel.
    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// True when the broker delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, MessagingError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub async fn ack(self) -> Result<(), MessagingError> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<(), MessagingError> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.tag)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
