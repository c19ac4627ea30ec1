//! Broker abstraction shared by the AMQP and in-memory implementations.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::MessagingError;
use crate::message::{Delivery, QueueName};

/// Stream of deliveries for one consumer. Closing the sender ends the stream.
pub type DeliveryStream = mpsc::Receiver<Delivery>;

/// A live connection to a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Broker kind used in logs (`amqp`, `memory`).
    fn kind(&self) -> &'static str;

    fn is_connected(&self) -> bool;

    /// Open a new channel multiplexed over this connection.
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, MessagingError>;

    /// Close the connection and every channel opened on it.
    async fn close(&self) -> Result<(), MessagingError>;
}

/// A channel on which queues are declared, published to and consumed from.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declare a durable queue, creating it if needed.
    async fn declare_queue(&self, queue: &QueueName) -> Result<(), MessagingError>;

    /// Limit unacknowledged deliveries in flight on this channel.
    async fn set_prefetch(&self, count: u16) -> Result<(), MessagingError>;

    /// Publish a persistent message to `queue` through the default exchange.
    async fn publish(&self, queue: &QueueName, body: Bytes) -> Result<(), MessagingError>;

    /// Start consuming `queue`.
    async fn consume(
        &self,
        queue: &QueueName,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, MessagingError>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<(), MessagingError>;
}
