//! Connection, producer and consumer resources.
//!
//! A [`Connection`] is opened once per process. The [`Producer`] and
//! [`Consumer`] each open their own channel on it and are closed before the
//! connection at shutdown.

use async_trait::async_trait;
use basekit_core::{Close, CloseError, Closer};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::amqp::AmqpBroker;
use crate::broker::{Broker, Channel, DeliveryStream};
use crate::error::MessagingError;
use crate::memory::MemoryBroker;
use crate::message::QueueName;

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;

fn close_error(error: MessagingError) -> CloseError {
    match error {
        MessagingError::Closed => CloseError::AlreadyClosed,
        other => CloseError::failed(other),
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Shared broker connection.
#[derive(Clone)]
pub struct Connection {
    broker: Arc<dyn Broker>,
    endpoint: String,
}

impl Connection {
    /// Open a connection, selecting the broker by URL scheme.
    ///
    /// `amqp://` and `amqps://` connect to an AMQP broker; `memory://` creates
    /// a process-local broker.
    pub async fn open(url: &str) -> Result<Self, MessagingError> {
        let parsed = url::Url::parse(url).map_err(|e| MessagingError::InvalidUrl {
            message: e.to_string(),
        })?;
        let endpoint = redact(&parsed);

        let broker: Arc<dyn Broker> = match parsed.scheme() {
            "amqp" | "amqps" => Arc::new(AmqpBroker::connect(url).await?),
            "memory" => Arc::new(MemoryBroker::new()),
            other => {
                return Err(MessagingError::UnsupportedScheme {
                    scheme: other.to_string(),
                })
            }
        };

        info!(endpoint = %endpoint, kind = broker.kind(), "Broker connection opened");
        Ok(Self { broker, endpoint })
    }

    /// Wrap an existing broker.
    pub fn from_broker(broker: Arc<dyn Broker>) -> Self {
        let endpoint = format!("{}://", broker.kind());
        Self { broker, endpoint }
    }

    /// Broker URL with credentials removed.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    /// Open a producer publishing to `queue` on a new channel.
    pub async fn producer(&self, queue: QueueName) -> Result<Producer, MessagingError> {
        let channel = self.broker.open_channel().await?;
        channel.declare_queue(&queue).await?;
        debug!(queue = %queue, "Producer ready");
        Ok(Producer { channel, queue })
    }

    /// Open a consumer reading from `queue` on a new channel.
    pub async fn consumer(&self, queue: QueueName, prefetch: u16) -> Result<Consumer, MessagingError> {
        let channel = self.broker.open_channel().await?;
        channel.declare_queue(&queue).await?;
        channel.set_prefetch(prefetch).await?;
        debug!(queue = %queue, prefetch, "Consumer ready");
        Ok(Consumer {
            channel,
            queue,
            tag: format!("basekit-{}", uuid::Uuid::new_v4()),
        })
    }

    /// Teardown action closing this connection.
    pub fn closer(&self) -> Closer {
        Closer::new("broker-connection", Arc::new(self.clone()))
    }
}

#[async_trait]
impl Close for Connection {
    async fn close(&self) -> Result<(), CloseError> {
        self.broker.close().await.map_err(close_error)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn redact(url: &url::Url) -> String {
    let mut redacted = url.clone();
    // Both setters only fail for URLs that cannot carry credentials.
    let _ = redacted.set_username("");
    let _ = redacted.set_password(None);
    redacted.to_string()
}

// ============================================================================
// Producer
// ============================================================================

/// Publishes messages to one fixed queue.
#[derive(Clone)]
pub struct Producer {
    channel: Arc<dyn Channel>,
    queue: QueueName,
}

impl Producer {
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    pub async fn publish(&self, body: impl Into<Bytes>) -> Result<(), MessagingError> {
        self.channel.publish(&self.queue, body.into()).await
    }

    /// Serialize `message` as JSON and publish it.
    pub async fn publish_json<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), MessagingError> {
        let body = serde_json::to_vec(message)?;
        self.publish(body).await
    }

    pub fn closer(&self) -> Closer {
        Closer::new("broker-producer", Arc::new(self.clone()))
    }
}

#[async_trait]
impl Close for Producer {
    async fn close(&self) -> Result<(), CloseError> {
        self.channel.close().await.map_err(close_error)
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Receives deliveries from one fixed queue.
#[derive(Clone)]
pub struct Consumer {
    channel: Arc<dyn Channel>,
    queue: QueueName,
    tag: String,
}

impl Consumer {
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Start the delivery stream. The stream ends when the channel closes.
    pub async fn consume(&self) -> Result<DeliveryStream, MessagingError> {
        info!(queue = %self.queue, consumer_tag = %self.tag, "Consuming");
        self.channel.consume(&self.queue, &self.tag).await
    }

    pub fn closer(&self) -> Closer {
        Closer::new("broker-consumer", Arc::new(self.clone()))
    }
}

#[async_trait]
impl Close for Consumer {
    async fn close(&self) -> Result<(), CloseError> {
        self.channel.close().await.map_err(close_error)
    }
}
