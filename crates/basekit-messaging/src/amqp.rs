//! AMQP 0-9-1 broker backed by `lapin`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, ConnectionProperties};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::broker::{Broker, Channel, DeliveryStream};
use crate::error::MessagingError;
use crate::message::{Acknowledger, Delivery, QueueName};

const CONNECTION_NAME: &str = "basekit";
const CLOSE_REPLY_CODE: u16 = 200;
const CLOSE_REPLY_TEXT: &str = "Normal shutdown";
const PERSISTENT_DELIVERY_MODE: u8 = 2;
const STREAM_BUFFER: usize = 64;

// ============================================================================
// Connection
// ============================================================================

/// A connection to an AMQP broker such as RabbitMQ.
pub struct AmqpBroker {
    connection: lapin::Connection,
}

impl AmqpBroker {
    /// Connect to the broker at `url` (`amqp://` or `amqps://`).
    pub async fn connect(url: &str) -> Result<Self, MessagingError> {
        let properties = ConnectionProperties::default().with_connection_name(CONNECTION_NAME.into());
        let connection = lapin::Connection::connect(url, properties)
            .await
            .map_err(|e| MessagingError::ConnectionFailed {
                message: e.to_string(),
            })?;

        info!("Connected to AMQP broker");
        Ok(Self { connection })
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    fn kind(&self) -> &'static str {
        "amqp"
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    async fn open_channel(&self) -> Result<Arc<dyn Channel>, MessagingError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::channel("create_channel", e))?;
        debug!(channel_id = channel.id(), "Opened AMQP channel");
        Ok(Arc::new(AmqpChannel { channel }))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if !self.is_connected() {
            return Err(MessagingError::Closed);
        }
        self.connection
            .close(CLOSE_REPLY_CODE, CLOSE_REPLY_TEXT)
            .await
            .map_err(|e| MessagingError::ConnectionFailed {
                message: e.to_string(),
            })?;
        info!("AMQP connection closed");
        Ok(())
    }
}

// ============================================================================
// Channel
// ============================================================================

pub struct AmqpChannel {
    channel: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_queue(&self, queue: &QueueName) -> Result<(), MessagingError> {
        self.channel
            .queue_declare(
                queue.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::channel("queue_declare", e))?;
        debug!(queue = %queue, "Declared queue");
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), MessagingError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::channel("basic_qos", e))
    }

    async fn publish(&self, queue: &QueueName, body: Bytes) -> Result<(), MessagingError> {
        let publish_error = |e: lapin::Error| MessagingError::PublishFailed {
            queue: queue.to_string(),
            message: e.to_string(),
        };

        self.channel
            .basic_publish(
                "",
                queue.as_str(),
                BasicPublishOptions::default(),
                body.as_ref(),
                BasicProperties::default().with_delivery_mode(PERSISTENT_DELIVERY_MODE),
            )
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &QueueName,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, MessagingError> {
        let mut consumer = self
            .channel
            .basic_consume(
                queue.as_str(),
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::channel("basic_consume", e))?;

        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        let queue = queue.clone();
        tokio::spawn(async move {
            while let Some(next) = consumer.next().await {
                match next {
                    Ok(delivery) => {
                        let tag = delivery.delivery_tag;
                        let forwarded = Delivery::new(
                            tag,
                            Bytes::from(delivery.data),
                            delivery.redelivered,
                            Arc::new(AmqpAcker {
                                tag,
                                acker: delivery.acker,
                            }),
                        );
                        if sender.send(forwarded).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(queue = %queue, error = %e, "AMQP consumer stream failed");
                        break;
                    }
                }
            }
            debug!(queue = %queue, "AMQP consumer stream ended");
        });

        Ok(receiver)
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if !self.is_open() {
            return Err(MessagingError::Closed);
        }
        self.channel
            .close(CLOSE_REPLY_CODE, CLOSE_REPLY_TEXT)
            .await
            .map_err(|e| MessagingError::channel("close", e))
    }
}

// ============================================================================
// Acknowledgement
// ============================================================================

struct AmqpAcker {
    tag: u64,
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), MessagingError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| MessagingError::SettleFailed {
                tag: self.tag,
                message: e.to_string(),
            })
    }

    async fn nack(&self, requeue: bool) -> Result<(), MessagingError> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| MessagingError::SettleFailed {
                tag: self.tag,
                message: e.to_string(),
            })
    }
}
