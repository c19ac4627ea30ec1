//! # Basekit Messaging
//!
//! Message broker plumbing for basekit services.
//!
//! This library provides:
//! - A broker-agnostic connection with AMQP (`lapin`) and in-memory backends
//! - A [`Producer`] and a [`Consumer`] bound to fixed queues, each on its own
//!   channel and each closable through the lifecycle
//! - The [`consume_loop()`] that acks handled deliveries and requeues failed ones
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for broker operations
//! - [`message`] - Queue names, deliveries and acknowledgement
//! - [`broker`] - Broker and channel traits
//! - [`connection`] - Connection, producer and consumer resources
//! - [`consume_loop`](mod@consume_loop) - Delivery processing loop

pub mod amqp;
pub mod broker;
pub mod connection;
pub mod consume_loop;
pub mod error;
pub mod memory;
pub mod message;

pub use broker::{Broker, Channel, DeliveryStream};
pub use connection::{Connection, Consumer, Producer};
pub use consume_loop::{
    consume_loop, ConsumeSummary, HandlerError, MessageHandler, StopReason, CLOSED_CHANNEL_TAG,
};
pub use error::MessagingError;
pub use memory::MemoryBroker;
pub use message::{Acknowledger, Delivery, QueueName};
