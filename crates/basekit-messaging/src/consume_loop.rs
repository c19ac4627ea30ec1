//! # Consume Loop
//!
//! Pulls deliveries from a consumer stream and settles each one according to
//! the handler outcome:
//!
//! - handler success → ack
//! - handler failure → nack with requeue (at-least-once, unbounded retry)
//!
//! The loop stops when the cancellation token fires or the stream reports
//! closure. Cancellation is checked before every receive, so a stop request
//! is observed as soon as the in-flight handler returns.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::DeliveryStream;
use crate::message::Delivery;

#[cfg(test)]
#[path = "consume_loop_tests.rs"]
mod tests;

/// Delivery tag that marks a closed channel.
pub const CLOSED_CHANNEL_TAG: u64 = 0;

// ============================================================================
// Handler
// ============================================================================

/// Failure reported by a [`MessageHandler`]. The message is requeued.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Invalid message: {message}")]
    InvalidMessage { message: String },

    #[error("Processing failed: {message}")]
    ProcessingFailed { message: String },
}

/// Application-level processing of one delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

// ============================================================================
// Loop outcome
// ============================================================================

/// Why the consume loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cancellation token fired
    Cancelled,

    /// The delivery stream ended or yielded the closed-channel sentinel
    ChannelClosed,
}

/// Counters reported when the consume loop returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeSummary {
    pub received: u64,
    pub acked: u64,
    pub requeued: u64,

    /// Deliveries the broker refused to settle
    pub settle_failures: u64,

    pub stop_reason: StopReason,
}

impl ConsumeSummary {
    fn new() -> Self {
        Self {
            received: 0,
            acked: 0,
            requeued: 0,
            settle_failures: 0,
            stop_reason: StopReason::Cancelled,
        }
    }
}

// ============================================================================
// Loop
// ============================================================================

/// Process deliveries until cancelled or the stream closes.
pub async fn consume_loop<H>(
    mut deliveries: DeliveryStream,
    handler: &H,
    cancel: &CancellationToken,
) -> ConsumeSummary
where
    H: MessageHandler + ?Sized,
{
    let mut summary = ConsumeSummary::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                summary.stop_reason = StopReason::Cancelled;
                break;
            }
            next = deliveries.recv() => next,
        };

        let delivery = match next {
            Some(delivery) if delivery.tag() != CLOSED_CHANNEL_TAG => delivery,
            _ => {
                summary.stop_reason = StopReason::ChannelClosed;
                break;
            }
        };

        summary.received += 1;
        let tag = delivery.tag();

        match handler.handle(&delivery).await {
            Ok(()) => match delivery.ack().await {
                Ok(()) => {
                    debug!(delivery_tag = tag, "Message acknowledged");
                    summary.acked += 1;
                }
                Err(e) => {
                    error!(delivery_tag = tag, error = %e, "Failed to acknowledge message");
                    summary.settle_failures += 1;
                }
            },
            Err(handler_error) => {
                warn!(
                    delivery_tag = tag,
                    error = %handler_error,
                    "Handler failed; requeueing message"
                );
                match delivery.nack(true).await {
                    Ok(()) => summary.requeued += 1,
                    Err(e) => {
                        error!(delivery_tag = tag, error = %e, "Failed to requeue message");
                        summary.settle_failures += 1;
                    }
                }
            }
        }
    }

    info!(
        received = summary.received,
        acked = summary.acked,
        requeued = summary.requeued,
        settle_failures = summary.settle_failures,
        stop_reason = ?summary.stop_reason,
        "Consume loop stopped"
    );
    summary
}
