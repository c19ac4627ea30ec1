//! In-memory broker for tests and local development.
//!
//! Mirrors the AMQP semantics the service relies on:
//! - queues must be declared before messages routed to them are kept
//! - delivery tags start at 1 and increase monotonically
//! - nack with requeue returns the message to the head of its queue, marked
//!   redelivered
//! - closing a channel requeues every delivery it had not settled
//! - prefetch bounds unsettled deliveries per channel

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::{Broker, Channel, DeliveryStream};
use crate::error::MessagingError;
use crate::message::{Acknowledger, Delivery, QueueName};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Stream buffer used when prefetch is unlimited.
const UNBOUNDED_STREAM_BUFFER: usize = 64;

// ============================================================================
// Internal storage
// ============================================================================

#[derive(Clone)]
struct StoredMessage {
    body: Bytes,
    redelivered: bool,
}

struct Unsettled {
    channel_id: u64,
    queue: QueueName,
    message: StoredMessage,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<QueueName, VecDeque<StoredMessage>>,
    unsettled: HashMap<u64, Unsettled>,
    last_tag: u64,
    last_channel_id: u64,
    closed: bool,
}

impl BrokerState {
    fn in_flight(&self, channel_id: u64) -> usize {
        self.unsettled
            .values()
            .filter(|u| u.channel_id == channel_id)
            .count()
    }

    fn requeue(&mut self, unsettled: Unsettled) {
        if let Some(queue) = self.queues.get_mut(&unsettled.queue) {
            queue.push_front(StoredMessage {
                redelivered: true,
                ..unsettled.message
            });
        }
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
    shutdown: CancellationToken,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ============================================================================
// Broker
// ============================================================================

/// Process-local broker. Clones share the same queues.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Messages waiting in `queue`, excluding unsettled deliveries.
    pub fn queue_depth(&self, queue: &QueueName) -> usize {
        self.shared
            .state()
            .queues
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Deliveries handed to consumers and not yet acked or nacked.
    pub fn unsettled_count(&self) -> usize {
        self.shared.state().unsettled.len()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn is_connected(&self) -> bool {
        !self.shared.state().closed
    }

    async fn open_channel(&self) -> Result<Arc<dyn Channel>, MessagingError> {
        let id = {
            let mut state = self.shared.state();
            if state.closed {
                return Err(MessagingError::Closed);
            }
            state.last_channel_id += 1;
            state.last_channel_id
        };

        debug!(channel_id = id, "Opened in-memory channel");
        Ok(Arc::new(MemoryChannel {
            id,
            shared: Arc::clone(&self.shared),
            prefetch: AtomicU16::new(0),
            open: AtomicBool::new(true),
            cancel: self.shared.shutdown.child_token(),
        }))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        {
            let mut state = self.shared.state();
            if state.closed {
                return Err(MessagingError::Closed);
            }
            state.closed = true;
        }
        self.shared.shutdown.cancel();
        self.shared.notify.notify_waiters();
        debug!("In-memory broker closed");
        Ok(())
    }
}

// ============================================================================
// Channel
// ============================================================================

pub struct MemoryChannel {
    id: u64,
    shared: Arc<Shared>,
    prefetch: AtomicU16,
    open: AtomicBool,
    cancel: CancellationToken,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), MessagingError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(MessagingError::Closed)
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_queue(&self, queue: &QueueName) -> Result<(), MessagingError> {
        self.ensure_open()?;
        self.shared
            .state()
            .queues
            .entry(queue.clone())
            .or_default();
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), MessagingError> {
        self.ensure_open()?;
        self.prefetch.store(count, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, queue: &QueueName, body: Bytes) -> Result<(), MessagingError> {
        self.ensure_open()?;
        {
            let mut state = self.shared.state();
            match state.queues.get_mut(queue) {
                Some(messages) => messages.push_back(StoredMessage {
                    body,
                    redelivered: false,
                }),
                None => {
                    warn!(queue = %queue, "Dropping message published to undeclared queue");
                    return Ok(());
                }
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &QueueName,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, MessagingError> {
        self.ensure_open()?;
        if !self.shared.state().queues.contains_key(queue) {
            return Err(MessagingError::channel(
                "consume",
                format!("queue '{queue}' has not been declared"),
            ));
        }

        let prefetch = self.prefetch.load(Ordering::SeqCst) as usize;
        let buffer = if prefetch == 0 {
            UNBOUNDED_STREAM_BUFFER
        } else {
            prefetch
        };
        let (sender, receiver) = mpsc::channel(buffer);

        debug!(queue = %queue, consumer_tag, prefetch, "Starting in-memory consumer");
        tokio::spawn(pump(
            Arc::clone(&self.shared),
            self.id,
            queue.clone(),
            prefetch,
            self.cancel.clone(),
            sender,
        ));
        Ok(receiver)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Err(MessagingError::Closed);
        }
        self.cancel.cancel();

        {
            let mut state = self.shared.state();
            let mut tags: Vec<u64> = state
                .unsettled
                .iter()
                .filter(|(_, u)| u.channel_id == self.id)
                .map(|(tag, _)| *tag)
                .collect();
            // Highest tag first so the oldest delivery ends up at the head.
            tags.sort_unstable_by(|a, b| b.cmp(a));
            for tag in tags {
                if let Some(unsettled) = state.unsettled.remove(&tag) {
                    state.requeue(unsettled);
                }
            }
        }
        self.shared.notify.notify_waiters();
        debug!(channel_id = self.id, "In-memory channel closed");
        Ok(())
    }
}

/// Move messages from `queue` into the consumer stream until cancelled.
async fn pump(
    shared: Arc<Shared>,
    channel_id: u64,
    queue: QueueName,
    prefetch: usize,
    cancel: CancellationToken,
    sender: mpsc::Sender<Delivery>,
) {
    loop {
        let notified = shared.notify.notified();
        let next = take_next(&shared, channel_id, &queue, prefetch, &cancel);

        match next {
            Some(delivery) => {
                let tag = delivery.tag();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return_undelivered(&shared, tag);
                        break;
                    }
                    sent = sender.send(delivery) => {
                        if sent.is_err() {
                            return_undelivered(&shared, tag);
                            break;
                        }
                    }
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = notified => {}
                }
            }
        }
    }
    debug!(queue = %queue, channel_id, "In-memory consumer stopped");
}

/// Claim the head of `queue` for `channel_id`. Nothing is claimed once the
/// channel is cancelled; the check happens under the state lock so a closing
/// channel never gains unsettled deliveries after it requeued its own.
fn take_next(
    shared: &Arc<Shared>,
    channel_id: u64,
    queue: &QueueName,
    prefetch: usize,
    cancel: &CancellationToken,
) -> Option<Delivery> {
    let mut state = shared.state();
    if state.closed
        || cancel.is_cancelled()
        || (prefetch > 0 && state.in_flight(channel_id) >= prefetch)
    {
        return None;
    }

    let message = state.queues.get_mut(queue)?.pop_front()?;
    state.last_tag += 1;
    let tag = state.last_tag;
    state.unsettled.insert(
        tag,
        Unsettled {
            channel_id,
            queue: queue.clone(),
            message: message.clone(),
        },
    );

    Some(Delivery::new(
        tag,
        message.body,
        message.redelivered,
        Arc::new(MemoryAcker {
            tag,
            shared: Arc::clone(shared),
        }),
    ))
}

/// Requeue a claimed delivery that never reached the consumer stream.
fn return_undelivered(shared: &Shared, tag: u64) {
    let returned = {
        let mut state = shared.state();
        match state.unsettled.remove(&tag) {
            Some(unsettled) => {
                state.requeue(unsettled);
                true
            }
            None => false,
        }
    };
    if returned {
        debug!(tag, "Requeued undelivered message");
        shared.notify.notify_waiters();
    }
}

// ============================================================================
// Acknowledgement
// ============================================================================

struct MemoryAcker {
    tag: u64,
    shared: Arc<Shared>,
}

impl MemoryAcker {
    fn settle(&self, requeue: Option<bool>) -> Result<(), MessagingError> {
        {
            let mut state = self.shared.state();
            if state.closed {
                return Err(MessagingError::Closed);
            }
            let unsettled =
                state
                    .unsettled
                    .remove(&self.tag)
                    .ok_or_else(|| MessagingError::SettleFailed {
                        tag: self.tag,
                        message: "unknown delivery tag".to_string(),
                    })?;
            if requeue == Some(true) {
                state.requeue(unsettled);
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), MessagingError> {
        self.settle(None)
    }

    async fn nack(&self, requeue: bool) -> Result<(), MessagingError> {
        self.settle(Some(requeue))
    }
}
