//! Resource teardown and ordered shutdown.
//!
//! Every resource that holds an external connection (database pool, broker
//! connection, producer and consumer channels) is paired with a [`Closer`].
//! Closers are appended to the [`Lifecycle`] in construction order and released
//! in strict reverse order, so a resource is never torn down before anything
//! that depends on it.
//!
//! Log sinks are tracked separately and flushed before any closer runs.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::BoxFuture;

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;

/// Deadline applied when no explicit shutdown timeout is configured.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Close capability
// ============================================================================

/// Teardown capability for an acquired external resource.
#[async_trait]
pub trait Close: Send + Sync {
    /// Release the resource. Called at most once by the [`Lifecycle`].
    async fn close(&self) -> Result<(), CloseError>;
}

/// Failure reported by a [`Close`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum CloseError {
    #[error("Close failed: {message}")]
    Failed { message: String },

    #[error("Resource was already closed")]
    AlreadyClosed,
}

impl CloseError {
    /// Build a [`CloseError::Failed`] from any displayable error.
    pub fn failed(error: impl fmt::Display) -> Self {
        Self::Failed {
            message: error.to_string(),
        }
    }
}

/// A named teardown action registered for one constructed resource.
#[derive(Clone)]
pub struct Closer {
    name: String,
    target: Arc<dyn Close>,
}

impl Closer {
    /// Pair a resource name with its teardown capability.
    pub fn new(name: impl Into<String>, target: Arc<dyn Close>) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }

    /// Adapt a one-shot async closure into a closer.
    ///
    /// The closure runs on the first call to [`Close::close`]; later calls
    /// report [`CloseError::AlreadyClosed`].
    pub fn from_fn<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), CloseError>> + Send + 'static,
    {
        let action: Box<dyn FnOnce() -> BoxFuture<'static, Result<(), CloseError>> + Send> =
            Box::new(move || Box::pin(action()));

        Self::new(
            name,
            Arc::new(FnClose {
                action: Mutex::new(Some(action)),
            }),
        )
    }

    /// Resource name used in logs and shutdown reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the teardown action.
    pub async fn close(&self) -> Result<(), CloseError> {
        self.target.close().await
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closer").field("name", &self.name).finish()
    }
}

type CloseAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), CloseError>> + Send>;

struct FnClose {
    action: Mutex<Option<CloseAction>>,
}

#[async_trait]
impl Close for FnClose {
    async fn close(&self) -> Result<(), CloseError> {
        let action = lock(&self.action).take();
        match action {
            Some(action) => action().await,
            None => Err(CloseError::AlreadyClosed),
        }
    }
}

// ============================================================================
// Log sinks
// ============================================================================

/// A log destination that buffers output and must be flushed at shutdown.
pub trait LogSink: Send + Sync {
    /// Sink name used in diagnostics.
    fn name(&self) -> &str;

    /// Flush buffered log records to their destination.
    fn flush(&self) -> std::io::Result<()>;
}

// ============================================================================
// Shutdown report
// ============================================================================

/// A closer that returned an error during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    pub resource: String,
    pub message: String,
}

/// Outcome of one [`Lifecycle::shutdown`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Number of log sinks flushed successfully
    pub flushed_sinks: usize,

    /// Resources closed successfully, in the order they were closed
    pub closed: Vec<String>,

    /// Resources whose teardown action failed
    pub failed: Vec<CloseFailure>,

    /// Resources not released before the deadline elapsed
    pub abandoned: Vec<String>,

    /// True when shutdown had already run and this call did nothing
    pub already_shut_down: bool,
}

impl ShutdownReport {
    /// True when every registered resource was closed without error.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.abandoned.is_empty()
    }
}

// ============================================================================
// Lifecycle coordinator
// ============================================================================

/// Append-only registry of closers and log sinks with a one-time shutdown.
#[derive(Default)]
pub struct Lifecycle {
    closers: Mutex<Vec<Closer>>,
    log_sinks: Mutex<Vec<Arc<dyn LogSink>>>,
    shutdown_started: AtomicBool,
}

impl Lifecycle {
    /// Create an empty lifecycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a closer to the teardown sequence.
    ///
    /// Once shutdown has started the closer is invoked right away on a
    /// spawned task instead, so a resource finished late is still released.
    pub fn register(&self, closer: Closer) {
        {
            let mut closers = lock(&self.closers);
            if !self.is_shut_down() {
                debug!(resource = %closer.name(), "Registered closer");
                closers.push(closer);
                return;
            }
        }
        close_late(closer);
    }

    /// Append several closers, preserving their order.
    pub fn register_all(&self, closers: impl IntoIterator<Item = Closer>) {
        for closer in closers {
            self.register(closer);
        }
    }

    /// Track a log sink to flush at shutdown.
    pub fn register_log_sink(&self, sink: Arc<dyn LogSink>) {
        debug!(sink = %sink.name(), "Registered log sink");
        lock(&self.log_sinks).push(sink);
    }

    /// Names of the registered closers in construction order.
    pub fn registered(&self) -> Vec<String> {
        lock(&self.closers)
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// True once [`Lifecycle::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown_started.load(Ordering::SeqCst)
    }

    /// Flush log sinks, then close every registered resource in reverse
    /// registration order.
    ///
    /// Individual failures are logged and recorded, never raised. Resources
    /// not closed when `deadline` elapses are abandoned. Only the first call
    /// does any work.
    pub async fn shutdown(&self, deadline: Duration) -> ShutdownReport {
        let mut closers: Vec<Closer> = {
            let mut registered = lock(&self.closers);
            if self.shutdown_started.swap(true, Ordering::SeqCst) {
                debug!("Shutdown already performed; ignoring repeated request");
                return ShutdownReport {
                    already_shut_down: true,
                    ..Default::default()
                };
            }
            std::mem::take(&mut *registered)
        };

        let deadline_at = Instant::now() + deadline;
        let mut report = ShutdownReport::default();

        let sinks: Vec<Arc<dyn LogSink>> = lock(&self.log_sinks).drain(..).collect();
        for sink in sinks {
            match sink.flush() {
                Ok(()) => report.flushed_sinks += 1,
                Err(e) => error!(sink = %sink.name(), error = %e, "Failed to flush log sink"),
            }
        }

        info!(
            resources = closers.len(),
            deadline_ms = deadline.as_millis() as u64,
            "Releasing resources"
        );

        while let Some(closer) = closers.pop() {
            match tokio::time::timeout_at(deadline_at, closer.close()).await {
                Ok(Ok(())) => {
                    debug!(resource = %closer.name(), "Resource closed");
                    report.closed.push(closer.name().to_string());
                }
                Ok(Err(e)) => {
                    error!(resource = %closer.name(), error = %e, "Error closing resource");
                    report.failed.push(CloseFailure {
                        resource: closer.name().to_string(),
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    report.abandoned.push(closer.name().to_string());
                    report
                        .abandoned
                        .extend(closers.drain(..).rev().map(|c| c.name().to_string()));
                    warn!(
                        abandoned = ?report.abandoned,
                        "Shutdown deadline elapsed; abandoning remaining resources"
                    );
                    break;
                }
            }
        }

        info!(
            closed = report.closed.len(),
            failed = report.failed.len(),
            abandoned = report.abandoned.len(),
            "Resource release finished"
        );
        report
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("closers", &self.registered())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Release a closer registered after shutdown started.
fn close_late(closer: Closer) {
    warn!(
        resource = %closer.name(),
        "Closer registered after shutdown started; closing immediately"
    );
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = closer.close().await {
                    error!(resource = %closer.name(), error = %e, "Error closing resource");
                }
            });
        }
        Err(_) => error!(
            resource = %closer.name(),
            "No runtime available to close late resource"
        ),
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
