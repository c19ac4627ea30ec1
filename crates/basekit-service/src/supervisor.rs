//! # Process Supervisor
//!
//! Drives one workload through `Starting → Serving → Draining → Stopped`.
//!
//! - `Starting`: the workload resolves what it needs from the container. A
//!   failure here goes straight to `Stopped`; closers already committed are
//!   still released.
//! - `Serving`: the workload runs on its own task. The supervisor waits for
//!   whichever comes first, the stop signal or the workload's own outcome.
//! - `Draining`: the workload is cancelled and given the shutdown timeout to
//!   finish, then the container releases every resource in reverse
//!   construction order.
//! - `Stopped`: terminal. The [`Outcome`] carries the exit status.

use async_trait::async_trait;
use basekit_core::{Container, ShutdownReport, DEFAULT_SHUTDOWN_TIMEOUT};
use std::{fmt, future::Future, process::ExitCode, time::Duration};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{StartupError, WorkloadError};

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;

// ============================================================================
// Workloads
// ============================================================================

/// Something the supervisor starts and runs until it is told to stop.
#[async_trait]
pub trait Workload: Send {
    fn name(&self) -> &'static str;

    /// Resolve dependencies. Errors are fatal startup errors.
    async fn start(
        self: Box<Self>,
        container: &Container,
    ) -> Result<Box<dyn StartedWorkload>, StartupError>;
}

/// A workload whose dependencies are resolved and which is ready to run.
#[async_trait]
pub trait StartedWorkload: Send {
    /// Bound on draining and on resource teardown, when the workload knows it.
    fn shutdown_timeout(&self) -> Option<Duration> {
        None
    }

    /// Run until `shutdown` is cancelled or the work ends by itself.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<(), WorkloadError>;
}

// ============================================================================
// States and outcome
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Serving,
    Draining,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Serving => "serving",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What ended the `Serving` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTrigger {
    /// The stop signal fired
    Signal,

    /// The workload returned `Ok` on its own
    WorkloadFinished,

    /// The workload returned an error or panicked
    WorkloadFailed,

    /// Startup failed; the workload never ran
    StartupFailed,
}

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    ServeFailure,
    StartupFailure,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::ServeFailure => 1,
            Self::StartupFailure => 3,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Result of one supervised run.
#[derive(Debug)]
pub struct Outcome {
    pub trigger: StopTrigger,
    pub exit: ExitStatus,

    /// The failure that decided a non-zero exit
    pub error: Option<String>,

    pub report: ShutdownReport,
}

// ============================================================================
// Supervisor
// ============================================================================

pub struct Supervisor {
    container: Container,
    shutdown_timeout: Duration,
    state: watch::Sender<SupervisorState>,
}

impl Supervisor {
    pub fn new(container: Container) -> Self {
        let (state, _) = watch::channel(SupervisorState::Starting);
        Self {
            container,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            state,
        }
    }

    /// Timeout used until a started workload supplies its own.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Start `workload`, serve until `stop` resolves or the workload ends,
    /// then drain and release every resource.
    pub async fn run<S>(self, workload: Box<dyn Workload>, stop: S) -> Outcome
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let name = workload.name();
        self.transition(SupervisorState::Starting);

        let started = match workload.start(&self.container).await {
            Ok(started) => started,
            Err(e) => {
                error!(workload = name, error = %e, "Startup failed");
                let report = self.container.shutdown(self.shutdown_timeout).await;
                self.transition(SupervisorState::Stopped);
                return Outcome {
                    trigger: StopTrigger::StartupFailed,
                    exit: ExitStatus::StartupFailure,
                    error: Some(e.to_string()),
                    report,
                };
            }
        };
        let timeout = started.shutdown_timeout().unwrap_or(self.shutdown_timeout);

        let cancel = CancellationToken::new();
        let (outcome_tx, mut outcome_rx) = oneshot::channel();
        let workload_cancel = cancel.clone();
        let serving = tokio::spawn(async move {
            let result = started.run(workload_cancel).await;
            let _ = outcome_tx.send(result);
        });

        let (signal_tx, mut signal_rx) = oneshot::channel();
        let listening = tokio::spawn(async move {
            stop.await;
            let _ = signal_tx.send(());
        });

        self.transition(SupervisorState::Serving);
        info!(workload = name, "Serving");

        let (trigger, exit, failure) = tokio::select! {
            Ok(()) = &mut signal_rx => (StopTrigger::Signal, ExitStatus::Success, None),
            result = &mut outcome_rx => match result {
                Ok(Ok(())) => (StopTrigger::WorkloadFinished, ExitStatus::Success, None),
                Ok(Err(e)) => (StopTrigger::WorkloadFailed, ExitStatus::ServeFailure, Some(e.to_string())),
                Err(_) => (
                    StopTrigger::WorkloadFailed,
                    ExitStatus::ServeFailure,
                    Some(format!("{name} ended without reporting an outcome")),
                ),
            },
        };
        listening.abort();

        self.transition(SupervisorState::Draining);
        match &failure {
            Some(message) => error!(workload = name, error = %message, "Workload failed, draining"),
            None => info!(workload = name, trigger = ?trigger, timeout_ms = timeout.as_millis() as u64, "Draining"),
        }

        cancel.cancel();
        if trigger == StopTrigger::Signal {
            match tokio::time::timeout(timeout, &mut outcome_rx).await {
                Ok(Ok(Ok(()))) => info!(workload = name, "Workload drained"),
                Ok(Ok(Err(e))) => warn!(workload = name, error = %e, "Workload failed while draining"),
                Ok(Err(_)) => warn!(workload = name, "Workload ended without reporting an outcome"),
                Err(_) => {
                    warn!(workload = name, "Workload did not drain before the deadline; abandoning it");
                    serving.abort();
                }
            }
        }

        let report = self.container.shutdown(timeout).await;
        if !report.is_clean() {
            warn!(
                failed = report.failed.len(),
                abandoned = ?report.abandoned,
                "Resources were not released cleanly"
            );
        }

        self.transition(SupervisorState::Stopped);
        info!(workload = name, exit_code = exit.code(), "Stopped");

        Outcome {
            trigger,
            exit,
            error: failure,
            report,
        }
    }

    fn transition(&self, next: SupervisorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Supervisor state changed");
        }
    }
}
