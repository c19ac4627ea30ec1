//! Tests for the supervisor state machine.

use super::*;
use basekit_core::Closer;
use std::sync::{Arc, Mutex};

// ============================================================================
// Test doubles
// ============================================================================

type Log = Arc<Mutex<Vec<String>>>;

/// A resource whose closer records into the log.
#[derive(Clone)]
struct Tracked;

fn container_with_tracked(log: &Log) -> Container {
    let container = Container::new();
    let log = log.clone();
    container.provide::<Tracked, (), _, _>(move |(), registrar| {
        let log = log.clone();
        async move {
            registrar.register_closer(Closer::from_fn("tracked", move || async move {
                log.lock().unwrap().push("closed tracked".to_string());
                Ok(())
            }));
            Ok(Tracked)
        }
    });
    container
}

#[derive(Clone, Copy)]
enum RunBehavior {
    UntilCancelled,
    FinishImmediately,
    FailImmediately,
    IgnoreCancel,
    Panic,
}

struct StubWorkload {
    fail_start: bool,
    behavior: RunBehavior,
    log: Log,
}

impl StubWorkload {
    fn boxed(behavior: RunBehavior, log: &Log) -> Box<dyn Workload> {
        Box::new(Self {
            fail_start: false,
            behavior,
            log: log.clone(),
        })
    }

    fn failing_start(log: &Log) -> Box<dyn Workload> {
        Box::new(Self {
            fail_start: true,
            behavior: RunBehavior::UntilCancelled,
            log: log.clone(),
        })
    }
}

#[async_trait]
impl Workload for StubWorkload {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn start(
        self: Box<Self>,
        container: &Container,
    ) -> Result<Box<dyn StartedWorkload>, StartupError> {
        container.resolve::<Tracked>().await?;
        if self.fail_start {
            return Err(StartupError::NotConfigured { section: "stub" });
        }
        Ok(Box::new(StubRun {
            behavior: self.behavior,
            log: self.log,
        }))
    }
}

struct StubRun {
    behavior: RunBehavior,
    log: Log,
}

#[async_trait]
impl StartedWorkload for StubRun {
    fn shutdown_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(1))
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<(), WorkloadError> {
        self.log.lock().unwrap().push("running".to_string());
        match self.behavior {
            RunBehavior::UntilCancelled => {
                shutdown.cancelled().await;
                self.log.lock().unwrap().push("drained".to_string());
                Ok(())
            }
            RunBehavior::FinishImmediately => Ok(()),
            RunBehavior::FailImmediately => Err(WorkloadError::Failed {
                name: "stub",
                message: "address in use".to_string(),
            }),
            RunBehavior::IgnoreCancel => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            RunBehavior::Panic => panic!("workload crashed"),
        }
    }
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

// ============================================================================
// Signal-driven shutdown
// ============================================================================

#[tokio::test]
async fn test_stop_signal_while_serving_drains_and_exits_zero() {
    // Arrange
    let log: Log = Arc::default();
    let supervisor = Supervisor::new(container_with_tracked(&log));
    let mut states = supervisor.subscribe();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    // Act
    let running = tokio::spawn(supervisor.run(
        StubWorkload::boxed(RunBehavior::UntilCancelled, &log),
        async move {
            let _ = stop_rx.await;
        },
    ));
    states
        .wait_for(|state| *state == SupervisorState::Serving)
        .await
        .unwrap();
    stop_tx.send(()).unwrap();
    let outcome = running.await.unwrap();

    // Assert
    assert_eq!(outcome.trigger, StopTrigger::Signal);
    assert_eq!(outcome.exit, ExitStatus::Success);
    assert_eq!(outcome.exit.code(), 0);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.report.closed, vec!["tracked"]);
    assert_eq!(entries(&log), vec!["running", "drained", "closed tracked"]);
    assert_eq!(*states.borrow(), SupervisorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_workload_ignoring_cancellation_is_abandoned_at_deadline() {
    let log: Log = Arc::default();
    let supervisor = Supervisor::new(container_with_tracked(&log));

    let started = tokio::time::Instant::now();
    let outcome = supervisor
        .run(
            StubWorkload::boxed(RunBehavior::IgnoreCancel, &log),
            std::future::ready(()),
        )
        .await;

    assert_eq!(outcome.trigger, StopTrigger::Signal);
    assert_eq!(outcome.exit, ExitStatus::Success);
    assert_eq!(outcome.report.closed, vec!["tracked"]);
    assert!(started.elapsed() < Duration::from_secs(3600));
}

// ============================================================================
// Startup failure
// ============================================================================

#[tokio::test]
async fn test_startup_failure_stops_without_serving_and_releases_closers() {
    let log: Log = Arc::default();
    let supervisor = Supervisor::new(container_with_tracked(&log));
    let states = supervisor.subscribe();

    let outcome = supervisor
        .run(StubWorkload::failing_start(&log), std::future::pending())
        .await;

    assert_eq!(outcome.trigger, StopTrigger::StartupFailed);
    assert_eq!(outcome.exit, ExitStatus::StartupFailure);
    assert_eq!(outcome.exit.code(), 3);
    assert!(outcome.error.unwrap().contains("stub is not configured"));
    assert_eq!(entries(&log), vec!["closed tracked"]);
    assert_eq!(*states.borrow(), SupervisorState::Stopped);
}

// ============================================================================
// Workload-driven shutdown
// ============================================================================

#[tokio::test]
async fn test_workload_error_drains_and_exits_one() {
    let log: Log = Arc::default();
    let supervisor = Supervisor::new(container_with_tracked(&log));

    let outcome = supervisor
        .run(
            StubWorkload::boxed(RunBehavior::FailImmediately, &log),
            std::future::pending(),
        )
        .await;

    assert_eq!(outcome.trigger, StopTrigger::WorkloadFailed);
    assert_eq!(outcome.exit.code(), 1);
    assert!(outcome.error.unwrap().contains("address in use"));
    assert_eq!(entries(&log), vec!["running", "closed tracked"]);
}

#[tokio::test]
async fn test_workload_finishing_on_its_own_exits_zero() {
    let log: Log = Arc::default();
    let supervisor = Supervisor::new(container_with_tracked(&log));

    let outcome = supervisor
        .run(
            StubWorkload::boxed(RunBehavior::FinishImmediately, &log),
            std::future::pending(),
        )
        .await;

    assert_eq!(outcome.trigger, StopTrigger::WorkloadFinished);
    assert_eq!(outcome.exit, ExitStatus::Success);
    assert_eq!(outcome.report.closed, vec!["tracked"]);
}

#[tokio::test]
async fn test_panicking_workload_is_a_serve_failure() {
    let log: Log = Arc::default();
    let supervisor = Supervisor::new(container_with_tracked(&log));

    let outcome = supervisor
        .run(
            StubWorkload::boxed(RunBehavior::Panic, &log),
            std::future::pending(),
        )
        .await;

    assert_eq!(outcome.trigger, StopTrigger::WorkloadFailed);
    assert_eq!(outcome.exit, ExitStatus::ServeFailure);
    assert_eq!(outcome.report.closed, vec!["tracked"]);
}

// ============================================================================
// Exit codes
// ============================================================================

#[test]
fn test_exit_status_codes() {
    assert_eq!(ExitStatus::Success.code(), 0);
    assert_eq!(ExitStatus::ServeFailure.code(), 1);
    assert_eq!(ExitStatus::StartupFailure.code(), 3);
}

#[test]
fn test_supervisor_starts_in_starting_state() {
    let supervisor = Supervisor::new(Container::new());

    assert_eq!(supervisor.state(), SupervisorState::Starting);
}
