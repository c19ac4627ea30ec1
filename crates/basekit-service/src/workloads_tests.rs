//! Tests for the HTTP, consumer and job workloads under the supervisor.

use super::*;
use crate::supervisor::{ExitStatus, StopTrigger, Supervisor, SupervisorState};
use basekit_core::{ConfigPath, HealthError, HealthStatus, HealthcheckService, LogHandle};
use tokio::sync::oneshot;

struct AlwaysHealthy;

#[async_trait]
impl HealthcheckService for AlwaysHealthy {
    async fn check(&self) -> Result<HealthStatus, HealthError> {
        Ok(HealthStatus::ok())
    }
}

/// Container wired for production but with config, logger and healthcheck
/// replaced so nothing touches a real database or the global subscriber.
fn container_for(yaml: &str) -> Container {
    let container = wiring::build_container(ConfigPath::new("/unused.yaml"));
    container.provide_value(Arc::new(AppConfig::from_yaml_str(yaml).unwrap()));
    container.provide_value(LogHandle::default());
    let healthcheck: Arc<dyn HealthcheckService> = Arc::new(AlwaysHealthy);
    container.provide_value(healthcheck);
    container
}

fn http_config(run_addr: &str) -> String {
    format!(
        r#"
db:
  dsn: "postgres://localhost/basekit"
app:
  run_addr: "{run_addr}"
  shutdown_timeout_seconds: 2
"#
    )
}

const MESSAGING_CONFIG: &str = r#"
db:
  dsn: "postgres://localhost/basekit"
app:
  run_addr: "127.0.0.1:0"
  shutdown_timeout_seconds: 2
rabbitmq:
  url: "memory://local"
"#;

/// Run `workload` and fire the stop signal once it is serving.
async fn run_until_serving_then_stop(
    container: Container,
    workload: Box<dyn Workload>,
) -> crate::supervisor::Outcome {
    let supervisor = Supervisor::new(container);
    let mut states = supervisor.subscribe();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let running = tokio::spawn(supervisor.run(workload, async move {
        let _ = stop_rx.await;
    }));

    let _ = states
        .wait_for(|state| *state != SupervisorState::Starting)
        .await;
    let _ = stop_tx.send(());
    running.await.unwrap()
}

// ============================================================================
// HTTP
// ============================================================================

#[tokio::test]
async fn test_http_workload_stops_cleanly_on_signal() {
    let container = container_for(&http_config("127.0.0.1:0"));

    let outcome = run_until_serving_then_stop(container, Box::new(HttpWorkload)).await;

    assert_eq!(outcome.trigger, StopTrigger::Signal);
    assert_eq!(outcome.exit, ExitStatus::Success);
}

#[tokio::test]
async fn test_http_workload_bind_failure_exits_one() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = occupied.local_addr().unwrap().to_string();
    let container = container_for(&http_config(&address));

    let outcome = Supervisor::new(container)
        .run(Box::new(HttpWorkload), std::future::pending())
        .await;

    assert_eq!(outcome.trigger, StopTrigger::WorkloadFailed);
    assert_eq!(outcome.exit.code(), 1);
    assert!(outcome.error.unwrap().contains("Failed to bind"));
}

#[tokio::test]
async fn test_http_workload_opens_and_releases_messaging_resources() {
    let container = container_for(MESSAGING_CONFIG);

    let outcome = run_until_serving_then_stop(container, Box::new(HttpWorkload)).await;

    assert_eq!(outcome.exit, ExitStatus::Success);
    assert_eq!(
        outcome.report.closed,
        vec!["broker-consumer", "broker-producer", "broker-connection"]
    );
}

// ============================================================================
// Consumer
// ============================================================================

#[tokio::test]
async fn test_consumer_workload_without_rabbitmq_is_startup_failure() {
    let container = container_for(&http_config("127.0.0.1:0"));

    let outcome = Supervisor::new(container)
        .run(Box::new(ConsumerWorkload), std::future::pending())
        .await;

    assert_eq!(outcome.trigger, StopTrigger::StartupFailed);
    assert_eq!(outcome.exit, ExitStatus::StartupFailure);
    assert!(outcome.error.unwrap().contains("rabbitmq"));
}

#[tokio::test]
async fn test_consumer_workload_stops_on_signal() {
    let container = container_for(MESSAGING_CONFIG);

    let outcome = run_until_serving_then_stop(container, Box::new(ConsumerWorkload)).await;

    assert_eq!(outcome.trigger, StopTrigger::Signal);
    assert_eq!(outcome.exit, ExitStatus::Success);
    assert_eq!(
        outcome.report.closed,
        vec!["broker-consumer", "broker-connection"]
    );
}

// ============================================================================
// Job
// ============================================================================

#[tokio::test]
async fn test_job_workload_runs_once_and_exits_zero() {
    let container = container_for(&http_config("127.0.0.1:0"));

    let outcome = Supervisor::new(container)
        .run(Box::new(JobWorkload), std::future::pending())
        .await;

    assert_eq!(outcome.trigger, StopTrigger::WorkloadFinished);
    assert_eq!(outcome.exit, ExitStatus::Success);
}
