//! The workloads behind the three binaries.

use async_trait::async_trait;
use basekit_api::{App, AppState};
use basekit_core::{AppConfig, Container};
use basekit_messaging::{consume_loop, Consumer, DeliveryStream, MessageHandler, StopReason};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{StartupError, WorkloadError};
use crate::supervisor::{StartedWorkload, Workload};
use crate::wiring;

#[cfg(test)]
#[path = "workloads_tests.rs"]
mod tests;

// ============================================================================
// HTTP server
// ============================================================================

/// Serves the HTTP dispatcher on `app.run_addr`.
///
/// Messaging resources are opened at startup when configured, so a broken
/// broker fails the process before it accepts traffic.
#[derive(Debug, Default)]
pub struct HttpWorkload;

#[async_trait]
impl Workload for HttpWorkload {
    fn name(&self) -> &'static str {
        "http-server"
    }

    async fn start(
        self: Box<Self>,
        container: &Container,
    ) -> Result<Box<dyn StartedWorkload>, StartupError> {
        let (config, _logger) = wiring::resolve_foundation(container).await?;
        let state = AppState::from_container(container).await?;
        wiring::resolve_messaging(container, &config).await?;

        Ok(Box::new(HttpServer {
            app: basekit_api::create_app(state, config.request_timeout()),
            address: config.run_addr().to_string(),
            shutdown_timeout: config.shutdown_timeout(),
        }))
    }
}

struct HttpServer {
    app: App,
    address: String,
    shutdown_timeout: Duration,
}

#[async_trait]
impl StartedWorkload for HttpServer {
    fn shutdown_timeout(&self) -> Option<Duration> {
        Some(self.shutdown_timeout)
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<(), WorkloadError> {
        let listener = basekit_api::bind(&self.address).await?;
        basekit_api::serve(listener, self.app, async move { shutdown.cancelled().await }).await?;
        Ok(())
    }
}

// ============================================================================
// Queue consumer
// ============================================================================

/// Runs the consume loop over the configured consumer queue.
#[derive(Debug, Default)]
pub struct ConsumerWorkload;

#[async_trait]
impl Workload for ConsumerWorkload {
    fn name(&self) -> &'static str {
        "queue-consumer"
    }

    async fn start(
        self: Box<Self>,
        container: &Container,
    ) -> Result<Box<dyn StartedWorkload>, StartupError> {
        let (config, _logger) = wiring::resolve_foundation(container).await?;
        if !config.messaging_enabled() {
            return Err(StartupError::NotConfigured {
                section: "rabbitmq",
            });
        }

        let consumer = container.resolve::<Consumer>().await?;
        let handler = container.resolve::<Arc<dyn MessageHandler>>().await?;
        let deliveries = consumer.consume().await?;

        Ok(Box::new(QueueConsumer {
            deliveries,
            handler,
            shutdown_timeout: config.shutdown_timeout(),
        }))
    }
}

struct QueueConsumer {
    deliveries: DeliveryStream,
    handler: Arc<dyn MessageHandler>,
    shutdown_timeout: Duration,
}

#[async_trait]
impl StartedWorkload for QueueConsumer {
    fn shutdown_timeout(&self) -> Option<Duration> {
        Some(self.shutdown_timeout)
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<(), WorkloadError> {
        let summary = consume_loop(self.deliveries, self.handler.as_ref(), &shutdown).await;

        info!(
            received = summary.received,
            acked = summary.acked,
            requeued = summary.requeued,
            settle_failures = summary.settle_failures,
            stop_reason = ?summary.stop_reason,
            "Consume loop stopped"
        );
        if summary.stop_reason == StopReason::ChannelClosed {
            warn!("Consumer channel closed");
        }
        Ok(())
    }
}

// ============================================================================
// One-shot job
// ============================================================================

/// Runs the example job once and exits.
#[derive(Debug, Default)]
pub struct JobWorkload;

#[async_trait]
impl Workload for JobWorkload {
    fn name(&self) -> &'static str {
        "example-job"
    }

    async fn start(
        self: Box<Self>,
        container: &Container,
    ) -> Result<Box<dyn StartedWorkload>, StartupError> {
        let (config, _logger) = wiring::resolve_foundation(container).await?;
        Ok(Box::new(ExampleJob { config }))
    }
}

struct ExampleJob {
    config: Arc<AppConfig>,
}

#[async_trait]
impl StartedWorkload for ExampleJob {
    fn shutdown_timeout(&self) -> Option<Duration> {
        Some(self.config.shutdown_timeout())
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<(), WorkloadError> {
        info!("Starting example job");
        tokio::select! {
            _ = shutdown.cancelled() => {
                warn!("Example job cancelled before completion");
                Ok(())
            }
            result = example_job(&self.config) => {
                if result.is_ok() {
                    info!("Example job completed successfully");
                }
                result
            }
        }
    }
}

/// Placeholder for scheduled work; replace with a call into a service
/// resolved from the container.
async fn example_job(config: &AppConfig) -> Result<(), WorkloadError> {
    info!(
        messaging = config.messaging_enabled(),
        "Executing example job"
    );
    Ok(())
}
