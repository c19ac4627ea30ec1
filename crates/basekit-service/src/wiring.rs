//! Resource constructors registered with the container.
//!
//! Every constructor that acquires an external connection registers its
//! closer before returning, so the container can release resources in
//! reverse construction order.

use anyhow::Context as _;
use basekit_core::{
    database, logging, AppConfig, ConfigPath, Container, DefaultHealthcheckService,
    HealthcheckRepository, HealthcheckService, LogHandle, PgHealthcheckRepository, PoolCloser,
};
use basekit_messaging::{Connection, Consumer, MessageHandler, Producer, QueueName};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::handlers::JsonObjectHandler;

#[cfg(test)]
#[path = "wiring_tests.rs"]
mod tests;

/// Container holding every basekit resource constructor, configured from
/// the file at `config_path`.
pub fn build_container(config_path: ConfigPath) -> Container {
    let container = Container::new();
    container.provide_value(config_path);
    provide_resources(&container);
    container
}

/// Register the constructors for configuration, logging, the database,
/// messaging and the HTTP handlers.
pub fn provide_resources(container: &Container) {
    provide_foundation(container);
    provide_database(container);
    provide_messaging(container);
    basekit_api::provide_controllers(container);
}

fn provide_foundation(container: &Container) {
    container
        .provide::<Arc<AppConfig>, (ConfigPath,), _, _>(|(path,), _registrar| async move {
            let config = AppConfig::load(&path)?;
            Ok(Arc::new(config))
        })
        .provide::<LogHandle, (Arc<AppConfig>,), _, _>(|(config,), registrar| async move {
            let handle = logging::init_logging(&config.logging)?;
            for sink in handle.sinks() {
                registrar.register_log_sink(Arc::clone(sink));
            }
            Ok(handle)
        });
}

fn provide_database(container: &Container) {
    container
        .provide::<PgPool, (Arc<AppConfig>,), _, _>(|(config,), registrar| async move {
            let pool = database::open_pool(&config).await?;
            registrar.register_closer(PoolCloser::closer(pool.clone()));

            if let Some(dir) = &config.db.migrations_dir {
                database::run_migrations(&pool, dir).await?;
            }
            Ok(pool)
        })
        .provide::<Arc<dyn HealthcheckRepository>, (PgPool,), _, _>(
            |(pool,), _registrar| async move {
                let repository: Arc<dyn HealthcheckRepository> =
                    Arc::new(PgHealthcheckRepository::new(pool));
                Ok(repository)
            },
        )
        .provide::<Arc<dyn HealthcheckService>, (Arc<dyn HealthcheckRepository>,), _, _>(
            |(repository,), _registrar| async move {
                let service: Arc<dyn HealthcheckService> =
                    Arc::new(DefaultHealthcheckService::new(repository));
                Ok(service)
            },
        );
}

fn provide_messaging(container: &Container) {
    container
        .provide::<Connection, (Arc<AppConfig>,), _, _>(|(config,), registrar| async move {
            let url = config
                .rabbitmq_url()
                .context("rabbitmq section is not configured")?;
            let connection = Connection::open(url).await?;
            registrar.register_closer(connection.closer());
            Ok(connection)
        })
        .provide::<Producer, (Connection, Arc<AppConfig>), _, _>(
            |(connection, config), registrar| async move {
                let settings = config
                    .rabbitmq
                    .as_ref()
                    .context("rabbitmq section is not configured")?;
                let producer = connection
                    .producer(QueueName::new(settings.queue.clone())?)
                    .await?;
                registrar.register_closer(producer.closer());
                Ok(producer)
            },
        )
        .provide::<Consumer, (Connection, Arc<AppConfig>), _, _>(
            |(connection, config), registrar| async move {
                let settings = config
                    .rabbitmq
                    .as_ref()
                    .context("rabbitmq section is not configured")?;
                let consumer = connection
                    .consumer(
                        QueueName::new(settings.consumer_queue.clone())?,
                        settings.prefetch,
                    )
                    .await?;
                registrar.register_closer(consumer.closer());
                Ok(consumer)
            },
        )
        .provide::<Arc<dyn MessageHandler>, (), _, _>(|(), _registrar| async {
            let handler: Arc<dyn MessageHandler> = Arc::new(JsonObjectHandler);
            Ok(handler)
        });
}

/// Resolve the configuration and install the logger.
///
/// Every process entry point calls this first so that later constructors
/// log through the configured subscriber.
pub async fn resolve_foundation(
    container: &Container,
) -> Result<(Arc<AppConfig>, LogHandle), basekit_core::ResolveError> {
    let config = container.resolve::<Arc<AppConfig>>().await?;
    let logger = container.resolve::<LogHandle>().await?;
    info!(
        run_addr = %config.run_addr(),
        messaging = config.messaging_enabled(),
        "Configuration loaded"
    );
    Ok((config, logger))
}

/// Resolve the connection, producer and consumer when messaging is
/// configured.
pub async fn resolve_messaging(
    container: &Container,
    config: &AppConfig,
) -> Result<Option<(Connection, Producer, Consumer)>, basekit_core::ResolveError> {
    if !config.messaging_enabled() {
        return Ok(None);
    }

    let connection = container.resolve::<Connection>().await?;
    let producer = container.resolve::<Producer>().await?;
    let consumer = container.resolve::<Consumer>().await?;
    info!(
        endpoint = %connection.endpoint(),
        producer_queue = %producer.queue(),
        consumer_queue = %consumer.queue(),
        "Messaging resources ready"
    );
    Ok(Some((connection, producer, consumer)))
}
