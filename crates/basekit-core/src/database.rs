//! Postgres connection pool constructor.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::lifecycle::{Close, CloseError, Closer};

#[cfg(test)]
#[path = "database_tests.rs"]
mod tests;

/// Database provisioning errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    Connect {
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to load migrations from {path}: {source}")]
    LoadMigrations {
        path: String,
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    #[error("Failed to apply migrations: {source}")]
    Migrate {
        #[source]
        source: sqlx::migrate::MigrateError,
    },
}

/// Open the connection pool described by `config`.
///
/// The pool is capped at `db.max_open_conns` and verified by acquiring one
/// connection before returning. sqlx has no idle ceiling, so
/// `db.max_idle_conns` is only reported; the pool keeps no idle floor.
pub async fn open_pool(config: &AppConfig) -> Result<PgPool, DatabaseError> {
    let pool = pool_options(config)
        .connect(config.db_dsn())
        .await
        .map_err(|source| DatabaseError::Connect { source })?;

    info!(
        max_connections = config.db_max_open_conns(),
        max_idle_conns = config.db_max_idle_conns(),
        "Database pool opened"
    );
    Ok(pool)
}

fn pool_options(config: &AppConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.db_max_open_conns())
        .acquire_timeout(config.db_connect_timeout())
}

/// Apply the SQL migrations found in `dir`.
pub async fn run_migrations(pool: &PgPool, dir: &Path) -> Result<(), DatabaseError> {
    let migrator = sqlx::migrate::Migrator::new(dir.to_path_buf())
        .await
        .map_err(|source| DatabaseError::LoadMigrations {
            path: dir.display().to_string(),
            source,
        })?;

    migrator
        .run(pool)
        .await
        .map_err(|source| DatabaseError::Migrate { source })?;

    info!(path = %dir.display(), migrations = migrator.iter().count(), "Migrations applied");
    Ok(())
}

/// Closes the pool, waiting for checked-out connections to be returned.
pub struct PoolCloser {
    pool: PgPool,
}

impl PoolCloser {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Wrap the pool in a named [`Closer`].
    pub fn closer(pool: PgPool) -> Closer {
        Closer::new("postgres", Arc::new(Self::new(pool)))
    }
}

#[async_trait]
impl Close for PoolCloser {
    async fn close(&self) -> Result<(), CloseError> {
        if self.pool.is_closed() {
            warn!("Database pool was already closed");
            return Err(CloseError::AlreadyClosed);
        }
        self.pool.close().await;
        info!("Database pool closed");
        Ok(())
    }
}
