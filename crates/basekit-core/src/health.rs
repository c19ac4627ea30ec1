//! Healthcheck repository and service layers.
//!
//! The HTTP controller calls [`HealthcheckService::check`], which delegates to
//! [`HealthcheckRepository::ping`] against the database pool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;

/// Healthcheck failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HealthError {
    #[error("Database unavailable: {message}")]
    DatabaseUnavailable { message: String },
}

/// Payload reported by a successful healthcheck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Storage-facing half of the healthcheck.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthcheckRepository: Send + Sync {
    /// Round-trip to the database.
    async fn ping(&self) -> Result<(), HealthError>;
}

/// Pings Postgres with `SELECT 1`.
#[derive(Clone)]
pub struct PgHealthcheckRepository {
    pool: PgPool,
}

impl PgHealthcheckRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthcheckRepository for PgHealthcheckRepository {
    async fn ping(&self) -> Result<(), HealthError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| HealthError::DatabaseUnavailable {
                message: e.to_string(),
            })
    }
}

// ============================================================================
// Service
// ============================================================================

/// Healthcheck business layer consumed by the HTTP controller.
#[async_trait]
pub trait HealthcheckService: Send + Sync {
    async fn check(&self) -> Result<HealthStatus, HealthError>;
}

pub struct DefaultHealthcheckService {
    repository: Arc<dyn HealthcheckRepository>,
}

impl DefaultHealthcheckService {
    pub fn new(repository: Arc<dyn HealthcheckRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl HealthcheckService for DefaultHealthcheckService {
    async fn check(&self) -> Result<HealthStatus, HealthError> {
        match self.repository.ping().await {
            Ok(()) => {
                debug!("Healthcheck passed");
                Ok(HealthStatus::ok())
            }
            Err(e) => {
                warn!(error = %e, "Healthcheck failed");
                Err(e)
            }
        }
    }
}
