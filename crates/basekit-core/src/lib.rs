//! # Basekit Core
//!
//! Resource wiring and lifecycle management for basekit services.
//!
//! This crate provides:
//! - A typed, lazily-constructing dependency registry ([`Container`])
//! - A uniform teardown capability for external resources ([`Close`], [`Closer`])
//! - Ordered, deadline-bounded shutdown of everything the registry built ([`Lifecycle`])
//! - YAML configuration loading with environment overrides ([`AppConfig`])
//! - Structured logging setup with flushable sinks ([`logging`])
//! - The database pool constructor and the healthcheck repository/service layers
//!
//! ## Architecture
//!
//! Resources are never held in global state. A [`Container`] value is created at
//! process start, constructors are registered with it, and callers resolve what
//! they need by type. Each constructor that acquires an external connection
//! registers a [`Closer`] before it returns, so the registry always knows how to
//! release what it built, in reverse construction order.
//!
//! ## Usage
//!
//! ```rust
//! use basekit_core::Container;
//! use std::sync::Arc;
//!
//! # tokio_test_block_on(async {
//! let container = Container::new();
//! container.provide::<Arc<String>, (), _, _>(|(), _registrar| async {
//!     Ok(Arc::new("hello".to_string()))
//! });
//!
//! let greeting = container.resolve::<Arc<String>>().await.unwrap();
//! assert_eq!(greeting.as_str(), "hello");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

pub mod config;
pub mod container;
pub mod database;
pub mod health;
pub mod lifecycle;
pub mod logging;

pub use config::{AppConfig, ConfigError, ConfigPath, LoggingConfig};
pub use container::{Container, Dependencies, Registrar, ResolveError, Resolver};
pub use database::{DatabaseError, PoolCloser};
pub use health::{
    DefaultHealthcheckService, HealthError, HealthStatus, HealthcheckRepository,
    HealthcheckService, PgHealthcheckRepository,
};
pub use lifecycle::{
    Close, CloseError, CloseFailure, Closer, Lifecycle, LogSink, ShutdownReport,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use logging::{LogHandle, LoggingError};

/// Boxed future used at the type-erased seams of the registry.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
