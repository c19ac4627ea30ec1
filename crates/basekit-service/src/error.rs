//! Error types for process startup and workloads.

use basekit_api::ServeError;
use basekit_core::ResolveError;
use basekit_messaging::MessagingError;

/// Fatal failure before a workload starts serving.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Messaging setup failed: {0}")]
    Messaging(#[from] MessagingError),

    #[error("{section} is not configured")]
    NotConfigured { section: &'static str },
}

/// Failure surfaced by a running workload.
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error(transparent)]
    Serve(#[from] ServeError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error("{name} failed: {message}")]
    Failed { name: &'static str, message: String },
}
