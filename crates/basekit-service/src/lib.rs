//! # Basekit Service
//!
//! Process supervision and resource wiring for the basekit binaries.
//!
//! - [`wiring`] registers every resource constructor with a [`Container`]
//! - [`supervisor`] runs a [`Workload`] through startup, serving, draining
//!   and teardown
//! - [`workloads`] holds the HTTP server, queue consumer and one-shot job
//! - [`signals`] turns SIGINT/SIGTERM into the supervisor's stop signal
//!
//! [`Container`]: basekit_core::Container

pub mod cli;
pub mod error;
pub mod handlers;
pub mod signals;
pub mod supervisor;
pub mod wiring;
pub mod workloads;

pub use cli::ConfigArgs;
pub use error::{StartupError, WorkloadError};
pub use handlers::JsonObjectHandler;
pub use supervisor::{
    ExitStatus, Outcome, StartedWorkload, StopTrigger, Supervisor, SupervisorState, Workload,
};
pub use workloads::{ConsumerWorkload, HttpWorkload, JobWorkload};

use std::process::ExitCode;

/// Parse arguments, wire the container and supervise `workload` until a stop
/// signal arrives or the workload ends.
pub async fn run_process(program: &str, workload: Box<dyn Workload>) -> ExitCode {
    use clap::Parser as _;

    let args = ConfigArgs::parse();
    let container = wiring::build_container(args.config_path());
    let supervisor = Supervisor::new(container);

    let outcome = supervisor
        .run(workload, async {
            signals::shutdown_signal().await;
        })
        .await;

    if let Some(error) = &outcome.error {
        eprintln!("{program} failed: {error}");
    }
    outcome.exit.into()
}
