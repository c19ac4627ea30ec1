//! # Basekit Job
//!
//! Runs the example job once, releases every resource and exits.
//!
//! Usage: `basekit-job <config.yaml>`

use basekit_service::{run_process, JobWorkload};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    run_process("basekit-job", Box::new(JobWorkload)).await
}
