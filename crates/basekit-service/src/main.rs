//! # Basekit Server
//!
//! Binary entry point for the HTTP service.
//!
//! Usage: `basekit-server <config.yaml>`
//!
//! Exit codes: 0 after a signal-driven shutdown, 1 when serving fails,
//! 2 on a usage error, 3 when startup fails.

use basekit_service::{run_process, HttpWorkload};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    run_process("basekit-server", Box::new(HttpWorkload)).await
}
