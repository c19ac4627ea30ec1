//! # Basekit Consumer
//!
//! Consumes `rabbitmq.consumer_queue`, acknowledging handled messages and
//! requeueing failed ones, until SIGINT/SIGTERM or the channel closes.
//!
//! Usage: `basekit-consumer <config.yaml>`

use basekit_service::{run_process, ConsumerWorkload};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    run_process("basekit-consumer", Box::new(ConsumerWorkload)).await
}
