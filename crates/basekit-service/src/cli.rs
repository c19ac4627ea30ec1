//! Command-line arguments shared by the service binaries.

use basekit_core::ConfigPath;
use clap::Parser;
use std::path::PathBuf;

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;

/// Run a basekit process from a YAML configuration file
#[derive(Debug, Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a basekit process from a YAML configuration file")]
pub struct ConfigArgs {
    /// Path to the YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,
}

impl ConfigArgs {
    pub fn config_path(&self) -> ConfigPath {
        ConfigPath::new(self.config.clone())
    }
}
