//! CLI argument parsing for bachvm

use bach_vm::{ConfigError, VmConfig};
use clap::Parser;
use std::path::PathBuf;

/// BachLedger VM dispatch engine runner
#[derive(Parser, Debug, Clone)]
#[command(name = "bachvm")]
#[command(about = "Run a synthetic batch through the BachLedger VM dispatch engine")]
#[command(version)]
pub struct Cli {
    /// VM config file (JSON); flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of parallel workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Warn when an ordering gate wait exceeds this many milliseconds
    #[arg(long)]
    pub watchdog_ms: Option<u64>,

    /// Number of transactions in the synthetic batch
    #[arg(long, default_value = "1000")]
    pub txs: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Load the config file, if any, and apply flag overrides
    pub fn resolve_config(&self) -> Result<VmConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => VmConfig::load(path)?,
            None => VmConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.worker_count = workers;
        }
        if let Some(ms) = self.watchdog_ms {
            config.gate_watchdog_ms = Some(ms);
        }
        config.validate()?;
        Ok(config)
    }
}
