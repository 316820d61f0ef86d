//! bachvm binary
//!
//! Builds an in-memory ledger with a few demo contracts, runs one synthetic
//! batch through the VM worker pool and prints the pool statistics as JSON.

mod cli;
mod demo;

use anyhow::{bail, Result};
use bach_vm::{MemoryLedger, WorkerPool};
use cli::Cli;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize tracing; stdout is reserved for the stats output
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = cli.resolve_config()?;
    tracing::info!(
        workers = config.worker_count,
        txs = cli.txs,
        "bachvm starting..."
    );

    let ledger = Arc::new(MemoryLedger::new());
    demo::seed_ledger(&ledger)?;

    let mut pool = WorkerPool::new(config, ledger.clone(), &demo::backends)?;

    let started = Instant::now();
    let report = pool.execute_batch(demo::workload(cli.txs))?;
    let elapsed = started.elapsed();

    tracing::info!(
        txs = report.len(),
        failed = report.failed(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Batch committed"
    );

    let order = ledger.commit_order();
    if order.iter().enumerate().any(|(expected, idx)| expected != *idx) {
        bail!("commits arrived out of order");
    }
    if let Some((idx, err)) = report.first_callback_error() {
        bail!("commit of tx {idx} failed: {err}");
    }

    println!("{}", pool.snapshot().to_json()?);

    pool.shutdown();
    tracing::info!("bachvm stopped");

    Ok(())
}
