//! Internal library for the `pmv` parallel mover
//!
//! `pmv` walks a local directory tree, hands subtrees to rsync across a
//! bounded set of parallel streams, and reports live throughput while the
//! transfers run. This crate holds all of the core machinery:
//!
//! - [`queue`] — the task queue, drain barrier and worker pool
//! - [`walk`] — the tree walker that turns the source into transfer tasks
//! - [`transfer`] — rsync invocation and transfer-mode orchestration
//! - [`monitor`] — the bandwidth monitor polling the destination size
//! - [`reconcile`] — the verification pass (listings, repair, checksums)
//! - [`shell`] — local / ssh command execution
//! - [`dest`] — destination resolution and startup validation

pub mod config;
pub mod dest;
pub mod monitor;
pub mod queue;
pub mod reconcile;
pub mod shell;
pub mod transfer;
pub mod walk;

#[cfg(test)]
mod testutils;

pub use config::{OutputConfig, RuntimeConfig, TransferSettings};
pub use dest::{Destination, DestinationError};
pub use queue::RunStats;
pub use shell::{LOCAL_HOST, RemoteShell};

use anyhow::Context;

/// Exit status for normal completion of transfer mode
///
/// The historic sentinel 666 folded into the 8-bit exit range (666 mod 256).
/// External tooling keys on this value, so plain 0 is deliberately not used.
pub const EXIT_TRANSFER_COMPLETE: i32 = 154;

/// Exit status when the destination path does not exist on the host,
/// detected during startup validation before any task executes
pub const EXIT_MISSING_DESTINATION: i32 = 3;

/// Exit status for any other error
pub const EXIT_ERROR: i32 = 2;

fn init_tracing(output: &OutputConfig) {
    let level = if output.quiet {
        "off"
    } else {
        match output.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    // timestamps are uptime so every line reads as time since process start;
    // log lines render through the progress writer so they never tear a
    // partially drawn progress line
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(monitor::log_writer())
        .try_init();
}

/// Set up tracing, build the tokio runtime and run the tool's async main
pub fn run<Fut, Summary>(
    output: &OutputConfig,
    runtime: &RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> anyhow::Result<Summary>
where
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    init_tracing(output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    let rt = builder.build().context("failed to build tokio runtime")?;
    let result = rt.block_on(func());
    if let Err(error) = &result {
        tracing::error!("{:#}", error);
    }
    result
}
