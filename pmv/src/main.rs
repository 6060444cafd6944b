use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::sync::atomic::Ordering;

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum RepairMode {
    /// Prompt y/N for each missing file
    Ask,
    /// Transfer every missing file without asking
    Always,
    /// Only report missing files
    Never,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pmv",
    version,
    about = "Move a directory tree in parallel rsync streams",
    long_about = "`pmv` walks a local directory tree and mirrors it to a destination host
across a bounded number of parallel rsync streams, reporting live
aggregate throughput while the transfers run.

Requires password-less (key-based) ssh auth to the target host, and
rsync, du, find and sha256sum available in the remote shell's PATH.
Pass \"localhost\" as the host to move without a remote hop.

EXIT CODES:
    154 - transfer mode completed (historic sentinel 666 mod 256)
    0   - checksum mode: no mismatches and nothing missing
    1   - checksum mode: mismatches, failed repair/verify tasks, or
          missing files left unrepaired (declined files are reported
          but not checksummed)
    3   - destination path does not exist on host
    2   - any other error

EXAMPLES:
    # Move /data/foo to backup:/tank/foo over 8 parallel streams
    pmv /data/foo backup /tank -n 8

    # Rehearse without copying anything
    pmv /data/foo backup /tank --dry-run

    # Verify a finished move, repairing missing files without prompting
    pmv /data/foo backup /tank --checksum --repair always"
)]
struct Args {
    // Transfer options
    /// Number of parallel transfer streams
    #[arg(
        short = 'n',
        long = "parallel-streams",
        default_value = "1",
        value_name = "N",
        help_heading = "Transfer options"
    )]
    parallel_streams: usize,

    /// Depth of folder recursion; subtrees deeper than this are handed
    /// whole to rsync as one task
    #[arg(
        long,
        default_value = "1",
        value_name = "N",
        help_heading = "Transfer options"
    )]
    level: usize,

    /// Forward --dry-run to rsync and skip the bandwidth monitor
    #[arg(long, help_heading = "Transfer options")]
    dry_run: bool,

    /// Abort the whole run on the first task failure instead of logging
    /// and continuing
    #[arg(long, help_heading = "Transfer options")]
    abort_on_first_failure: bool,

    // Verification
    /// Reconcile and checksum-verify a finished move instead of transferring
    #[arg(long, help_heading = "Verification")]
    checksum: bool,

    /// What to do with files missing on the destination (checksum mode)
    #[arg(
        long,
        value_enum,
        default_value = "ask",
        value_name = "POLICY",
        help_heading = "Verification"
    )]
    repair: RepairMode,

    // Progress & output
    /// Seconds between bandwidth samples
    #[arg(
        long,
        default_value = "5",
        value_name = "SECONDS",
        help_heading = "Progress & output"
    )]
    timeout: u64,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: WARN)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary counters at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, suppress log output
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of runtime worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    // ARGUMENTS
    /// Path of the source folder
    #[arg()]
    src: std::path::PathBuf,

    /// ssh destination, [user@]hostname ("localhost" for no remote hop)
    #[arg()]
    host: String,

    /// Path of the destination folder on the host
    #[arg()]
    dst: String,
}

struct RunOutcome {
    checksum_mode: bool,
    stats: Arc<common::RunStats>,
}

async fn async_main(args: Args) -> Result<RunOutcome> {
    let settings = common::TransferSettings {
        parallel_streams: args.parallel_streams,
        level: args.level,
        dry_run: args.dry_run,
        abort_on_first_failure: args.abort_on_first_failure,
    };
    settings.validate().map_err(|msg| anyhow::anyhow!(msg))?;
    let src_root = std::path::absolute(&args.src)?;
    let shell = common::RemoteShell::connect(&args.host).await?;
    let dest = common::Destination::resolve(&shell, &args.dst, &src_root).await?;
    tracing::info!("{} -> {}:{}", src_root.display(), args.host, dest.root);
    let stats = Arc::new(common::RunStats::default());
    let ctx = Arc::new(common::transfer::JobContext {
        shell,
        dest,
        dry_run: args.dry_run,
        stats: stats.clone(),
    });
    if args.checksum {
        let mut prompt: Box<dyn common::reconcile::RepairPrompt> = match args.repair {
            RepairMode::Ask => Box::new(common::reconcile::InteractivePrompt),
            RepairMode::Always => Box::new(common::reconcile::AutoRepair(true)),
            RepairMode::Never => Box::new(common::reconcile::AutoRepair(false)),
        };
        common::reconcile::run_reconciliation(ctx, settings, &src_root, prompt.as_mut()).await?;
    } else {
        common::transfer::run_transfer(
            ctx,
            settings,
            &src_root,
            std::time::Duration::from_secs(args.timeout),
        )
        .await?;
    }
    Ok(RunOutcome {
        checksum_mode: args.checksum,
        stats,
    })
}

fn main() {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary || args.verbose > 0,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
    };
    match common::run(&output, &runtime, func) {
        Ok(outcome) => {
            if output.print_summary && !args.quiet {
                println!("{}", outcome.stats);
            }
            if outcome.checksum_mode {
                let mismatched = outcome.stats.mismatched.load(Ordering::Relaxed);
                let failed = outcome.stats.failed.load(Ordering::Relaxed);
                let missing = outcome.stats.missing.load(Ordering::Relaxed);
                let repaired = outcome.stats.repaired.load(Ordering::Relaxed);
                if mismatched > 0 || failed > 0 || missing > repaired {
                    std::process::exit(1);
                }
                std::process::exit(0);
            }
            std::process::exit(common::EXIT_TRANSFER_COMPLETE);
        }
        Err(error) => {
            if error.downcast_ref::<common::DestinationError>().is_some() {
                std::process::exit(common::EXIT_MISSING_DESTINATION);
            }
            std::process::exit(common::EXIT_ERROR);
        }
    }
}
