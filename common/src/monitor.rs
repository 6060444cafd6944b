//! Bandwidth monitor
//!
//! A read-only observer of the destination: once the total source size is
//! measured (fatal on failure, it is the percent denominator for the whole
//! run), a background loop polls the destination size on a fixed cadence
//! and renders a single overwritten progress line. Failed polls are skipped
//! without advancing the delta baseline, but are counted and surfaced as a
//! "sampling degraded" message rather than silently swallowed.

use anyhow::Context;
use bytesize::ByteSize;
use std::sync::{Arc, Mutex, OnceLock};

use crate::shell::{RemoteShell, shell_escape};

/// Tracing writer that suspends the progress bar around each log line
///
/// The progress bar and the log stream both render on stderr; routing log
/// writes through [`indicatif::ProgressBar::suspend`] keeps a worker's log
/// line from tearing a partially drawn progress line.
#[derive(Clone, Default)]
pub struct ProgressWriter {
    bar: Arc<Mutex<Option<indicatif::ProgressBar>>>,
}

impl ProgressWriter {
    pub fn attach(&self, bar: indicatif::ProgressBar) {
        *self.bar.lock().unwrap() = Some(bar);
    }

    pub fn detach(&self) {
        *self.bar.lock().unwrap() = None;
    }
}

impl std::io::Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        use std::io::Write as _;
        let bar = self.bar.lock().unwrap().clone();
        match bar {
            Some(bar) => bar.suspend(|| std::io::stderr().write(buf)),
            None => std::io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        use std::io::Write as _;
        std::io::stderr().flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for ProgressWriter {
    type Writer = ProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

static LOG_WRITER: OnceLock<ProgressWriter> = OnceLock::new();

/// The process-wide log writer the tracing subscriber renders through
pub fn log_writer() -> ProgressWriter {
    LOG_WRITER.get_or_init(ProgressWriter::default).clone()
}

/// Parse `du -sk` output into a size in KiB
pub fn parse_du_kib(output: &str) -> anyhow::Result<u64> {
    output
        .split_whitespace()
        .next()
        .context("empty du output")?
        .parse::<u64>()
        .context("unparsable du output")
}

/// Percent of `total_kib` completed, floored and clamped to [0, 100]
pub fn percent(sample_kib: u64, total_kib: u64) -> u64 {
    if total_kib == 0 {
        return 100;
    }
    (sample_kib.saturating_mul(100) / total_kib).min(100)
}

/// Measure the full source size; the completion denominator for the run
///
/// Runs locally regardless of the configured host. The source may keep
/// changing mid-run, in which case the percentage drifts; this is accepted,
/// not corrected.
pub async fn measure_baseline(src_root: &std::path::Path) -> anyhow::Result<u64> {
    let path = src_root
        .to_str()
        .with_context(|| format!("source path {src_root:?} is not valid UTF-8"))?;
    let output = RemoteShell::local_output(&format!("du -sk {}", shell_escape(path)))
        .await
        .context("failed to measure total source size")?;
    parse_du_kib(&output)
}

/// Sample the cumulative destination size through the destination shell
pub async fn sample_size_kib(shell: &RemoteShell, dest_root: &str) -> anyhow::Result<u64> {
    let output = shell
        .output(&format!("du -sk {}", shell_escape(dest_root)))
        .await?;
    parse_du_kib(&output)
}

/// One successful observation of the destination size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub percent: u64,
    /// Instantaneous throughput since the previous successful sample
    pub rate_bytes_per_sec: Option<f64>,
}

/// Owns the sampling state: the baseline total and the previous sample
///
/// The previous sample only advances on success, so a missed poll does not
/// distort the next delta.
#[derive(Debug)]
pub struct Monitor {
    total_kib: u64,
    prev: Option<(std::time::Instant, u64)>,
    failed_polls: u32,
}

impl Monitor {
    pub fn new(total_kib: u64) -> Self {
        Self {
            total_kib,
            prev: None,
            failed_polls: 0,
        }
    }

    /// Record a successful size sample taken at `now`
    pub fn observe(&mut self, now: std::time::Instant, sample_kib: u64) -> Sample {
        let rate_bytes_per_sec = self.prev.map(|(prev_time, prev_kib)| {
            let elapsed = (now - prev_time).as_secs_f64();
            let delta_bytes = sample_kib.saturating_sub(prev_kib).saturating_mul(1024);
            delta_bytes as f64 / elapsed
        });
        self.prev = Some((now, sample_kib));
        self.failed_polls = 0;
        Sample {
            percent: percent(sample_kib, self.total_kib),
            rate_bytes_per_sec,
        }
    }

    /// Record a failed poll; returns the consecutive failure count
    pub fn record_failure(&mut self) -> u32 {
        self.failed_polls += 1;
        self.failed_polls
    }
}

/// Poll the destination size every `delay` and render the progress line
///
/// Runs until the spawned task is dropped by the orchestrator; it never
/// blocks a transfer worker.
pub async fn run(shell: RemoteShell, dest_root: String, total_kib: u64, delay: std::time::Duration) {
    let bar = indicatif::ProgressBar::new(total_kib.saturating_mul(1024));
    bar.set_style(
        indicatif::ProgressStyle::with_template(
            "[pmv] {bytes}/{total_bytes} ({percent}%) {msg}",
        )
        .expect("progress template must be valid"),
    );
    log_writer().attach(bar.clone());
    let mut monitor = Monitor::new(total_kib);
    loop {
        tokio::time::sleep(delay).await;
        match sample_size_kib(&shell, &dest_root).await {
            Ok(sample_kib) => {
                let sample = monitor.observe(std::time::Instant::now(), sample_kib);
                bar.set_position(sample_kib.saturating_mul(1024));
                if let Some(rate) = sample.rate_bytes_per_sec {
                    bar.set_message(format!("{}/s", ByteSize(rate as u64)));
                }
                tracing::debug!(
                    "transferred size {} ({} %)",
                    ByteSize(sample_kib * 1024),
                    sample.percent
                );
            }
            Err(error) => {
                let failures = monitor.record_failure();
                bar.set_message(format!("sampling degraded ({failures} failed polls)"));
                tracing::debug!("destination size poll failed: {:#}", error);
            }
        }
    }
}
