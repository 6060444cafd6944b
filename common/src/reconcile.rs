//! Reconciliation pass (verification mode)
//!
//! Compares full source/destination file listings, reports missing files
//! with an optional repair step, then verifies per-file checksums: SHA-256
//! computed locally on the source against `sha256sum` run on the
//! destination. Mismatches are reported, never auto-repaired.

use anyhow::Context;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::config::TransferSettings;
use crate::monitor;
use crate::shell::{RemoteShell, shell_escape};
use crate::transfer::{JobContext, Task, TransferJob, start_pool};

/// Structured listing of all files below a root, as normalized relative paths
///
/// The shell-based [`FindLister`] is the one concrete adapter today; the
/// trait keeps the pass testable and leaves room for a native listing
/// protocol later.
#[allow(async_fn_in_trait)]
pub trait FileLister {
    async fn list_files(&self, root: &str) -> anyhow::Result<BTreeSet<String>>;
}

/// Lists files by shelling out to `find <root> -type f`
#[derive(Debug, Clone)]
pub struct FindLister {
    shell: RemoteShell,
}

impl FindLister {
    pub fn new(shell: RemoteShell) -> Self {
        Self { shell }
    }
}

impl FileLister for FindLister {
    async fn list_files(&self, root: &str) -> anyhow::Result<BTreeSet<String>> {
        let output = self
            .shell
            .output(&format!("find {} -type f", shell_escape(root)))
            .await
            .with_context(|| format!("failed to list files under '{root}'"))?;
        Ok(output
            .lines()
            .filter_map(|line| normalize_relative(root, line))
            .filter(|rel| !has_hidden_component(rel))
            .collect())
    }
}

/// Strip the listing root from one `find` output line
fn normalize_relative(root: &str, line: &str) -> Option<String> {
    let rel = line
        .trim()
        .strip_prefix(root.trim_end_matches('/'))?
        .trim_start_matches('/');
    if rel.is_empty() {
        return None;
    }
    Some(rel.to_string())
}

/// Whether any path component uses the hidden-file marker convention
///
/// The walker never enqueues hidden entries, so they are excluded from
/// verification on both sides for a consistent view.
fn has_hidden_component(rel: &str) -> bool {
    rel.split('/').any(|component| component.starts_with('.'))
}

/// Paths present in the source listing but absent from the destination
pub fn missing_set(src: &BTreeSet<String>, dst: &BTreeSet<String>) -> BTreeSet<String> {
    src.difference(dst).cloned().collect()
}

/// Compute the SHA-256 digest of a local file, hex encoded
pub async fn local_sha256(path: &std::path::Path) -> anyhow::Result<String> {
    use sha2::{Digest, Sha256};
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {path:?} for checksumming"))?;
    Ok(hex::encode(Sha256::digest(&data)))
}

/// Run `sha256sum` on the destination side and return the hex digest
pub async fn remote_sha256(shell: &RemoteShell, path: &str) -> anyhow::Result<String> {
    let output = shell
        .output(&format!("sha256sum {}", shell_escape(path)))
        .await?;
    // sha256sum output format: "checksum filename"
    Ok(output
        .split_whitespace()
        .next()
        .context("unexpected sha256sum output format")?
        .to_ascii_lowercase())
}

/// Decides whether a missing file should be transferred immediately
pub trait RepairPrompt {
    fn confirm(&mut self, path: &str) -> bool;
}

/// Fixed yes/no policy for non-interactive runs
#[derive(Debug, Clone, Copy)]
pub struct AutoRepair(pub bool);

impl RepairPrompt for AutoRepair {
    fn confirm(&mut self, _path: &str) -> bool {
        self.0
    }
}

/// Asks y/N on stdin for each missing file
#[derive(Debug, Default)]
pub struct InteractivePrompt;

impl RepairPrompt for InteractivePrompt {
    fn confirm(&mut self, path: &str) -> bool {
        use std::io::Write;
        print!("transfer missing file '{path}' now? [y/N] ");
        if std::io::stdout().flush().is_err() {
            return false;
        }
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "y" | "Y" | "yes")
    }
}

/// A unit of work comparing one file's checksum between source and destination
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyJob {
    pub src: std::path::PathBuf,
    pub dst: String,
}

impl VerifyJob {
    pub async fn run(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let src_digest = local_sha256(&self.src).await?;
        let dst_digest = remote_sha256(&ctx.shell, &self.dst).await?;
        if src_digest == dst_digest {
            ctx.stats.verified.fetch_add(1, Ordering::Relaxed);
            tracing::info!("checksum OK: {} ({})", self.src.display(), src_digest);
        } else {
            ctx.stats.mismatched.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                "checksum mismatch: {} (source {}, destination {})",
                self.src.display(),
                src_digest,
                dst_digest
            );
        }
        Ok(())
    }
}

/// Verification mode: listings, missing-file repair, then per-file checksums
///
/// Assumes the main transfer already completed; a total-size drift is only
/// a warning.
pub async fn run_reconciliation(
    ctx: Arc<JobContext>,
    settings: TransferSettings,
    src_root: &std::path::Path,
    prompt: &mut dyn RepairPrompt,
) -> anyhow::Result<()> {
    let src_root_str = src_root
        .to_str()
        .with_context(|| format!("source path {src_root:?} is not valid UTF-8"))?;
    let src_kib = monitor::measure_baseline(src_root).await?;
    match monitor::sample_size_kib(&ctx.shell, &ctx.dest.root).await {
        Ok(dst_kib) if dst_kib != src_kib => tracing::warn!(
            "source and destination sizes differ: {} vs {}",
            bytesize::ByteSize(src_kib * 1024),
            bytesize::ByteSize(dst_kib * 1024)
        ),
        Ok(_) => {}
        Err(error) => tracing::warn!("could not measure destination size: {:#}", error),
    }
    let src_files = FindLister::new(RemoteShell::Local)
        .list_files(src_root_str)
        .await?;
    let dst_files = FindLister::new(ctx.shell.clone())
        .list_files(&ctx.dest.root)
        .await?;
    // workers start before the first task is enqueued
    let queue = start_pool(&ctx, &settings);
    let missing = missing_set(&src_files, &dst_files);
    let mut repairs_attempted = false;
    for rel in &missing {
        ctx.stats.missing.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("missing on destination: {}", rel);
        // the interactive prompt blocks on stdin, keep it off the workers
        if tokio::task::block_in_place(|| prompt.confirm(rel)) {
            queue.put(Task::Repair(TransferJob::new(
                src_root,
                &src_root.join(rel),
            )?));
            repairs_attempted = true;
        }
    }
    queue.join().await?;
    // a repair transfer can itself fail; verify only what the destination
    // actually holds now, files still absent stay reported as missing
    let dst_files = if repairs_attempted {
        FindLister::new(ctx.shell.clone())
            .list_files(&ctx.dest.root)
            .await?
    } else {
        dst_files
    };
    for rel in &src_files {
        if !dst_files.contains(rel) {
            continue;
        }
        queue.put(Task::Verify(VerifyJob {
            src: src_root.join(rel),
            dst: format!("{}{}", ctx.dest.root, rel),
        }));
    }
    queue.join().await
}
