//! Transfer tasks and the transfer-mode orchestration
//!
//! A transfer task hands one subtree to rsync; the relative anchor
//! (`<root>/./<rel>`) makes rsync's `-R` mirror only the structure below
//! the source root. Tasks execute exactly once, never retry, and a failure
//! affects no other subtree under the default policy.

use anyhow::{Context, bail};
use std::sync::Arc;

use crate::config::TransferSettings;
use crate::dest::Destination;
use crate::monitor;
use crate::queue::{RunStats, TaskQueue, spawn_workers};
use crate::reconcile::VerifyJob;
use crate::shell::RemoteShell;
use crate::walk;

/// Shared, immutable context every task executes against
#[derive(Debug)]
pub struct JobContext {
    pub shell: RemoteShell,
    pub dest: Destination,
    pub dry_run: bool,
    pub stats: Arc<RunStats>,
}

impl JobContext {
    fn ssh_host(&self) -> Option<&str> {
        self.shell.ssh_host()
    }
}

/// One subtree to mirror to the destination
#[derive(Debug, Clone, PartialEq)]
pub struct TransferJob {
    /// rsync relative-path anchor: `<source root>/./<relative path>`
    pub anchor: String,
}

impl TransferJob {
    pub fn new(root: &std::path::Path, path: &std::path::Path) -> anyhow::Result<Self> {
        let rel = path
            .strip_prefix(root)
            .with_context(|| format!("path {path:?} is not under source root {root:?}"))?;
        Ok(Self {
            anchor: format!("{}/./{}", root.display(), rel.display()),
        })
    }

    /// The full rsync argv for this task
    pub fn command(&self, ctx: &JobContext) -> Vec<String> {
        self.command_with(ctx.ssh_host(), &ctx.dest.root, ctx.dry_run)
    }

    fn command_with(&self, ssh_host: Option<&str>, dest_root: &str, dry_run: bool) -> Vec<String> {
        let mut cmd = vec![
            "rsync".to_string(),
            "-aczR".to_string(),
            "-pgot".to_string(),
            "--partial".to_string(),
        ];
        if dry_run {
            cmd.push("--dry-run".to_string());
        }
        cmd.push(self.anchor.clone());
        match ssh_host {
            None => cmd.push(dest_root.to_string()),
            Some(host) => {
                cmd.push("-e".to_string());
                cmd.push("ssh".to_string());
                // the remote side word-splits the path, spaces need escaping
                cmd.push(format!("{}:{}", host, dest_root.replace(' ', "\\ ")));
            }
        }
        cmd
    }

    pub async fn run(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let cmd = self.command(ctx);
        tracing::info!("starting transfer of {}", self.anchor);
        tracing::debug!("{}", cmd.join(" "));
        let output = tokio::process::Command::new(&cmd[0])
            .args(&cmd[1..])
            .output()
            .await
            .context("failed to spawn rsync")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "rsync exited with {:?}: {}\nstderr: {}",
                output.status.code(),
                cmd.join(" "),
                stderr.trim()
            );
        }
        Ok(())
    }
}

/// A unit of work consumed exactly once by any worker
#[derive(Debug)]
pub enum Task {
    Transfer(TransferJob),
    /// A transfer re-enqueued for a file missing on the destination;
    /// counts as repaired only once the transfer succeeded
    Repair(TransferJob),
    Verify(VerifyJob),
}

impl Task {
    pub async fn run(&self, ctx: &JobContext) -> anyhow::Result<()> {
        match self {
            Task::Transfer(job) => job.run(ctx).await,
            Task::Repair(job) => {
                job.run(ctx).await?;
                ctx.stats
                    .repaired
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Ok(())
            }
            Task::Verify(job) => job.run(ctx).await,
        }
    }
}

/// Start the worker pool for `ctx` with `parallel_streams` workers
pub fn start_pool(
    ctx: &Arc<JobContext>,
    settings: &TransferSettings,
) -> Arc<TaskQueue<Task>> {
    let queue = Arc::new(TaskQueue::new());
    let exec = {
        let ctx = ctx.clone();
        move |task: Task| {
            let ctx = ctx.clone();
            async move { task.run(&ctx).await }
        }
    };
    spawn_workers(
        &queue,
        &ctx.stats,
        settings.parallel_streams,
        settings.abort_on_first_failure,
        exec,
    );
    queue
}

/// Transfer mode: walk the source, run the pool to drain, monitor alongside
pub async fn run_transfer(
    ctx: Arc<JobContext>,
    settings: TransferSettings,
    src_root: &std::path::Path,
    poll_delay: std::time::Duration,
) -> anyhow::Result<()> {
    // workers start before the first task is enqueued
    let queue = start_pool(&ctx, &settings);
    let monitor_task = if settings.dry_run {
        None
    } else {
        let total_kib = monitor::measure_baseline(src_root).await?;
        tracing::info!("total size {}", bytesize::ByteSize(total_kib * 1024));
        Some(tokio::spawn(monitor::run(
            ctx.shell.clone(),
            ctx.dest.root.clone(),
            total_kib,
            poll_delay,
        )))
    };
    walk::populate(&queue, src_root, settings.level).await?;
    let result = queue.join().await;
    if let Some(task) = monitor_task {
        task.abort();
        monitor::log_writer().detach();
    }
    result
}
