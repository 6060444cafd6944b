//! Tree walker: turns the source directory into transfer tasks
//!
//! Directories are expanded up to the configured level; anything at or
//! beyond that depth is handed whole to rsync as a single task, which
//! recurses internally. Entries whose name begins with `.` are never
//! enqueued at any depth.

use anyhow::Context;
use async_recursion::async_recursion;
use std::sync::Arc;

use crate::queue::TaskQueue;
use crate::transfer::{Task, TransferJob};

pub async fn populate(
    queue: &Arc<TaskQueue<Task>>,
    root: &std::path::Path,
    level: usize,
) -> anyhow::Result<()> {
    assert!(level > 0);
    walk(queue, root, root, level).await
}

#[async_recursion]
async fn walk(
    queue: &Arc<TaskQueue<Task>>,
    root: &std::path::Path,
    dir: &std::path::Path,
    level: usize,
) -> anyhow::Result<()> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("cannot open directory {dir:?} for reading"))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {dir:?}"))?
    {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .with_context(|| format!("failed reading file type of {path:?}"))?;
        if level > 1 && file_type.is_dir() {
            walk(queue, root, &path, level - 1).await?;
        } else {
            queue.put(Task::Transfer(TransferJob::new(root, &path)?));
        }
    }
    Ok(())
}
