//! Destination resolution and startup validation
//!
//! The destination root is resolved exactly once, before any task executes,
//! and never changes for the duration of the run.

use anyhow::Context;

use crate::shell::{LOCAL_HOST, RemoteShell, shell_escape};

/// Errors detected while validating the destination during startup
#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    #[error("destination path '{path}' does not exist on host '{host}'")]
    Missing { path: String, host: String },
}

/// The resolved destination root for the whole run
///
/// Includes the basename of the source root and a trailing slash so rsync
/// treats it as a directory target.
#[derive(Debug, Clone)]
pub struct Destination {
    pub root: String,
}

impl Destination {
    /// Resolve `raw_dst` on the destination host and append the source basename
    ///
    /// The raw destination is echoed through the destination shell so
    /// remote-side `~` and environment variables expand where they are
    /// defined. Fails with [`DestinationError::Missing`] if the expanded
    /// path is not a directory on the host.
    pub async fn resolve(
        shell: &RemoteShell,
        raw_dst: &str,
        src_root: &std::path::Path,
    ) -> anyhow::Result<Self> {
        let expanded = shell
            .output(&format!("echo {raw_dst}"))
            .await
            .context("failed to expand destination path on host")?;
        if expanded.is_empty() {
            anyhow::bail!("destination path '{raw_dst}' expanded to an empty string");
        }
        let host = shell.ssh_host().unwrap_or(LOCAL_HOST).to_string();
        if shell
            .output(&format!("test -d {}", shell_escape(&expanded)))
            .await
            .is_err()
        {
            return Err(DestinationError::Missing {
                path: expanded,
                host,
            }
            .into());
        }
        let basename = src_root
            .file_name()
            .with_context(|| format!("source path {src_root:?} has no basename"))?
            .to_str()
            .with_context(|| format!("source path {src_root:?} is not valid UTF-8"))?;
        let root = format!("{}/{}/", expanded.trim_end_matches('/'), basename);
        Ok(Self { root })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_root_with_source_basename() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let shell = RemoteShell::Local;
        let src = std::path::Path::new("/data/foo");
        let dest = Destination::resolve(&shell, tmp_dir.path().to_str().unwrap(), src).await?;
        assert_eq!(dest.root, format!("{}/foo/", tmp_dir.path().display()));
        Ok(())
    }

    #[tokio::test]
    async fn expands_shell_variables() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        // SAFETY: test runs single-threaded with respect to this variable
        unsafe { std::env::set_var("PMV_TEST_DEST", tmp_dir.path()) };
        let shell = RemoteShell::Local;
        let src = std::path::Path::new("/data/foo");
        let dest = Destination::resolve(&shell, "$PMV_TEST_DEST", src).await?;
        assert_eq!(dest.root, format!("{}/foo/", tmp_dir.path().display()));
        Ok(())
    }

    #[tokio::test]
    async fn missing_destination_is_typed_error() {
        let shell = RemoteShell::Local;
        let src = std::path::Path::new("/data/foo");
        let err = Destination::resolve(&shell, "/nonexistent/pmv/dest", src)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<DestinationError>().is_some());
    }
}
