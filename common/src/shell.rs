//! Shell command execution, local or over a persistent ssh session
//!
//! Every remote query the tools make (size probes, file listings, checksums,
//! existence checks) funnels through [`RemoteShell`]. The `localhost` host
//! sentinel selects the local shell so the same call sites work without a
//! remote hop.

use anyhow::{Context, bail};
use std::sync::Arc;

/// Host literal that means "no remote hop"
pub const LOCAL_HOST: &str = "localhost";

/// Escape a string for safe embedding in a `sh -c` command line
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Executes `sh -c` commands either locally or on a remote host
///
/// The ssh session is established once at startup and reused for every
/// query; transfers themselves tunnel through rsync's own `-e ssh`.
#[derive(Debug, Clone)]
pub enum RemoteShell {
    Local,
    Ssh {
        host: String,
        session: Arc<openssh::Session>,
    },
}

impl RemoteShell {
    /// Connect to `host`, or return the local variant for the
    /// [`LOCAL_HOST`] sentinel
    ///
    /// Accepts the usual `user@host` form; relies on key-based auth being
    /// configured (ssh is never given a chance to prompt).
    pub async fn connect(host: &str) -> anyhow::Result<Self> {
        if host == LOCAL_HOST {
            return Ok(Self::Local);
        }
        let destination = format!("ssh://{host}");
        tracing::debug!("Connecting to SSH destination: {}", destination);
        let session = Arc::new(
            openssh::Session::connect(destination, openssh::KnownHosts::Accept)
                .await
                .with_context(|| format!("failed to establish SSH connection to '{host}'"))?,
        );
        Ok(Self::Ssh {
            host: host.to_string(),
            session,
        })
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    /// The ssh host to hand to rsync's `-e ssh`, if any
    pub fn ssh_host(&self) -> Option<&str> {
        match self {
            Self::Local => None,
            Self::Ssh { host, .. } => Some(host),
        }
    }

    /// Run `cmd` on the destination side and return its trimmed stdout
    ///
    /// A non-zero exit is an explicit error carrying the captured stderr;
    /// callers that tolerate failure (e.g. the bandwidth poll) handle the
    /// `Err` rather than treating empty output as a value.
    pub async fn output(&self, cmd: &str) -> anyhow::Result<String> {
        let output = match self {
            Self::Local => tokio::process::Command::new("sh")
                .arg("-c")
                .arg(cmd)
                .output()
                .await
                .with_context(|| format!("failed to spawn local command: {cmd}"))?,
            Self::Ssh { host, session } => session
                .command("sh")
                .arg("-c")
                .arg(cmd)
                .output()
                .await
                .with_context(|| format!("failed to run command on '{host}': {cmd}"))?,
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "command failed with {:?}: {}\nstderr: {}",
                output.status.code(),
                cmd,
                stderr.trim()
            );
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.trim().to_string())
    }

    /// Run `cmd` in the local shell regardless of the configured host
    ///
    /// Used for source-side queries (total size, source checksums).
    pub async fn local_output(cmd: &str) -> anyhow::Result<String> {
        Self::Local.output(cmd).await
    }
}
