//! Configuration types for runtime and execution settings

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=WARN, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

/// Settings controlling how the transfer run is scheduled
#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    /// Number of parallel transfer streams (workers pulling from the queue)
    pub parallel_streams: usize,
    /// Directory depth at which subtrees are handed whole to rsync
    pub level: usize,
    /// Forward --dry-run to rsync and skip the bandwidth monitor
    pub dry_run: bool,
    /// Stop handing out new tasks after the first task failure
    pub abort_on_first_failure: bool,
}

impl TransferSettings {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.parallel_streams == 0 {
            return Err("parallel-streams must be at least 1".to_string());
        }
        if self.level == 0 {
            return Err("level must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            parallel_streams: 1,
            level: 1,
            dry_run: false,
            abort_on_first_failure: false,
        }
    }
}
