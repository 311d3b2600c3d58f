use std::path::PathBuf;
use std::time::Duration;

pub struct NodeConfig {
    /// Directory for per-stream journal files. `None` runs the store
    /// memory-only.
    pub journal_dir: Option<PathBuf>,
    /// Upper bound on concurrently parked `read_new` callers.
    pub max_blocking_reads: usize,
    /// Server-side clamp applied to client-supplied sync timeouts.
    pub min_sync_timeout: Duration,
    pub max_sync_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            journal_dir: None,
            max_blocking_reads: 256,
            min_sync_timeout: Duration::ZERO,
            max_sync_timeout: Duration::from_secs(30),
        }
    }
}
