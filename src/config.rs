use anyhow::{bail, Result};
use std::time::Duration;

/// Default per-connection buffer size
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Smallest buffer that still holds a request line and a boundary terminator
pub const MIN_BUFFER_CAPACITY: usize = 256;

/// Default number of query parameter slots per request
pub const DEFAULT_MAX_QUERY_PARAMS: usize = 5;

/// Default time a single read may wait for the peer
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounds for the ingestion core, shared by every connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    pub buffer_capacity: usize,
    pub max_query_params: usize,
    /// Longest wait for any one read. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_query_params: DEFAULT_MAX_QUERY_PARAMS,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity < MIN_BUFFER_CAPACITY {
            bail!(
                "Buffer size {} is below the minimum of {} bytes",
                self.buffer_capacity,
                MIN_BUFFER_CAPACITY
            );
        }
        if self.max_query_params == 0 {
            bail!("At least one query parameter slot is required");
        }
        if self.idle_timeout == Some(Duration::ZERO) {
            bail!("Idle timeout must be positive; leave it unset to disable");
        }
        Ok(())
    }
}
