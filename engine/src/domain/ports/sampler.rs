//! ResourceSampler port
//! Reads CPU/memory/thread/handle usage for one OS process.

use crate::domain::ResourceSnapshot;

/// Resource usage reader for live processes
pub trait ResourceSampler: Send + Sync {
    /// Sample the process, or `None` when it cannot be observed (already
    /// exited, insufficient permissions)
    fn sample(&self, pid: u32) -> Option<ResourceSnapshot>;
}
