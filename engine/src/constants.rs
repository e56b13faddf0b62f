//! Supervisor constants
//!
//! Defaults shared between the config layer and the components.

/// Exit code indicating successful process termination
pub const SUCCESS_EXIT_CODE: i32 = 0;

/// Capacity of the stdout/stderr ring buffers (lines)
pub const OUTPUT_RING_CAPACITY: usize = 1000;

/// Capacity of the per-handle notification channels
pub const NOTIFY_CHANNEL_CAPACITY: usize = 256;

/// Capacity of a bus subscription queue
pub const BUS_CHANNEL_CAPACITY: usize = 256;

/// Default delay before an automatic restart after a crash (milliseconds)
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1000;

/// Default number of restart attempts before the cooldown kicks in
pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 3;

/// Default cooldown after restart attempts are exhausted (seconds)
pub const DEFAULT_RESTART_COOLDOWN_SECS: u64 = 300;

/// Default CPU warning threshold (percent of all cores)
pub const DEFAULT_CPU_WARN_PCT: f64 = 85.0;

/// Default memory warning threshold (bytes)
pub const DEFAULT_MEM_WARN_BYTES: u64 = 512 * 1024 * 1024;

/// Default health sampling interval (seconds)
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;

/// Default number of spawn attempts before `Start` gives up
pub const DEFAULT_MAX_START_ATTEMPTS: u32 = 3;

/// Exponential backoff base for start retries
pub const START_BACKOFF_BASE: u64 = 2;

/// Default graceful stop / shutdown timeout (seconds)
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default supervisor maintenance tick interval (seconds)
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 30;

/// Metric samples older than this are pruned (hours)
pub const METRICS_RETENTION_HOURS: i64 = 24;

/// Multiplier over a warning threshold that triggers restart consideration
pub const RESTART_THRESHOLD_FACTOR: f64 = 1.5;
