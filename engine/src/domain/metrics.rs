//! Resource metric records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw reading from the resource sampler (no identity attached)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceSnapshot {
    /// Percent of total machine CPU, rounded to two decimals
    pub cpu_pct: f64,
    /// Resident set size
    pub memory_bytes: u64,
    pub thread_count: u32,
    pub handle_count: u32,
}

/// An immutable metric sample for one supervised process.
/// Retained for at most 24 hours.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub process_id: String,
    pub cpu_pct: f64,
    pub memory_bytes: u64,
    pub thread_count: u32,
    pub handle_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn from_snapshot(process_id: impl Into<String>, snapshot: ResourceSnapshot) -> Self {
        Self {
            process_id: process_id.into(),
            cpu_pct: snapshot.cpu_pct,
            memory_bytes: snapshot.memory_bytes,
            thread_count: snapshot.thread_count,
            handle_count: snapshot.handle_count,
            timestamp: Utc::now(),
        }
    }
}

/// Round a CPU percentage to two decimals
pub fn round_cpu_pct(raw: f64) -> f64 {
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_cpu_pct() {
        assert_eq!(round_cpu_pct(12.3456), 12.35);
        assert_eq!(round_cpu_pct(0.004), 0.0);
        assert_eq!(round_cpu_pct(99.999), 100.0);
    }

    #[test]
    fn test_sample_from_snapshot() {
        let snap = ResourceSnapshot {
            cpu_pct: 1.25,
            memory_bytes: 4096,
            thread_count: 3,
            handle_count: 12,
        };
        let sample = MetricSample::from_snapshot("web", snap);
        assert_eq!(sample.process_id, "web");
        assert_eq!(sample.cpu_pct, 1.25);
        assert_eq!(sample.memory_bytes, 4096);
    }
}
