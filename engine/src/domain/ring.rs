//! Output ring buffer
//! Fixed-capacity FIFO of recent stdout/stderr lines; the writer never blocks.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Bounded FIFO of output lines with eviction on overflow
#[derive(Debug)]
pub struct OutputRing {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl OutputRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a line, evicting the oldest one when full
    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().unwrap().iter().cloned().collect()
    }

    /// Copy of the most recent `count` lines, oldest first
    pub fn tail(&self, count: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap();
        let skip = lines.len().saturating_sub(count);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_snapshot() {
        let ring = OutputRing::new(4);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.snapshot(), vec!["a", "b"]);
    }

    #[test]
    fn test_eviction_is_fifo() {
        let ring = OutputRing::new(1000);
        for i in 0..1001 {
            ring.push(format!("line {}", i));
        }
        let lines = ring.snapshot();
        assert_eq!(lines.len(), 1000);
        // Line 0 was evicted by line 1000
        assert_eq!(lines.first().map(String::as_str), Some("line 1"));
        assert_eq!(lines.last().map(String::as_str), Some("line 1000"));
    }

    #[test]
    fn test_tail() {
        let ring = OutputRing::new(10);
        for i in 0..5 {
            ring.push(format!("{}", i));
        }
        assert_eq!(ring.tail(2), vec!["3", "4"]);
        assert_eq!(ring.tail(100).len(), 5);
    }

    #[test]
    fn test_clear() {
        let ring = OutputRing::new(4);
        ring.push("x");
        ring.clear();
        assert!(ring.is_empty());
    }
}
