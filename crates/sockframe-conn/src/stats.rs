//! Optional execution statistics for connection completion handlers.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Aggregated timings for one named operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    /// Number of recorded executions.
    pub count: u64,
    /// Total time spent, in microseconds.
    pub cumulative_us: u64,
    /// Longest single execution, in microseconds.
    pub max_us: u64,
}

impl OperationStats {
    fn record(&mut self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        self.count += 1;
        self.cumulative_us = self.cumulative_us.saturating_add(us);
        self.max_us = self.max_us.max(us);
    }
}

/// Per-operation execution table. Recording is a no-op when disabled.
#[derive(Debug)]
pub struct EventStats {
    enabled: bool,
    table: Mutex<BTreeMap<&'static str, OperationStats>>,
}

impl EventStats {
    /// Create a table; `enabled == false` makes every recording free.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            table: Mutex::new(BTreeMap::new()),
        }
    }

    /// Whether executions are being recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run `f`, recording its wall-clock time under `name` when enabled.
    pub fn record_execution<R>(&self, name: &'static str, f: impl FnOnce() -> R) -> R {
        if !self.enabled {
            return f();
        }
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        self.table
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(name)
            .or_default()
            .record(elapsed);
        result
    }

    /// Copy of the current table.
    pub fn snapshot(&self) -> BTreeMap<&'static str, OperationStats> {
        self.table
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Human-readable dump, one operation per line.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (name, stats) in self.snapshot() {
            let _ = write!(
                out,
                "\n{name}: count={} total={}us max={}us",
                stats.count, stats.cumulative_us, stats.max_us
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_table_stays_empty() {
        let stats = EventStats::new(false);
        assert_eq!(stats.record_execution("op", || 7), 7);
        assert!(stats.snapshot().is_empty());
        assert!(stats.summary().is_empty());
    }

    #[test]
    fn enabled_table_counts_and_tracks_max() {
        let stats = EventStats::new(true);
        stats.record_execution("op", || std::thread::sleep(Duration::from_millis(2)));
        stats.record_execution("op", || ());

        let snapshot = stats.snapshot();
        let op = snapshot["op"];
        assert_eq!(op.count, 2);
        assert!(op.max_us >= 2000);
        assert!(op.cumulative_us >= op.max_us);
        assert!(stats.summary().contains("op: count=2"));
    }
}
