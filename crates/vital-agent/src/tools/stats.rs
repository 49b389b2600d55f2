//! Process-wide per-tool performance counters.
//!
//! Injected into the execution engine as an `Arc<PerformanceTracker>` —
//! never a bare module-level map — so concurrent-access correctness is a
//! contract of this type, not an accident of the scheduler. Updates go
//! through the map's per-key entry lock: increment-and-recompute happens
//! under one shard guard, so two tasks finishing the same tool at the same
//! moment cannot interleave half an update.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;

/// Rolling counters for one tool. Initialized lazily on the tool's first
/// call; lives until process exit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolPerformanceStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub total_execution_time_ms: u64,
    pub average_execution_time_ms: f64,
}

#[derive(Default)]
pub struct PerformanceTracker {
    stats: DashMap<String, ToolPerformanceStats>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one settled call (success, failure, or timeout — timeouts
    /// count as failures).
    pub fn record(&self, tool: &str, success: bool, execution_time_ms: u64) {
        let mut entry = self.stats.entry(tool.to_string()).or_default();
        entry.total_calls += 1;
        if success {
            entry.successful_calls += 1;
        } else {
            entry.failed_calls += 1;
        }
        entry.total_execution_time_ms += execution_time_ms;
        entry.average_execution_time_ms =
            entry.total_execution_time_ms as f64 / entry.total_calls as f64;
    }

    pub fn get(&self, tool: &str) -> Option<ToolPerformanceStats> {
        self.stats.get(tool).map(|s| s.clone())
    }

    /// Point-in-time copy of every tool's counters.
    pub fn snapshot(&self) -> HashMap<String, ToolPerformanceStats> {
        self.stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_stay_consistent() {
        let tracker = PerformanceTracker::new();
        tracker.record("calculator", true, 10);
        tracker.record("calculator", false, 30);
        tracker.record("calculator", true, 20);

        let stats = tracker.get("calculator").unwrap();
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.successful_calls + stats.failed_calls, stats.total_calls);
        assert_eq!(stats.total_execution_time_ms, 60);
        assert!((stats.average_execution_time_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn tools_are_tracked_independently() {
        let tracker = PerformanceTracker::new();
        tracker.record("search", false, 15000);
        tracker.record("calculator", true, 2);

        assert_eq!(tracker.get("search").unwrap().failed_calls, 1);
        assert_eq!(tracker.get("calculator").unwrap().failed_calls, 0);
        assert!(tracker.get("chart").is_none());
        assert_eq!(tracker.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_updates_lose_nothing() {
        let tracker = Arc::new(PerformanceTracker::new());
        let mut handles = Vec::new();
        for worker in 0..8 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50u64 {
                    tracker.record("database", (worker + i) % 2 == 0, 4);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = tracker.get("database").unwrap();
        assert_eq!(stats.total_calls, 400);
        assert_eq!(stats.successful_calls + stats.failed_calls, 400);
        assert_eq!(stats.total_execution_time_ms, 1600);
        assert!((stats.average_execution_time_ms - 4.0).abs() < 1e-9);
    }
}
