// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Synchronous query counters and per-operation timers.
//!
//! Safe for many readers; meant to be mutated by a single consumer (the
//! [`super::AsyncMetricsPipeline`] task), though concurrent writers are sound.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

/// Op type used when the caller passes an empty one
pub const UNKNOWN_OP: &str = "unknown";

#[derive(Debug, Clone, Copy, Default)]
struct OpTotals {
    count: u64,
    total: Duration,
}

/// Aggregate for one operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpStats {
    pub count: u64,
    pub total_time: Duration,
    pub average_time: Duration,
}

/// Point-in-time view of the aggregator.
///
/// Fields are read one after another, so a snapshot taken during a reset may
/// mix old and new values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub db_name: String,
    pub query_stats: BTreeMap<String, OpStats>,
    pub total_queries: u64,
    pub slow_queries: u64,
    pub total_errors: u64,
    pub total_affected_rows: i64,
}

pub struct MetricsAggregator {
    db_name: String,
    durations: DashMap<String, OpTotals>,
    total_queries: AtomicU64,
    slow_queries: AtomicU64,
    errors: AtomicU64,
    affected_rows: AtomicI64,
}

impl MetricsAggregator {
    #[must_use]
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            durations: DashMap::new(),
            total_queries: AtomicU64::new(0),
            slow_queries: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            affected_rows: AtomicI64::new(0),
        }
    }

    #[must_use]
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Count one query and add its duration to `op_type`'s timer.
    pub fn record_query_duration(&self, op_type: &str, duration: Duration) {
        let op_type = if op_type.is_empty() { UNKNOWN_OP } else { op_type };
        self.total_queries.fetch_add(1, Ordering::Relaxed);

        let mut totals = self.durations.entry(op_type.to_string()).or_default();
        totals.count += 1;
        totals.total += duration;
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slow_query(&self) {
        self.slow_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_affected_rows(&self, rows: i64) {
        self.affected_rows.fetch_add(rows, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let query_stats = self
            .durations
            .iter()
            .map(|entry| (entry.key().clone(), to_op_stats(*entry.value())))
            .collect();

        MetricsSnapshot {
            db_name: self.db_name.clone(),
            query_stats,
            total_queries: self.total_queries.load(Ordering::Relaxed),
            slow_queries: self.slow_queries.load(Ordering::Relaxed),
            total_errors: self.errors.load(Ordering::Relaxed),
            total_affected_rows: self.affected_rows.load(Ordering::Relaxed),
        }
    }

    /// Clear the per-op timers and zero every counter.
    ///
    /// Counters are zeroed one at a time; concurrent readers may observe a
    /// partially reset state.
    pub fn reset(&self) {
        self.durations.clear();
        self.affected_rows.store(0, Ordering::Relaxed);
        self.total_queries.store(0, Ordering::Relaxed);
        self.slow_queries.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }

    /// Read and zero every counter.
    ///
    /// Each counter is swapped atomically so no increment is lost between the
    /// read and the reset, but the counters are not swapped together.
    pub fn snapshot_and_reset(&self) -> MetricsSnapshot {
        let keys: Vec<String> = self.durations.iter().map(|e| e.key().clone()).collect();
        let query_stats = keys
            .into_iter()
            .filter_map(|key| self.durations.remove(&key))
            .map(|(key, totals)| (key, to_op_stats(totals)))
            .collect();

        MetricsSnapshot {
            db_name: self.db_name.clone(),
            query_stats,
            total_queries: self.total_queries.swap(0, Ordering::Relaxed),
            slow_queries: self.slow_queries.swap(0, Ordering::Relaxed),
            total_errors: self.errors.swap(0, Ordering::Relaxed),
            total_affected_rows: self.affected_rows.swap(0, Ordering::Relaxed),
        }
    }
}

fn to_op_stats(totals: OpTotals) -> OpStats {
    // entries are only created by a record, so count >= 1
    let divisor = u32::try_from(totals.count.max(1)).unwrap_or(u32::MAX);
    OpStats {
        count: totals.count,
        total_time: totals.total,
        average_time: totals.total / divisor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_query_duration_groups_by_op() {
        let agg = MetricsAggregator::new("master");
        agg.record_query_duration("query", Duration::from_millis(10));
        agg.record_query_duration("query", Duration::from_millis(30));
        agg.record_query_duration("exec", Duration::from_millis(5));

        let snap = agg.snapshot();
        assert_eq!(snap.db_name, "master");
        assert_eq!(snap.total_queries, 3);

        let query = snap.query_stats["query"];
        assert_eq!(query.count, 2);
        assert_eq!(query.total_time, Duration::from_millis(40));
        assert_eq!(query.average_time, Duration::from_millis(20));

        assert_eq!(snap.query_stats["exec"].count, 1);
    }

    #[test]
    fn test_empty_op_type_is_unknown() {
        let agg = MetricsAggregator::new("db");
        agg.record_query_duration("", Duration::from_millis(1));
        let snap = agg.snapshot();
        assert_eq!(snap.query_stats[UNKNOWN_OP].count, 1);
    }

    #[test]
    fn test_global_counters() {
        let agg = MetricsAggregator::new("db");
        agg.record_error();
        agg.record_error();
        agg.record_slow_query();
        agg.record_affected_rows(7);
        agg.record_affected_rows(3);

        let snap = agg.snapshot();
        assert_eq!(snap.total_errors, 2);
        assert_eq!(snap.slow_queries, 1);
        assert_eq!(snap.total_affected_rows, 10);
        assert!(snap.query_stats.is_empty());
    }

    #[test]
    fn test_reset_clears_everything() {
        let agg = MetricsAggregator::new("db");
        agg.record_query_duration("query", Duration::from_millis(1));
        agg.record_error();
        agg.record_slow_query();
        agg.record_affected_rows(4);

        agg.reset();

        let snap = agg.snapshot();
        assert!(snap.query_stats.is_empty());
        assert_eq!(snap.total_queries, 0);
        assert_eq!(snap.total_errors, 0);
        assert_eq!(snap.slow_queries, 0);
        assert_eq!(snap.total_affected_rows, 0);
    }

    #[test]
    fn test_snapshot_and_reset_returns_previous_values() {
        let agg = MetricsAggregator::new("db");
        agg.record_query_duration("query", Duration::from_millis(4));
        agg.record_error();

        let taken = agg.snapshot_and_reset();
        assert_eq!(taken.total_queries, 1);
        assert_eq!(taken.total_errors, 1);
        assert_eq!(taken.query_stats["query"].count, 1);

        let after = agg.snapshot();
        assert_eq!(after.total_queries, 0);
        assert!(after.query_stats.is_empty());
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let agg = MetricsAggregator::new("db");
        agg.record_query_duration("query", Duration::from_millis(2));
        let json = serde_json::to_value(agg.snapshot()).unwrap();
        assert_eq!(json["db_name"], "db");
        assert_eq!(json["query_stats"]["query"]["count"], 1);
    }
}
