// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Exported metrics for querykit.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! These complement the in-process [`crate::query_metrics`] aggregator: the
//! aggregator answers "what did my queries do", these answer "is the
//! infrastructure itself saturated".
//!
//! # Metric Naming Convention
//! - `querykit_` prefix for all metrics
//! - `_total` suffix for counters
//!
//! # Labels
//! - `cache`: name the cache was created with
//! - `outcome`: committed, rolled_back, aborted
//! - `state`: open, in_use, idle

use metrics::{counter, gauge};

/// Record a metric mutation discarded because the ring buffer was full
pub fn record_metric_dropped() {
    counter!("querykit_metrics_dropped_total").increment(1);
}

/// Record a log record discarded because the channel was full
pub fn record_log_dropped() {
    counter!("querykit_logs_dropped_total").increment(1);
}

/// Record a sink failure observed by the log consumer
pub fn record_log_sink_error() {
    counter!("querykit_logs_sink_errors_total").increment(1);
}

/// Set the current log channel depth
pub fn set_log_channel_depth(depth: usize) {
    gauge!("querykit_log_channel_depth").set(depth as f64);
}

/// Record a log file switch caused by a date change
pub fn record_log_rotation() {
    counter!("querykit_log_rotations_total").increment(1);
}

/// Record files deleted by a retention sweep
pub fn record_log_files_removed(count: usize) {
    counter!("querykit_log_files_removed_total").increment(count as u64);
}

/// Record a cache lookup outcome
pub fn record_cache_lookup(cache: &'static str, hit: bool) {
    if hit {
        counter!("querykit_cache_hits_total", "cache" => cache).increment(1);
    } else {
        counter!("querykit_cache_misses_total", "cache" => cache).increment(1);
    }
}

/// Set cache entry count gauge
pub fn set_cache_entries(cache: &'static str, entries: usize) {
    gauge!("querykit_cache_entries", "cache" => cache).set(entries as f64);
}

/// Set connection pool gauges (open, in use, idle)
pub fn set_pool_connections(open: u64, in_use: u64, idle: u64) {
    gauge!("querykit_pool_connections", "state" => "open").set(open as f64);
    gauge!("querykit_pool_connections", "state" => "in_use").set(in_use as f64);
    gauge!("querykit_pool_connections", "state" => "idle").set(idle as f64);
}

/// Record a transaction outcome (committed, rolled_back, aborted)
pub fn record_transaction(outcome: &'static str) {
    counter!("querykit_transactions_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests verify the API doesn't panic without an installed recorder.

    #[test]
    fn test_pipeline_counters() {
        record_metric_dropped();
        record_log_dropped();
        record_log_sink_error();
        set_log_channel_depth(42);
    }

    #[test]
    fn test_log_file_metrics() {
        record_log_rotation();
        record_log_files_removed(3);
    }

    #[test]
    fn test_cache_metrics() {
        record_cache_lookup("placeholders", true);
        record_cache_lookup("placeholders", false);
        set_cache_entries("placeholders", 10);
    }

    #[test]
    fn test_pool_and_transaction_metrics() {
        set_pool_connections(10, 3, 7);
        record_transaction("committed");
        record_transaction("aborted");
    }
}
