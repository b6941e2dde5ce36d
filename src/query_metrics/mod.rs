//! Query metrics: counters and timers fed by every database call.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Query Metrics Module                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ring_buffer.rs - fixed-capacity FIFO, overwrites oldest     │
//! │  aggregator.rs  - per-op timers + global atomic counters     │
//! │  pipeline.rs    - fire-and-forget producer side, one         │
//! │                   polling consumer task, drop counter        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers depend on the [`QueryMetrics`] trait; both the synchronous
//! [`MetricsAggregator`] and the [`AsyncMetricsPipeline`] implement it.

pub mod aggregator;
pub mod pipeline;
pub mod ring_buffer;

use std::time::Duration;

pub use aggregator::{MetricsAggregator, MetricsSnapshot, OpStats, UNKNOWN_OP};
pub use pipeline::{AsyncMetricsPipeline, DEFAULT_METRICS_BUFFER, POLL_INTERVAL};
pub use ring_buffer::RingBuffer;

/// Recording surface used by query execution.
///
/// Recording never fails: observability must not fail the primary operation.
pub trait QueryMetrics: Send + Sync {
    fn record_query_duration(&self, op_type: &str, duration: Duration);
    fn record_error(&self);
    fn record_slow_query(&self);
    fn record_affected_rows(&self, rows: i64);
    fn snapshot(&self) -> MetricsSnapshot;
    fn reset(&self);
    /// Recordings lost to backpressure
    fn dropped_count(&self) -> u64;
}

impl QueryMetrics for MetricsAggregator {
    fn record_query_duration(&self, op_type: &str, duration: Duration) {
        MetricsAggregator::record_query_duration(self, op_type, duration);
    }

    fn record_error(&self) {
        MetricsAggregator::record_error(self);
    }

    fn record_slow_query(&self) {
        MetricsAggregator::record_slow_query(self);
    }

    fn record_affected_rows(&self, rows: i64) {
        MetricsAggregator::record_affected_rows(self, rows);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsAggregator::snapshot(self)
    }

    fn reset(&self) {
        MetricsAggregator::reset(self);
    }

    fn dropped_count(&self) -> u64 {
        0
    }
}
