// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Asynchronous metrics recording.
//!
//! Producers never touch the aggregator directly: each `record_*` call
//! enqueues a closure into a [`RingBuffer`] and returns. A single background
//! task dequeues and applies the closures in FIFO order.
//!
//! ```text
//!   caller ──record_*──► RingBuffer (overwrite oldest when full)
//!                              │
//!                     consumer task (poll + sleep)
//!                              ▼
//!                      MetricsAggregator
//! ```
//!
//! The ring has no wake-up signal, so an idle consumer sleeps for
//! [`POLL_INTERVAL`] between empty polls. That is a latency tax of at most one
//! interval, not a correctness issue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::aggregator::{MetricsAggregator, MetricsSnapshot};
use super::ring_buffer::RingBuffer;
use super::QueryMetrics;

/// Ring capacity used when the caller asks for zero
pub const DEFAULT_METRICS_BUFFER: usize = 1000;

/// Consumer sleep between empty polls
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Items applied before the consumer yields back to the runtime
const APPLY_BATCH: usize = 256;

type MetricOp = Box<dyn FnOnce(&MetricsAggregator) + Send>;

pub struct AsyncMetricsPipeline {
    buffer: Arc<RingBuffer<MetricOp>>,
    aggregator: Arc<MetricsAggregator>,
    dropped: AtomicU64,
    stop_tx: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncMetricsPipeline {
    /// Create the pipeline and start its consumer task.
    ///
    /// A `capacity` of zero falls back to [`DEFAULT_METRICS_BUFFER`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(db_name: impl Into<String>, capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_METRICS_BUFFER } else { capacity };
        let buffer = Arc::new(RingBuffer::new(capacity));
        let aggregator = Arc::new(MetricsAggregator::new(db_name));
        let (stop_tx, stop_rx) = watch::channel(false);

        let consumer = tokio::spawn(consume(buffer.clone(), aggregator.clone(), stop_rx));
        debug!(capacity, db = %aggregator.db_name(), "Metrics pipeline started");

        Self {
            buffer,
            aggregator,
            dropped: AtomicU64::new(0),
            stop_tx,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Enqueue a mutation; a full ring counts one drop and never blocks.
    pub fn record_metric<F>(&self, op: F)
    where
        F: FnOnce(&MetricsAggregator) + Send + 'static,
    {
        if !self.buffer.enqueue(Box::new(op)) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_metric_dropped();
        }
    }

    /// Mutations lost to a full ring since construction
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Mutations queued but not yet applied
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Direct access to the aggregator (reads are always safe).
    #[must_use]
    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.consumer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the consumer and wait for it to exit.
    ///
    /// After this returns the aggregator is no longer mutated by the pipeline.
    /// Items still queued are discarded, not drained. Calling it again is a
    /// no-op.
    #[tracing::instrument(skip(self), fields(db = %self.aggregator.db_name()))]
    pub async fn stop(&self) {
        let handle = self.consumer.lock().take();
        let Some(handle) = handle else {
            return;
        };

        let _ = self.stop_tx.send(true);
        if let Err(e) = handle.await {
            warn!(error = %e, "Metrics consumer ended abnormally");
        }

        let discarded = self.buffer.len();
        info!(
            discarded,
            dropped = self.dropped_count(),
            "Metrics pipeline stopped"
        );
    }
}

impl QueryMetrics for AsyncMetricsPipeline {
    fn record_query_duration(&self, op_type: &str, duration: Duration) {
        let op_type = op_type.to_string();
        self.record_metric(move |m| m.record_query_duration(&op_type, duration));
    }

    fn record_error(&self) {
        self.record_metric(MetricsAggregator::record_error);
    }

    fn record_slow_query(&self) {
        self.record_metric(MetricsAggregator::record_slow_query);
    }

    fn record_affected_rows(&self, rows: i64) {
        self.record_metric(move |m| m.record_affected_rows(rows));
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.aggregator.snapshot()
    }

    fn reset(&self) {
        self.aggregator.reset();
    }

    fn dropped_count(&self) -> u64 {
        AsyncMetricsPipeline::dropped_count(self)
    }
}

impl Drop for AsyncMetricsPipeline {
    fn drop(&mut self) {
        // Dropping stop_tx also ends the consumer; this just makes it prompt.
        let _ = self.stop_tx.send(true);
    }
}

async fn consume(
    buffer: Arc<RingBuffer<MetricOp>>,
    aggregator: Arc<MetricsAggregator>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut applied = 0usize;
    loop {
        if *stop_rx.borrow() {
            break;
        }

        match buffer.dequeue() {
            Some(op) => {
                op(&aggregator);
                applied += 1;
                if applied % APPLY_BATCH == 0 {
                    tokio::task::yield_now().await;
                }
            }
            None => {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
        }
    }
    debug!(applied, "Metrics consumer exiting");
}
