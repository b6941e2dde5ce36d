// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection-pool statistics.
//!
//! A [`PoolStatsCell`] holds the latest [`PoolStats`] snapshot for one
//! database handle. An optional collector task refreshes it from a
//! [`PoolStatsSource`] on a fixed interval.
//!
//! ```text
//! PoolStatsSource ──every interval──► collector task ──► PoolStatsCell
//!                                                          │
//!                                       readers ◄── get() ─┘
//! ```
//!
//! Enabling while already enabled, or disabling while disabled, is a no-op.
//! Disabling resets the snapshot to its zero value.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Point-in-time pool statistics reported by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Configured maximum open connections (0 = unlimited)
    pub max_open: u64,
    pub open: u64,
    pub in_use: u64,
    pub idle: u64,
    /// Total waits for a free connection
    pub wait_count: u64,
    /// Total time spent waiting
    pub wait_duration: Duration,
    pub max_idle_closed: u64,
    pub max_lifetime_closed: u64,
}

/// Anything able to report pool statistics (usually the driver's pool).
pub trait PoolStatsSource: Send + Sync {
    fn pool_stats(&self) -> PoolStats;
}

impl<F> PoolStatsSource for F
where
    F: Fn() -> PoolStats + Send + Sync,
{
    fn pool_stats(&self) -> PoolStats {
        self()
    }
}

struct Collector {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    current: RwLock<PoolStats>,
    collector: Mutex<Option<Collector>>,
}

/// Owned holder of the latest pool snapshot. Clones share the snapshot.
#[derive(Clone)]
pub struct PoolStatsCell {
    inner: Arc<Inner>,
}

impl Default for PoolStatsCell {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolStatsCell {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                current: RwLock::new(PoolStats::default()),
                collector: Mutex::new(None),
            }),
        }
    }

    /// Latest snapshot
    #[must_use]
    pub fn get(&self) -> PoolStats {
        *self.inner.current.read()
    }

    /// Replace the snapshot (collector or manual refresh).
    pub fn update(&self, stats: PoolStats) {
        self.inner.update(stats);
    }

    pub fn reset(&self) {
        *self.inner.current.write() = PoolStats::default();
    }

    #[must_use]
    pub fn is_collecting(&self) -> bool {
        self.inner.collector.lock().is_some()
    }

    /// Start refreshing from `source` every `interval`.
    ///
    /// Returns `false` when a collector is already running or no Tokio
    /// runtime is available.
    pub fn enable(&self, source: Arc<dyn PoolStatsSource>, interval: Duration) -> bool {
        let mut collector = self.inner.collector.lock();
        if collector.is_some() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime available - pool statistics collection disabled");
            return false;
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let weak = Arc::downgrade(&self.inner);
        let interval = interval.max(Duration::from_millis(1));
        let task = runtime.spawn(collect(weak, source, interval, stop_rx));

        *collector = Some(Collector {
            stop: stop_tx,
            task,
        });
        debug!(interval_ms = interval.as_millis() as u64, "Pool statistics collector started");
        true
    }

    /// Stop the collector and zero the snapshot.
    ///
    /// Returns `false` when nothing was running.
    #[tracing::instrument(skip(self))]
    pub async fn disable(&self) -> bool {
        let running = self.inner.collector.lock().take();
        let Some(collector) = running else {
            return false;
        };
        let _ = collector.stop.send(true);
        if let Err(e) = collector.task.await {
            warn!(error = %e, "Pool statistics collector ended abnormally");
        }
        self.reset();
        debug!("Pool statistics collector stopped");
        true
    }
}

impl Inner {
    fn update(&self, stats: PoolStats) {
        *self.current.write() = stats;
        crate::metrics::set_pool_connections(stats.open, stats.in_use, stats.idle);
    }
}

async fn collect(
    inner: Weak<Inner>,
    source: Arc<dyn PoolStatsSource>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.update(source.pool_stats());
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}
