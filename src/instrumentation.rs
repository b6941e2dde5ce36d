// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The owned top-level handle that wires every component together.
//!
//! ```text
//!                       ┌──────────────────────────────┐
//!   observe(op, ..) ──► │ AsyncMetricsPipeline         │ ──► MetricsAggregator
//!                       ├──────────────────────────────┤
//!   log(record) ──────► │ AsyncLogPipeline             │ ──► RotatingFileHandler
//!                       ├──────────────────────────────┤
//!   with_cache(..) ───► │ ShardedCache ×2              │  struct fields, placeholders
//!                       ├──────────────────────────────┤
//!   pool_stats() ─────► │ PoolStatsCell (+ collector)  │
//!                       └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Instant;
//! use querykit::{Instrumentation, QuerykitConfig};
//!
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let inst = Instrumentation::start(QuerykitConfig::default())?;
//!
//! let started = Instant::now();
//! let rows = inst.observe("insert", started, Ok::<i64, std::io::Error>(1))?;
//! assert_eq!(rows, 1);
//!
//! println!("{:?}", inst.snapshot());
//! inst.close().await?;
//! # Ok(()) }
//! ```

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{Cache, CacheError, ShardedCache};
use crate::config::{ConfigError, QuerykitConfig};
use crate::logging::{
    AsyncLogPipeline, Level, LogError, LogPipelineConfig, LogRecord, LogSink, PipelineLayer,
    RotatingFileConfig, RotatingFileHandler,
};
use crate::pool_stats::{PoolStats, PoolStatsCell, PoolStatsSource};
use crate::query_metrics::{AsyncMetricsPipeline, MetricsSnapshot, QueryMetrics};
use crate::transaction::{self, PanicPolicy, TransactionControl, TransactionError, TxOutcome};

/// Metric-label names of the two built-in caches
pub const STRUCT_FIELD_CACHE: &str = "struct_fields";
pub const PLACEHOLDER_CACHE: &str = "placeholders";

#[derive(Error, Debug)]
pub enum InstrumentationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open log file: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("no Tokio runtime available")]
    NoRuntime,
}

pub struct Instrumentation {
    db_name: String,
    started_at: DateTime<Utc>,
    slow_threshold: Duration,
    file: RotatingFileHandler,
    logger: AsyncLogPipeline,
    metrics: AsyncMetricsPipeline,
    field_cache: ShardedCache,
    placeholder_cache: ShardedCache,
    pool_stats: PoolStatsCell,
    pool_source: Mutex<Option<Arc<dyn PoolStatsSource>>>,
    pool_autostart: bool,
    pool_interval: Duration,
    closed: AtomicBool,
}

impl Instrumentation {
    /// Validate `config`, open the log file and start both pipelines.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: QuerykitConfig) -> Result<Self, InstrumentationError> {
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(InstrumentationError::NoRuntime);
        }

        let file = RotatingFileHandler::new(RotatingFileConfig {
            dir: config.log_dir.clone(),
            base_name: config.log_base_name.clone(),
            max_age: config.log_max_age(),
            rotation_enabled: config.log_rotation_enabled,
            level: config.level()?,
            sweep_interval: config.log_sweep_interval(),
        })?;
        let logger = AsyncLogPipeline::new(
            Arc::new(file.clone()),
            LogPipelineConfig::with_capacity(config.log_capacity()),
        );
        let metrics = AsyncMetricsPipeline::new(config.db_name.clone(), config.metrics_capacity());

        let lru = config.lru_capacity();
        let slow_threshold = config.slow_query_threshold();
        let pool_interval = config.pool_stats_interval();
        let parallelism = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);

        info!(
            db = %config.db_name,
            log_dir = %config.log_dir.display(),
            level = %config.log_level,
            "Instrumentation started"
        );

        Ok(Self {
            db_name: config.db_name,
            started_at: Utc::now(),
            slow_threshold,
            file,
            logger,
            metrics,
            field_cache: ShardedCache::with_shards(STRUCT_FIELD_CACHE, parallelism, lru),
            placeholder_cache: ShardedCache::with_shards(PLACEHOLDER_CACHE, parallelism, lru),
            pool_stats: PoolStatsCell::new(),
            pool_source: Mutex::new(None),
            pool_autostart: config.enable_pool_stats,
            pool_interval,
            closed: AtomicBool::new(false),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Query observation
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record one finished database call and hand its outcome back.
    ///
    /// A failure bumps the error counter and logs at ERROR; it does not
    /// count as a query. A success records its duration and affected rows,
    /// and when slower than the threshold also bumps the slow counter and
    /// logs at WARN.
    pub fn observe<E: fmt::Display>(
        &self,
        op: &str,
        started: Instant,
        outcome: Result<i64, E>,
    ) -> Result<i64, E> {
        let elapsed = started.elapsed();

        let rows = match &outcome {
            Ok(rows) => *rows,
            Err(e) => {
                self.metrics.record_error();
                self.log(
                    LogRecord::new(Level::Error, "query failed")
                        .with_attr("op", op)
                        .with_attr("error", e.to_string())
                        .with_attr("duration_ms", elapsed.as_millis() as u64),
                );
                return outcome;
            }
        };

        self.metrics.record_query_duration(op, elapsed);
        if elapsed > self.slow_threshold {
            self.metrics.record_slow_query();
            self.log(
                LogRecord::new(Level::Warn, "slow query")
                    .with_attr("op", op)
                    .with_attr("duration_ms", elapsed.as_millis() as u64)
                    .with_attr("threshold_ms", self.slow_threshold.as_millis() as u64),
            );
        }
        self.metrics.record_affected_rows(rows);
        outcome
    }

    /// Run `f` in a transaction, recording a commit as a `transaction` operation.
    ///
    /// Rollbacks, aborts and commit/rollback failures count only as errors.
    pub fn transaction<C, T, U, F>(
        &self,
        tx: C,
        policy: PanicPolicy,
        f: F,
    ) -> Result<TxOutcome<T, U>, TransactionError<C::Error>>
    where
        C: TransactionControl,
        C::Error: fmt::Display,
        U: fmt::Display,
        F: FnOnce(&mut C) -> Result<T, U>,
    {
        let started = Instant::now();
        let result = transaction::run_in_transaction(tx, policy, f);

        let failure = match &result {
            Ok(TxOutcome::Committed(_)) => {
                self.metrics.record_query_duration("transaction", started.elapsed());
                None
            }
            Ok(TxOutcome::RolledBack(e)) => Some(e.to_string()),
            Ok(TxOutcome::Aborted { message }) => Some(format!("panic: {message}")),
            Err(e) => Some(e.to_string()),
        };
        if let Some(error) = failure {
            self.metrics.record_error();
            self.log(
                LogRecord::new(Level::Error, "transaction rolled back")
                    .with_attr("error", error),
            );
        }
        result
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Cache-aside helpers
    // ═══════════════════════════════════════════════════════════════════════════

    /// Return the cached value for `key`, or run `loader` and cache its result.
    ///
    /// Loader errors are returned and nothing is cached.
    pub fn with_cache<C, F, E>(&self, cache: &C, key: &str, loader: F) -> Result<Vec<String>, E>
    where
        C: Cache + ?Sized,
        F: FnOnce() -> Result<Vec<String>, E>,
    {
        if let Some(value) = cache.get(key) {
            return Ok(value);
        }
        let value = loader()?;
        cache.set(key, value.clone());
        Ok(value)
    }

    /// Delete `keys`, stopping at the first failure.
    pub fn invalidate_cache<C>(&self, cache: &C, keys: &[&str]) -> Result<(), CacheError>
    where
        C: Cache + ?Sized,
    {
        for key in keys {
            if let Err(e) = cache.delete(key) {
                self.log(
                    LogRecord::new(Level::Error, "cache delete failed")
                        .with_attr("key", *key)
                        .with_attr("error", e.to_string()),
                );
                return Err(e);
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Logging
    // ═══════════════════════════════════════════════════════════════════════════

    /// Submit a record without waiting. Records below the file level are
    /// skipped; submissions after `close` are discarded.
    pub fn log(&self, record: LogRecord) {
        if !self.logger.enabled(record.level) {
            return;
        }
        let _ = self.logger.submit(record);
    }

    /// `tracing` layer feeding this handle's log pipeline
    #[must_use]
    pub fn tracing_layer(&self) -> PipelineLayer {
        PipelineLayer::new(self.logger.clone())
    }

    pub fn set_log_level(&self, level: &str) -> Result<(), ConfigError> {
        let level: Level = level.parse()?;
        self.file.set_level(level);
        Ok(())
    }

    #[must_use]
    pub fn log_level(&self) -> Level {
        self.file.level()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Pool statistics
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register the pool to read statistics from. Starts the collector when
    /// the config asked for it.
    pub fn attach_pool(&self, source: Arc<dyn PoolStatsSource>) {
        *self.pool_source.lock() = Some(source.clone());
        if self.pool_autostart {
            self.pool_stats.enable(source, self.pool_interval);
        }
    }

    /// Turn the pool collector on or off. Returns whether anything changed.
    pub async fn set_pool_stats_enabled(&self, enable: bool) -> bool {
        if !enable {
            return self.pool_stats.disable().await;
        }
        let source = self.pool_source.lock().clone();
        match source {
            Some(source) => self.pool_stats.enable(source, self.pool_interval),
            None => {
                warn!("Pool statistics requested but no pool is attached");
                false
            }
        }
    }

    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool_stats.get()
    }

    #[must_use]
    pub fn pool_stats_cell(&self) -> &PoolStatsCell {
        &self.pool_stats
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn metrics(&self) -> &AsyncMetricsPipeline {
        &self.metrics
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn logger(&self) -> &AsyncLogPipeline {
        &self.logger
    }

    #[must_use]
    pub fn file_handler(&self) -> &RotatingFileHandler {
        &self.file
    }

    #[must_use]
    pub fn field_cache(&self) -> &ShardedCache {
        &self.field_cache
    }

    #[must_use]
    pub fn placeholder_cache(&self) -> &ShardedCache {
        &self.placeholder_cache
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Shutdown
    // ═══════════════════════════════════════════════════════════════════════════

    /// Stop everything in dependency order. Idempotent.
    ///
    /// Pool collector, metrics consumer, log pipeline (drained), log file,
    /// then both caches. Errors from every step are returned together.
    #[tracing::instrument(skip(self), fields(db = %self.db_name))]
    pub async fn close(&self) -> Result<(), InstrumentationError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.pool_stats.disable().await;
        self.metrics.stop().await;

        let mut errors = Vec::new();
        if let Err(e) = self.logger.close().await {
            errors.push(e);
        }
        if let Err(e) = LogSink::close(&self.file).await {
            errors.push(e);
        }

        self.field_cache.clear();
        self.placeholder_cache.clear();

        info!(
            errors = errors.len(),
            uptime_secs = (Utc::now() - self.started_at).num_seconds(),
            "Instrumentation closed"
        );
        LogError::collect(errors).map_err(InstrumentationError::from)
    }
}
