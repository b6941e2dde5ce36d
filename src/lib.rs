//! # querykit
//!
//! Observability and caching infrastructure for a database access layer.
//!
//! ## Architecture
//!
//! Every database call feeds three cross-cutting subsystems, none of which
//! may slow the call down or fail it:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Query Metrics                         │
//! │  • Fire-and-forget recording into a ring buffer             │
//! │  • One consumer task applies mutations to the aggregator    │
//! │  • Overflow evicts the oldest mutation and counts a drop    │
//! └─────────────────────────────────────────────────────────────┘
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Structured Logs                        │
//! │  • Bounded channel, drop-on-full, error side channel        │
//! │  • Daily rotating JSON-lines files + retention sweep        │
//! │  • Timeout-bounded drain on shutdown                        │
//! └─────────────────────────────────────────────────────────────┘
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Sharded Cache                         │
//! │  • xxh3-routed shards, each a map plus an LRU fast path     │
//! │  • Per-shard hit/miss counters                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Instant;
//! use querykit::{Instrumentation, QuerykitConfig};
//! use querykit::logging::{Level, LogRecord};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = QuerykitConfig {
//!         log_dir: "./logs".into(),
//!         log_rotation_enabled: true,
//!         slow_query_ms: 200,
//!         ..Default::default()
//!     };
//!     let inst = Instrumentation::start(config)?;
//!
//!     let started = Instant::now();
//!     let outcome: Result<i64, std::io::Error> = Ok(3); // run the query here
//!     inst.observe("insert", started, outcome)?;
//!
//!     inst.log(LogRecord::new(Level::Info, "batch imported").with_attr("rows", 3));
//!     println!("{}", serde_json::to_string(&inst.snapshot())?);
//!
//!     inst.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`query_metrics`]: [`RingBuffer`], [`MetricsAggregator`], [`AsyncMetricsPipeline`]
//! - [`logging`]: [`AsyncLogPipeline`], [`RotatingFileHandler`], `tracing` bridge
//! - [`cache`]: the [`Cache`] contract and [`ShardedCache`]
//! - [`pool_stats`]: owned connection-pool statistics
//! - [`transaction`]: panic-safe transaction boundary
//! - [`instrumentation`]: the [`Instrumentation`] handle wiring it all together
//! - [`metrics`]: exporter-agnostic saturation metrics

pub mod cache;
pub mod config;
pub mod instrumentation;
pub mod logging;
pub mod metrics;
pub mod pool_stats;
pub mod query_metrics;
pub mod transaction;

pub use cache::{Cache, CacheError, ShardedCache, ShardedCacheStats};
pub use config::{ConfigError, QuerykitConfig};
pub use instrumentation::{Instrumentation, InstrumentationError};
pub use logging::{
    AsyncLogPipeline, Level, LogError, LogRecord, LogSink, PipelineLayer, RotatingFileHandler,
};
pub use pool_stats::{PoolStats, PoolStatsCell, PoolStatsSource};
pub use query_metrics::{
    AsyncMetricsPipeline, MetricsAggregator, MetricsSnapshot, OpStats, QueryMetrics, RingBuffer,
};
pub use transaction::{run_in_transaction, PanicPolicy, TransactionControl, TransactionError, TxOutcome};
