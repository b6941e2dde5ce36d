//! Asynchronous structured logging.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Logging Module                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  record.rs    - LogRecord, Level, Attr                       │
//! │  sink.rs      - LogSink contract + LogError                  │
//! │  pipeline.rs  - AsyncLogPipeline: bounded channel, drop on   │
//! │                 full, timeout-bounded shutdown               │
//! │  rotating.rs  - RotatingFileHandler: dated JSON-lines files, │
//! │                 retention sweep                              │
//! │  layer.rs     - PipelineLayer: tracing events → pipeline     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod layer;
pub mod pipeline;
pub mod record;
pub mod rotating;
pub mod sink;

pub use layer::PipelineLayer;
pub use pipeline::{AsyncLogPipeline, LogPipelineConfig, LogPipelineStats, DEFAULT_LOG_BUFFER};
pub use record::{Attr, Level, LogRecord};
pub use rotating::{is_rotated_name, rotated_name, DayClock, RotatingFileConfig, RotatingFileHandler};
pub use sink::{LogError, LogSink};
