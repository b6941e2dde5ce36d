//! The sink contract consumed by [`super::AsyncLogPipeline`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::record::{Attr, Level, LogRecord};

#[derive(Error, Debug)]
pub enum LogError {
    #[error("log pipeline is closed")]
    Closed,
    #[error("log channel full, record dropped")]
    ChannelFull,
    #[error("log sink timed out after {0:?}")]
    SinkTimeout(std::time::Duration),
    #[error("log pipeline shutdown timed out after {0:?}")]
    ShutdownTimeout(std::time::Duration),
    #[error("log file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode log record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("log sink error: {0}")]
    Sink(String),
    #[error("{} log errors: {}", .0.len(), join_errors(.0))]
    Collected(Vec<LogError>),
}

fn join_errors(errors: &[LogError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl LogError {
    /// Fold a list of errors into one, or `Ok` if the list is empty.
    pub fn collect(mut errors: Vec<LogError>) -> Result<(), LogError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(LogError::Collected(errors)),
        }
    }
}

/// Destination for log records.
///
/// `with_attrs`/`with_group` return a derived sink sharing the same
/// destination; the original is left unchanged.
#[async_trait]
pub trait LogSink: Send + Sync {
    fn enabled(&self, level: Level) -> bool;

    async fn handle(&self, record: &LogRecord) -> Result<(), LogError>;

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn LogSink>;

    fn with_group(&self, name: &str) -> Arc<dyn LogSink>;

    async fn close(&self) -> Result<(), LogError>;
}
