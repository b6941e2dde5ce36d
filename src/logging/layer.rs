//! Bridge from `tracing` events into an [`AsyncLogPipeline`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use querykit::logging::{AsyncLogPipeline, LogPipelineConfig, PipelineLayer, RotatingFileConfig, RotatingFileHandler};
//! use tracing_subscriber::prelude::*;
//!
//! # #[tokio::main] async fn main() -> std::io::Result<()> {
//! let file = RotatingFileHandler::new(RotatingFileConfig::new("./logs", "db"))?;
//! let pipeline = AsyncLogPipeline::new(Arc::new(file), LogPipelineConfig::default());
//! tracing_subscriber::registry()
//!     .with(PipelineLayer::new(pipeline.clone()))
//!     .init();
//!
//! tracing::info!(table = "users", rows = 3, "insert done");
//! # Ok(()) }
//! ```

use std::fmt;

use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use super::pipeline::AsyncLogPipeline;
use super::record::{Attr, Level, LogRecord};
use super::sink::LogSink;

/// Events from this module path are skipped so the pipeline never logs into itself
const SELF_TARGET: &str = "querykit::logging";

pub struct PipelineLayer {
    pipeline: AsyncLogPipeline,
}

impl PipelineLayer {
    #[must_use]
    pub fn new(pipeline: AsyncLogPipeline) -> Self {
        Self { pipeline }
    }
}

impl<S: Subscriber> Layer<S> for PipelineLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target().starts_with(SELF_TARGET) {
            return;
        }
        let level = Level::from(meta.level());
        if !self.pipeline.enabled(level) {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let mut record = LogRecord::new(level, visitor.message.unwrap_or_default());
        record.attrs = visitor.attrs;
        record.attrs.push(Attr::new("target", meta.target()));

        // closed pipeline: nowhere left to report to
        let _ = self.pipeline.submit(record);
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    attrs: Vec<Attr>,
}

impl RecordVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.attrs.push(Attr::new(field.name(), value));
        }
    }
}

impl Visit for RecordVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogError, LogPipelineConfig};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tracing_subscriber::prelude::*;

    #[derive(Clone, Default)]
    struct CollectSink {
        seen: Arc<Mutex<Vec<LogRecord>>>,
    }

    #[async_trait]
    impl LogSink for CollectSink {
        fn enabled(&self, level: Level) -> bool {
            level >= Level::Info
        }

        async fn handle(&self, record: &LogRecord) -> Result<(), LogError> {
            self.seen.lock().push(record.clone());
            Ok(())
        }

        fn with_attrs(&self, _attrs: Vec<Attr>) -> Arc<dyn LogSink> {
            Arc::new(self.clone())
        }

        fn with_group(&self, _name: &str) -> Arc<dyn LogSink> {
            Arc::new(self.clone())
        }

        async fn close(&self) -> Result<(), LogError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_events_become_records() {
        let sink = CollectSink::default();
        let pipeline = AsyncLogPipeline::new(Arc::new(sink.clone()), LogPipelineConfig::default());
        let subscriber = tracing_subscriber::registry().with(PipelineLayer::new(pipeline.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "app", table = "users", rows = 3u64, ok = true, "insert done");
            tracing::debug!(target: "app", "filtered by sink level");
            tracing::warn!(target: "querykit::logging::pipeline", "ignored self event");
        });
        pipeline.close().await.unwrap();

        let seen = sink.seen.lock();
        assert_eq!(seen.len(), 1);
        let record = &seen[0];
        assert_eq!(record.level, Level::Info);
        assert_eq!(record.message, "insert done");
        assert_eq!(record.attr("table"), Some(&Value::from("users")));
        assert_eq!(record.attr("rows"), Some(&Value::from(3u64)));
        assert_eq!(record.attr("ok"), Some(&Value::from(true)));
        assert_eq!(record.attr("target"), Some(&Value::from("app")));
    }
}
