// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Non-blocking hand-off of log records to a possibly slow sink.
//!
//! # Flow
//!
//! ```text
//! submit(record)
//!   ├─ closed?            → Err(Closed)
//!   ├─ try_send ok        → total += 1
//!   └─ channel full       → dropped += 1, ChannelFull on the error side-channel
//!                           (itself try_send; a full side-channel discards it)
//!
//! consumer task
//!   ├─ recv → sink.handle(record) under handle_timeout → errors to side-channel
//!   └─ on cancel: close channel, drain leftovers within drain_timeout, exit
//!
//! close()
//!   └─ first call only: cancel, join consumer within shutdown_timeout,
//!      return collected side-channel errors (or ShutdownTimeout)
//! ```
//!
//! A dropped record never fails the caller: the hot path must not block and
//! must not turn logging pressure into application errors.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::record::{Attr, Level, LogRecord};
use super::sink::{LogError, LogSink};

/// Channel capacity used when the caller asks for zero
pub const DEFAULT_LOG_BUFFER: usize = 5000;

#[derive(Debug, Clone)]
pub struct LogPipelineConfig {
    /// Records buffered before new ones are dropped
    pub capacity: usize,
    /// Per-record budget for the sink during normal operation
    pub handle_timeout: Duration,
    /// Total budget for flushing buffered records at shutdown
    pub drain_timeout: Duration,
    /// Upper bound on how long `close` waits for the consumer
    pub shutdown_timeout: Duration,
    /// Capacity of the error side-channel
    pub error_capacity: usize,
}

impl Default for LogPipelineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOG_BUFFER,
            handle_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(3),
            shutdown_timeout: Duration::from_secs(5),
            error_capacity: 100,
        }
    }
}

impl LogPipelineConfig {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }
}

/// Point-in-time pipeline counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogPipelineStats {
    pub total: u64,
    pub dropped: u64,
    pub channel_depth: usize,
}

/// A record plus the (possibly derived) sink view it was submitted through
struct Envelope {
    sink: Arc<dyn LogSink>,
    record: LogRecord,
}

struct Shared {
    config: LogPipelineConfig,
    tx: mpsc::Sender<Envelope>,
    err_tx: mpsc::Sender<LogError>,
    err_rx: Mutex<mpsc::Receiver<LogError>>,
    cancel_tx: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    dropped: AtomicU64,
    total: AtomicU64,
}

/// Asynchronous front for a [`LogSink`].
///
/// Cheap to clone; clones and `with_attrs`/`with_group` views share the
/// channel, counters and consumer.
#[derive(Clone)]
pub struct AsyncLogPipeline {
    shared: Arc<Shared>,
    sink: Arc<dyn LogSink>,
}

impl AsyncLogPipeline {
    /// Wrap `sink` and start the consumer task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(sink: Arc<dyn LogSink>, config: LogPipelineConfig) -> Self {
        let config = LogPipelineConfig {
            capacity: if config.capacity == 0 { DEFAULT_LOG_BUFFER } else { config.capacity },
            error_capacity: config.error_capacity.max(1),
            ..config
        };

        let (tx, rx) = mpsc::channel(config.capacity);
        let (err_tx, err_rx) = mpsc::channel(config.error_capacity);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let consumer = tokio::spawn(consume(rx, err_tx.clone(), cancel_rx, config.clone()));
        debug!(capacity = config.capacity, "Log pipeline started");

        Self {
            shared: Arc::new(Shared {
                config,
                tx,
                err_tx,
                err_rx: Mutex::new(err_rx),
                cancel_tx,
                consumer: Mutex::new(Some(consumer)),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                total: AtomicU64::new(0),
            }),
            sink,
        }
    }

    /// Hand a record to the consumer without waiting.
    ///
    /// Fails only when the pipeline is closed; a full channel drops the
    /// record, counts it, and still returns `Ok`.
    pub fn submit(&self, record: LogRecord) -> Result<(), LogError> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Err(LogError::Closed);
        }

        let envelope = Envelope {
            sink: self.sink.clone(),
            record,
        };
        match shared.tx.try_send(envelope) {
            Ok(()) => {
                shared.total.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_log_dropped();
                let _ = shared.err_tx.try_send(LogError::ChannelFull);
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(LogError::Closed),
        }
    }

    /// Records dropped because the channel was full
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Records accepted into the channel
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.shared.total.load(Ordering::Relaxed)
    }

    /// Records currently buffered
    #[must_use]
    pub fn channel_depth(&self) -> usize {
        let tx = &self.shared.tx;
        tx.max_capacity() - tx.capacity()
    }

    #[must_use]
    pub fn stats(&self) -> LogPipelineStats {
        let depth = self.channel_depth();
        crate::metrics::set_log_channel_depth(depth);
        LogPipelineStats {
            total: self.total_count(),
            dropped: self.dropped_count(),
            channel_depth: depth,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Shut the pipeline down.
    ///
    /// Only the first call acts; later calls return `Ok(())` immediately.
    /// Buffered records get a best-effort flush bounded by `drain_timeout`;
    /// the whole wait is bounded by `shutdown_timeout`, past which the
    /// consumer is abandoned and [`LogError::ShutdownTimeout`] is returned.
    /// Otherwise returns the errors gathered on the side-channel.
    ///
    /// The wrapped sink is not closed; its owner does that.
    #[tracing::instrument(skip(self))]
    pub async fn close(&self) -> Result<(), LogError> {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let _ = shared.cancel_tx.send(true);
        let consumer = shared.consumer.lock().take();

        let mut errors = Vec::new();
        if let Some(handle) = consumer {
            let limit = shared.config.shutdown_timeout;
            match tokio::time::timeout(limit, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(LogError::Sink(format!("log consumer failed: {e}"))),
                Err(_) => {
                    warn!(timeout = ?limit, "Log pipeline shutdown timed out, consumer abandoned");
                    return Err(LogError::ShutdownTimeout(limit));
                }
            }
        }

        {
            let mut err_rx = shared.err_rx.lock();
            while let Ok(err) = err_rx.try_recv() {
                errors.push(err);
            }
        }

        info!(
            total = self.total_count(),
            dropped = self.dropped_count(),
            errors = errors.len(),
            "Log pipeline closed"
        );
        LogError::collect(errors)
    }
}

#[async_trait]
impl LogSink for AsyncLogPipeline {
    fn enabled(&self, level: Level) -> bool {
        self.sink.enabled(level)
    }

    async fn handle(&self, record: &LogRecord) -> Result<(), LogError> {
        self.submit(record.clone())
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn LogSink> {
        Arc::new(Self {
            shared: self.shared.clone(),
            sink: self.sink.with_attrs(attrs),
        })
    }

    fn with_group(&self, name: &str) -> Arc<dyn LogSink> {
        Arc::new(Self {
            shared: self.shared.clone(),
            sink: self.sink.with_group(name),
        })
    }

    async fn close(&self) -> Result<(), LogError> {
        AsyncLogPipeline::close(self).await
    }
}

async fn consume(
    mut rx: mpsc::Receiver<Envelope>,
    err_tx: mpsc::Sender<LogError>,
    mut cancel_rx: watch::Receiver<bool>,
    config: LogPipelineConfig,
) {
    let mut handled = 0u64;
    loop {
        tokio::select! {
            biased;
            _ = cancel_rx.changed() => break,
            next = rx.recv() => match next {
                Some(envelope) => {
                    deliver(&envelope, config.handle_timeout, &err_tx).await;
                    handled += 1;
                }
                None => break,
            },
        }
    }

    // No new records from here on; flush what is already buffered.
    rx.close();
    let deadline = Instant::now() + config.drain_timeout;
    let mut drained = 0u64;
    let mut abandoned = 0u64;
    while let Ok(envelope) = rx.try_recv() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            abandoned += 1;
            continue;
        }
        deliver(&envelope, remaining.min(config.handle_timeout), &err_tx).await;
        drained += 1;
    }

    debug!(handled, drained, abandoned, "Log consumer exiting");
}

async fn deliver(envelope: &Envelope, limit: Duration, err_tx: &mpsc::Sender<LogError>) {
    let err = match tokio::time::timeout(limit, envelope.sink.handle(&envelope.record)).await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(_) => LogError::SinkTimeout(limit),
    };

    crate::metrics::record_log_sink_error();
    if let Err(TrySendError::Full(dropped)) = err_tx.try_send(err) {
        warn!(error = %dropped, "Log error channel full, discarding error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Sink that remembers messages, optionally sleeping or failing
    #[derive(Clone, Default)]
    struct MemorySink {
        seen: Arc<Mutex<Vec<LogRecord>>>,
        delay: Duration,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LogSink for MemorySink {
        fn enabled(&self, _level: Level) -> bool {
            true
        }

        async fn handle(&self, record: &LogRecord) -> Result<(), LogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(LogError::Sink("boom".into()));
            }
            self.seen.lock().push(record.clone());
            Ok(())
        }

        fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn LogSink> {
            Arc::new(TaggedSink { inner: self.clone(), attrs })
        }

        fn with_group(&self, _name: &str) -> Arc<dyn LogSink> {
            Arc::new(self.clone())
        }

        async fn close(&self) -> Result<(), LogError> {
            Ok(())
        }
    }

    struct TaggedSink {
        inner: MemorySink,
        attrs: Vec<Attr>,
    }

    #[async_trait]
    impl LogSink for TaggedSink {
        fn enabled(&self, level: Level) -> bool {
            self.inner.enabled(level)
        }

        async fn handle(&self, record: &LogRecord) -> Result<(), LogError> {
            let mut record = record.clone();
            record.attrs.extend(self.attrs.iter().cloned());
            self.inner.handle(&record).await
        }

        fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn LogSink> {
            self.inner.with_attrs(attrs)
        }

        fn with_group(&self, name: &str) -> Arc<dyn LogSink> {
            self.inner.with_group(name)
        }

        async fn close(&self) -> Result<(), LogError> {
            Ok(())
        }
    }

    fn info(msg: &str) -> LogRecord {
        LogRecord::new(Level::Info, msg)
    }

    #[tokio::test]
    async fn test_records_reach_sink_in_order() {
        let sink = MemorySink::default();
        let pipeline = AsyncLogPipeline::new(Arc::new(sink.clone()), LogPipelineConfig::with_capacity(16));

        for i in 0..5 {
            pipeline.submit(info(&format!("msg-{i}"))).unwrap();
        }
        pipeline.close().await.unwrap();

        let seen: Vec<String> = sink.seen.lock().iter().map(|r| r.message.clone()).collect();
        assert_eq!(seen, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);
        assert_eq!(pipeline.total_count(), 5);
        assert_eq!(pipeline.dropped_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_after_close_fails() {
        let pipeline = AsyncLogPipeline::new(Arc::new(MemorySink::default()), LogPipelineConfig::default());
        pipeline.close().await.unwrap();
        assert!(matches!(pipeline.submit(info("late")), Err(LogError::Closed)));
        assert!(pipeline.is_closed());
    }

    #[tokio::test]
    async fn test_close_twice_is_ok() {
        let sink = MemorySink::default();
        let pipeline = AsyncLogPipeline::new(Arc::new(sink.clone()), LogPipelineConfig::default());
        pipeline.submit(info("one")).unwrap();

        assert!(pipeline.close().await.is_ok());
        let calls = sink.calls.load(Ordering::SeqCst);
        assert!(pipeline.close().await.is_ok());
        assert_eq!(sink.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let sink = MemorySink {
            delay: Duration::from_millis(50),
            ..Default::default()
        };
        let pipeline = AsyncLogPipeline::new(Arc::new(sink.clone()), LogPipelineConfig::with_capacity(1));

        // current-thread runtime: the consumer has not run yet
        let started = std::time::Instant::now();
        pipeline.submit(info("first")).unwrap();
        pipeline.submit(info("second")).unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(pipeline.dropped_count(), 1);
        assert_eq!(sink.seen.lock().len(), 1);

        // the ChannelFull report comes back from close
        let err = pipeline.close().await.unwrap_err();
        assert!(matches!(err, LogError::ChannelFull));
    }

    #[tokio::test]
    async fn test_sink_errors_are_collected_on_close() {
        let sink = MemorySink {
            fail: true,
            ..Default::default()
        };
        let pipeline = AsyncLogPipeline::new(Arc::new(sink), LogPipelineConfig::default());
        pipeline.submit(info("a")).unwrap();
        pipeline.submit(info("b")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = pipeline.close().await.unwrap_err();
        match err {
            LogError::Collected(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_slow_sink_times_out() {
        let sink = MemorySink {
            delay: Duration::from_millis(200),
            ..Default::default()
        };
        let config = LogPipelineConfig {
            handle_timeout: Duration::from_millis(20),
            ..LogPipelineConfig::with_capacity(4)
        };
        let pipeline = AsyncLogPipeline::new(Arc::new(sink), config);
        pipeline.submit(info("slow")).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let err = pipeline.close().await.unwrap_err();
        assert!(matches!(err, LogError::SinkTimeout(_)));
    }

    #[tokio::test]
    async fn test_drain_stops_at_deadline() {
        let sink = MemorySink {
            delay: Duration::from_millis(100),
            ..Default::default()
        };
        let config = LogPipelineConfig {
            handle_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_millis(150),
            shutdown_timeout: Duration::from_secs(5),
            ..LogPipelineConfig::with_capacity(16)
        };
        let pipeline = AsyncLogPipeline::new(Arc::new(sink.clone()), config);
        // current-thread runtime: all ten are still buffered when close starts
        for i in 0..10 {
            pipeline.submit(info(&format!("r{i}"))).unwrap();
        }

        let started = Instant::now();
        // the record cut off by the deadline surfaces as a timeout
        let _ = pipeline.close().await;
        assert!(started.elapsed() < Duration::from_secs(1));

        let seen = sink.seen.lock().len();
        assert!(seen >= 1 && seen < 10, "drained {seen} records");
        assert!(sink.calls.load(Ordering::SeqCst) < 10);
    }

    #[tokio::test]
    async fn test_shutdown_timeout_abandons_consumer() {
        let sink = MemorySink {
            delay: Duration::from_secs(10),
            ..Default::default()
        };
        let config = LogPipelineConfig {
            handle_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_millis(50),
            ..LogPipelineConfig::with_capacity(4)
        };
        let pipeline = AsyncLogPipeline::new(Arc::new(sink), config);
        pipeline.submit(info("stuck")).unwrap();
        // let the consumer pick the record up and block in the sink
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = pipeline.close().await.unwrap_err();
        assert!(matches!(err, LogError::ShutdownTimeout(_)));
    }

    #[tokio::test]
    async fn test_with_attrs_view_shares_counters() {
        let sink = MemorySink::default();
        let pipeline = AsyncLogPipeline::new(Arc::new(sink.clone()), LogPipelineConfig::default());
        let tagged = pipeline.with_attrs(vec![Attr::new("db", "master")]);

        tagged.handle(&info("tagged")).await.unwrap();
        pipeline.submit(info("plain")).unwrap();
        pipeline.close().await.unwrap();

        assert_eq!(pipeline.total_count(), 2);
        let seen = sink.seen.lock();
        assert_eq!(seen[0].attr("db"), Some(&serde_json::Value::from("master")));
        assert_eq!(seen[1].attr("db"), None);
    }

    #[tokio::test]
    async fn test_stats_report_depth() {
        let pipeline = AsyncLogPipeline::new(Arc::new(MemorySink::default()), LogPipelineConfig::with_capacity(8));
        pipeline.submit(info("a")).unwrap();
        pipeline.submit(info("b")).unwrap();
        // consumer has not been polled yet
        let stats = pipeline.stats();
        assert_eq!(stats.channel_depth, 2);
        assert_eq!(stats.total, 2);
        pipeline.close().await.unwrap();
    }
}
