//! Buffered, non-blocking usage recording.
//!
//! [`UsageRecorder::record`] stamps an event and hands it to a background
//! writer task over a bounded channel. It never blocks and never fails.
//!
//! # Flush policy
//!
//! - **Threshold flush** when the buffer reaches `batch_size` (default 100).
//! - **Immediate flush** for failure records.
//! - **Periodic flush** on a Tokio interval (default 1 second).
//! - **Explicit flush** via [`UsageRecorder::flush`] and on shutdown.
//!
//! Each flush goes through the [`UsageSink`]. A failed write is
//! logged at warn level and the batch is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use vectorhub_core::{CallerIdentity, Clock, OperationKind, RecordId, UsageRecord};
use vectorhub_settings::RecorderSettings;
use vectorhub_store::{Database, StoreError, UsageRepo};

/// Destination for flushed usage records.
pub trait UsageSink: Send + Sync + 'static {
    /// Persist `records`. An error means none of them were written.
    fn write_batch(&self, records: &[UsageRecord]) -> Result<(), StoreError>;
}

/// Sink writing to the `SQLite` usage log.
///
/// A batch is inserted in one transaction. If that fails, each record is
/// retried on its own so one bad row only loses itself.
#[derive(Clone)]
pub struct SqliteUsageSink {
    db: Database,
}

impl SqliteUsageSink {
    /// Sink over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl UsageSink for SqliteUsageSink {
    fn write_batch(&self, records: &[UsageRecord]) -> Result<(), StoreError> {
        let batch = self.db.transaction(|conn| {
            for record in records {
                UsageRepo::insert_in(conn, record)?;
            }
            Ok(())
        });
        let Err(batch_err) = batch else {
            return Ok(());
        };
        warn!(count = records.len(), error = %batch_err, "usage batch insert failed, retrying per record");

        let mut last_err = None;
        let mut dropped = 0usize;
        for record in records {
            if let Err(e) = self.db.with_conn(|conn| UsageRepo::insert_in(conn, record)) {
                warn!(record = %record.id, error = %e, "usage record dropped");
                dropped += 1;
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) if dropped == records.len() => Err(e),
            _ => Ok(()),
        }
    }
}

/// One operation attempt, before it is attributed and timestamped.
#[derive(Clone, Debug, PartialEq)]
pub struct UsageEvent {
    /// What was attempted.
    pub operation: OperationKind,
    /// Model involved, if any.
    pub model: Option<String>,
    /// Characters of input.
    pub input_length: Option<u64>,
    /// Items in a batch call.
    pub batch_size: Option<u32>,
    /// Wall-clock duration.
    pub execution_ms: Option<u64>,
    /// Estimated tokens processed.
    pub tokens_processed: Option<u64>,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Diagnostic for failed attempts.
    pub error_message: Option<String>,
}

impl UsageEvent {
    /// A successful event with no details.
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            model: None,
            input_length: None,
            batch_size: None,
            execution_ms: None,
            tokens_processed: None,
            success: true,
            error_message: None,
        }
    }

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the input length in characters.
    #[must_use]
    pub fn input_length(mut self, chars: usize) -> Self {
        self.input_length = Some(chars as u64);
        self
    }

    /// Set the batch size.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size as u32);
        self
    }

    /// Set the execution time.
    #[must_use]
    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.execution_ms = Some(elapsed.as_millis() as u64);
        self
    }

    /// Set the processed token estimate.
    #[must_use]
    pub fn tokens(mut self, tokens: usize) -> Self {
        self.tokens_processed = Some(tokens as u64);
        self
    }

    /// Mark the event failed with `message`.
    #[must_use]
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }
}

/// Writer-task tuning.
#[derive(Clone, Debug)]
pub struct RecorderConfig {
    /// Buffered records that trigger a flush.
    pub batch_size: usize,
    /// Periodic flush interval.
    pub flush_interval: Duration,
    /// Pending events held before new ones are dropped.
    pub channel_capacity: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_millis(1000),
            channel_capacity: 10_000,
        }
    }
}

impl RecorderConfig {
    /// Build from settings, clamping sizes to at least one.
    pub fn from_settings(settings: &RecorderSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            flush_interval: Duration::from_millis(settings.flush_interval_ms.max(1)),
            channel_capacity: settings.channel_capacity.max(1),
        }
    }
}

enum Command {
    Record(UsageRecord),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the usage writer. Cheap to clone.
#[derive(Clone)]
pub struct UsageRecorder {
    tx: Option<mpsc::Sender<Command>>,
    clock: Arc<dyn Clock>,
    dropped: Arc<AtomicU64>,
}

impl UsageRecorder {
    /// Start the writer task on the current Tokio runtime.
    pub fn spawn(sink: Arc<dyn UsageSink>, config: RecorderConfig, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        drop(tokio::spawn(run_writer(rx, sink, config)));
        Self {
            tx: Some(tx),
            clock,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A recorder that discards every event.
    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self {
            tx: None,
            clock,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether events are forwarded to a writer.
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Events lost to a full or closed channel.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Attribute and timestamp `event`.
    pub fn stamp(&self, caller: &CallerIdentity, event: UsageEvent) -> UsageRecord {
        UsageRecord {
            id: RecordId::new(),
            principal: caller.principal.clone(),
            session_id: caller.session_id.clone(),
            operation: event.operation,
            model: event.model,
            input_length: event.input_length,
            batch_size: event.batch_size,
            execution_ms: event.execution_ms,
            tokens_processed: event.tokens_processed,
            success: event.success,
            error_message: event.error_message,
            created_at: self.clock.now(),
        }
    }

    /// Queue one usage record. Never blocks, never fails.
    pub fn record(&self, caller: &CallerIdentity, event: UsageEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        let record = self.stamp(caller, event);
        if let Err(e) = tx.try_send(Command::Record(record)) {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "writer stopped",
            };
            warn!(reason, "usage record dropped");
        }
    }

    /// Wait until everything queued so far has been written (or dropped).
    pub async fn flush(&self) {
        self.round_trip(Command::Flush).await;
    }

    /// Flush and stop the writer. Later records are dropped.
    pub async fn shutdown(&self) {
        self.round_trip(Command::Shutdown).await;
    }

    async fn round_trip(&self, make: fn(oneshot::Sender<()>) -> Command) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(make(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run_writer(
    mut rx: mpsc::Receiver<Command>,
    sink: Arc<dyn UsageSink>,
    config: RecorderConfig,
) {
    let mut buffer: Vec<UsageRecord> = Vec::with_capacity(config.batch_size);
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Record(record)) => {
                    let urgent = !record.success;
                    buffer.push(record);
                    if urgent || buffer.len() >= config.batch_size {
                        flush_buffer(&sink, &mut buffer).await;
                    }
                }
                Some(Command::Flush(ack)) => {
                    flush_buffer(&sink, &mut buffer).await;
                    let _ = ack.send(());
                }
                Some(Command::Shutdown(ack)) => {
                    flush_buffer(&sink, &mut buffer).await;
                    let _ = ack.send(());
                    break;
                }
                None => {
                    flush_buffer(&sink, &mut buffer).await;
                    break;
                }
            },
            _ = ticker.tick() => flush_buffer(&sink, &mut buffer).await,
        }
    }
    debug!("usage writer stopped");
}

async fn flush_buffer(sink: &Arc<dyn UsageSink>, buffer: &mut Vec<UsageRecord>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    let count = batch.len();
    let sink = Arc::clone(sink);
    match tokio::task::spawn_blocking(move || sink.write_batch(&batch)).await {
        Ok(Ok(())) => debug!(count, "usage batch written"),
        Ok(Err(e)) => warn!(count, error = %e, "usage batch write failed, records dropped"),
        Err(e) => warn!(count, error = %e, "usage writer panicked, records dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use vectorhub_core::{FixedClock, SystemClock};
    use vectorhub_store::UsageQuery;

    #[derive(Default)]
    struct MemorySink {
        batches: Mutex<Vec<Vec<UsageRecord>>>,
    }

    impl UsageSink for MemorySink {
        fn write_batch(&self, records: &[UsageRecord]) -> Result<(), StoreError> {
            self.batches.lock().push(records.to_vec());
            Ok(())
        }
    }

    impl MemorySink {
        fn total(&self) -> usize {
            self.batches.lock().iter().map(Vec::len).sum()
        }
    }

    struct RejectingSink;

    impl UsageSink for RejectingSink {
        fn write_batch(&self, _records: &[UsageRecord]) -> Result<(), StoreError> {
            Err(StoreError::Database("disk I/O error".into()))
        }
    }

    fn caller() -> CallerIdentity {
        CallerIdentity::new("APP_USER")
    }

    fn slow_config(batch_size: usize) -> RecorderConfig {
        RecorderConfig {
            batch_size,
            flush_interval: Duration::from_secs(3600),
            channel_capacity: 64,
        }
    }

    #[test]
    fn event_builder() {
        let event = UsageEvent::new(OperationKind::EmbedSingle)
            .model("minilm")
            .input_length(11)
            .tokens(2)
            .elapsed(Duration::from_millis(42))
            .failed("boom");
        assert_eq!(event.model.as_deref(), Some("minilm"));
        assert_eq!(event.input_length, Some(11));
        assert_eq!(event.tokens_processed, Some(2));
        assert_eq!(event.execution_ms, Some(42));
        assert!(!event.success);
        assert_eq!(event.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn config_from_settings() {
        let settings = RecorderSettings {
            enabled: true,
            batch_size: 0,
            flush_interval_ms: 250,
            channel_capacity: 5,
        };
        let config = RecorderConfig::from_settings(&settings);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.channel_capacity, 5);
    }

    #[tokio::test]
    async fn stamp_uses_clock_and_caller() {
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let recorder = UsageRecorder::disabled(Arc::new(FixedClock::new(at)));
        let who = caller();
        let record = recorder.stamp(&who, UsageEvent::new(OperationKind::HealthCheck));
        assert_eq!(record.created_at, at);
        assert_eq!(record.principal, "APP_USER");
        assert_eq!(record.session_id, who.session_id);
        assert!(record.id.as_str().starts_with("use_"));
    }

    #[tokio::test]
    async fn explicit_flush_writes_buffered_records() {
        let sink = Arc::new(MemorySink::default());
        let recorder = UsageRecorder::spawn(sink.clone(), slow_config(100), Arc::new(SystemClock));
        for _ in 0..3 {
            recorder.record(&caller(), UsageEvent::new(OperationKind::EmbedSingle));
        }
        recorder.flush().await;
        assert_eq!(sink.total(), 3);
        assert_eq!(sink.batches.lock().len(), 1);
    }

    #[tokio::test]
    async fn batch_size_triggers_flush() {
        let sink = Arc::new(MemorySink::default());
        let recorder = UsageRecorder::spawn(sink.clone(), slow_config(2), Arc::new(SystemClock));
        for _ in 0..5 {
            recorder.record(&caller(), UsageEvent::new(OperationKind::EmbedSingle));
        }
        recorder.flush().await;
        let sizes: Vec<usize> = sink.batches.lock().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn failures_flush_immediately() {
        let sink = Arc::new(MemorySink::default());
        let recorder = UsageRecorder::spawn(sink.clone(), slow_config(100), Arc::new(SystemClock));
        recorder.record(&caller(), UsageEvent::new(OperationKind::EmbedSingle));
        recorder.record(&caller(), UsageEvent::new(OperationKind::EmbedSingle).failed("x"));
        recorder.record(&caller(), UsageEvent::new(OperationKind::EmbedSingle));
        recorder.flush().await;
        let sizes: Vec<usize> = sink.batches.lock().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_flushes_without_request() {
        let sink = Arc::new(MemorySink::default());
        let config = RecorderConfig {
            batch_size: 100,
            flush_interval: Duration::from_millis(50),
            channel_capacity: 8,
        };
        let recorder = UsageRecorder::spawn(sink.clone(), config, Arc::new(SystemClock));
        recorder.record(&caller(), UsageEvent::new(OperationKind::EmbedSingle));
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if sink.total() == 1 {
                break;
            }
        }
        assert_eq!(sink.total(), 1);
    }

    #[tokio::test]
    async fn sink_errors_are_swallowed() {
        let recorder =
            UsageRecorder::spawn(Arc::new(RejectingSink), slow_config(1), Arc::new(SystemClock));
        recorder.record(&caller(), UsageEvent::new(OperationKind::EmbedSingle));
        recorder.flush().await;
        recorder.record(&caller(), UsageEvent::new(OperationKind::EmbedSingle));
        recorder.flush().await;
        assert_eq!(recorder.dropped(), 0);
    }

    #[tokio::test]
    async fn full_channel_drops_and_counts() {
        let sink = Arc::new(MemorySink::default());
        let config = RecorderConfig {
            batch_size: 100,
            flush_interval: Duration::from_secs(3600),
            channel_capacity: 1,
        };
        let recorder = UsageRecorder::spawn(sink.clone(), config, Arc::new(SystemClock));
        // The writer cannot run between these calls on a single-threaded runtime.
        for _ in 0..3 {
            recorder.record(&caller(), UsageEvent::new(OperationKind::EmbedSingle));
        }
        assert_eq!(recorder.dropped(), 2);
        recorder.flush().await;
        assert_eq!(sink.total(), 1);
    }

    #[tokio::test]
    async fn shutdown_flushes_then_drops_later_records() {
        let sink = Arc::new(MemorySink::default());
        let recorder = UsageRecorder::spawn(sink.clone(), slow_config(100), Arc::new(SystemClock));
        recorder.record(&caller(), UsageEvent::new(OperationKind::EmbedSingle));
        recorder.shutdown().await;
        assert_eq!(sink.total(), 1);

        recorder.record(&caller(), UsageEvent::new(OperationKind::EmbedSingle));
        recorder.flush().await;
        assert_eq!(sink.total(), 1);
        assert_eq!(recorder.dropped(), 1);
    }

    #[tokio::test]
    async fn disabled_recorder_is_inert() {
        let recorder = UsageRecorder::disabled(Arc::new(SystemClock));
        assert!(!recorder.is_enabled());
        recorder.record(&caller(), UsageEvent::new(OperationKind::EmbedSingle));
        recorder.flush().await;
        recorder.shutdown().await;
        assert_eq!(recorder.dropped(), 0);
    }

    #[tokio::test]
    async fn sqlite_sink_persists_records() {
        let db = Database::in_memory().unwrap();
        let recorder = UsageRecorder::spawn(
            Arc::new(SqliteUsageSink::new(db.clone())),
            slow_config(100),
            Arc::new(SystemClock),
        );

        let ok = UsageEvent::new(OperationKind::EmbedSingle)
            .model("minilm")
            .elapsed(Duration::from_millis(8));
        recorder.record(&caller(), ok.clone());
        recorder.record(&caller(), ok.elapsed(Duration::from_millis(12)));
        recorder.record(
            &caller(),
            UsageEvent::new(OperationKind::EmbedSingle)
                .model("minilm")
                .elapsed(Duration::from_millis(500))
                .failed("backend down"),
        );
        recorder.flush().await;

        let usage = UsageRepo::new(db);
        assert_eq!(usage.count().unwrap(), 3);
        let failures = usage
            .query(&UsageQuery {
                success: Some(false),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(failures[0].error_message.as_deref(), Some("backend down"));
    }

    #[test]
    fn sqlite_sink_keeps_good_records_when_one_fails() {
        let db = Database::in_memory().unwrap();
        let sink = SqliteUsageSink::new(db.clone());
        let recorder = UsageRecorder::disabled(Arc::new(SystemClock));
        let first = recorder.stamp(&caller(), UsageEvent::new(OperationKind::EmbedSingle));
        let second = recorder.stamp(&caller(), UsageEvent::new(OperationKind::EmbedBatch));
        // same primary key as `first`
        let clash = UsageRecord {
            operation: OperationKind::Similarity,
            ..first.clone()
        };

        sink.write_batch(&[first.clone(), second, clash]).unwrap();
        let usage = UsageRepo::new(db);
        assert_eq!(usage.count().unwrap(), 2);

        // every record collides now
        assert!(sink.write_batch(&[first]).is_err());
        assert_eq!(usage.count().unwrap(), 2);
    }
}
