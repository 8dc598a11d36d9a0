// packages/engine/src/recording/recorder.rs
//! Recorder sink and queued recorder
//!
//! The session publishes [`ExchangeRecord`] snapshots at creation, on
//! headers, on redirects and at finalization. Publication is best-effort:
//! recorders must return quickly and must tolerate repeated snapshots of the
//! same `id` (the last one wins).

use crate::observability::RECORDER_DROPPED;
use crate::recording::event_queue::{EventQueue, QueueStats};
use crate::recording::record::ExchangeRecord;
use crate::utils::config::RecorderSettings;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Sink for exchange snapshots
pub trait Recorder: Send + Sync {
    /// Accept a snapshot; must not block the caller
    fn save_request(&self, record: ExchangeRecord) -> Result<()>;
}

/// Queued recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Maximum buffered snapshots
    pub queue_capacity: usize,

    /// Flush interval (milliseconds)
    pub flush_interval_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        RecorderSettings::default().into()
    }
}

impl From<RecorderSettings> for RecorderConfig {
    fn from(settings: RecorderSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            flush_interval_ms: settings.flush_interval_ms,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    flushed: AtomicU64,
    sink_errors: AtomicU64,
}

/// Recorder that decouples publication from a slower sink
///
/// Snapshots go into a lock-free bounded queue and are delivered to the
/// wrapped sink by a background task, on an interval or as soon as a final
/// snapshot arrives. A full queue drops the snapshot instead of waiting.
pub struct QueuedRecorder {
    config: RecorderConfig,
    queue: Arc<EventQueue<ExchangeRecord>>,
    sink: Arc<dyn Recorder>,
    flush_notify: Arc<Notify>,
    drain_lock: Arc<Mutex<()>>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl QueuedRecorder {
    pub fn new(config: RecorderConfig, sink: Arc<dyn Recorder>) -> Self {
        info!(
            "Initializing queued recorder (capacity {}, flush every {}ms)",
            config.queue_capacity, config.flush_interval_ms
        );

        Self {
            queue: Arc::new(EventQueue::new(config.queue_capacity)),
            config,
            sink,
            flush_notify: Arc::new(Notify::new()),
            drain_lock: Arc::new(Mutex::new(())),
            writer_handle: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Start the background writer
    pub fn start(&self) {
        let mut handle_slot = self.writer_handle.lock();
        if handle_slot.is_some() {
            return;
        }

        let queue = Arc::clone(&self.queue);
        let sink = Arc::clone(&self.sink);
        let flush_notify = Arc::clone(&self.flush_notify);
        let drain_lock = Arc::clone(&self.drain_lock);
        let counters = Arc::clone(&self.counters);
        let flush_interval = Duration::from_millis(self.config.flush_interval_ms.max(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(flush_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = flush_notify.notified() => {}
                }

                Self::drain(&queue, sink.as_ref(), &drain_lock, &counters);
            }
        });

        *handle_slot = Some(handle);
        debug!("Queued recorder writer started");
    }

    /// Deliver everything queued to the sink now
    pub fn flush(&self) -> usize {
        Self::drain(&self.queue, self.sink.as_ref(), &self.drain_lock, &self.counters)
    }

    fn drain(
        queue: &EventQueue<ExchangeRecord>,
        sink: &dyn Recorder,
        drain_lock: &Mutex<()>,
        counters: &Counters,
    ) -> usize {
        // Serialized so snapshots of one exchange reach the sink in publication order
        let _guard = drain_lock.lock();
        let mut delivered = 0;

        while let Some(record) = queue.try_pop() {
            let id = record.id.clone();
            match sink.save_request(record) {
                Ok(()) => {
                    delivered += 1;
                    counters.flushed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.sink_errors.fetch_add(1, Ordering::Relaxed);
                    error!("Recorder sink rejected snapshot {}: {}", id, e);
                }
            }
        }

        if delivered > 0 {
            debug!("Delivered {} snapshots to recorder sink", delivered);
        }
        delivered
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            queue: self.queue.stats(),
            flushed: self.counters.flushed.load(Ordering::Relaxed),
            sink_errors: self.counters.sink_errors.load(Ordering::Relaxed),
        }
    }

    /// Stop the writer and deliver whatever is still queued
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down queued recorder");

        let handle = self.writer_handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        let remaining = self.flush();
        debug!("Flushed {} snapshots on shutdown", remaining);
        Ok(())
    }
}

impl Recorder for QueuedRecorder {
    fn save_request(&self, record: ExchangeRecord) -> Result<()> {
        let is_final = record.state.is_terminal();

        self.queue.push(record).map_err(|rejected| {
            metrics::counter!(RECORDER_DROPPED).increment(1);
            warn!("Recorder queue full, dropping snapshot {}", rejected.id);
            EngineError::RecordingFailed(format!("Recorder queue full, dropped {}", rejected.id))
        })?;

        if is_final {
            self.flush_notify.notify_one();
        }
        Ok(())
    }
}

impl Drop for QueuedRecorder {
    fn drop(&mut self) {
        if let Some(handle) = self.writer_handle.lock().take() {
            handle.abort();
        }
    }
}

/// Queued recorder statistics
#[derive(Debug, Clone, Default)]
pub struct RecorderStats {
    pub queue: QueueStats,
    pub flushed: u64,
    pub sink_errors: u64,
}

/// Recorder that writes finished exchanges to the log as JSON lines
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRecorder;

impl Recorder for LogRecorder {
    fn save_request(&self, record: ExchangeRecord) -> Result<()> {
        if !record.state.is_terminal() {
            debug!(id = %record.id, state = record.state.as_str(), "exchange updated");
            return Ok(());
        }

        let summary = serde_json::json!({
            "id": record.id,
            "state": record.state,
            "method": record.request.method,
            "url": record.request.url,
            "status": record.status(),
            "mime_type": record.response.as_ref().and_then(|r| r.mime_type.clone()),
            "response_bytes": record.body().len(),
            "redirects": record.redirects.len(),
            "duration_ms": record.duration.map(|d| d.as_secs_f64() * 1000.0),
            "error": record.error_description,
        });

        info!(target: "wiretap::exchange", "{}", summary);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::request::OutboundRequest;
    use crate::recording::memory::MemoryRecorder;
    use crate::recording::record::{ExchangeState, RequestSnapshot};
    use http::Uri;

    fn record() -> ExchangeRecord {
        let request = OutboundRequest::get(Uri::from_static("http://example.com/"));
        ExchangeRecord::new(RequestSnapshot::capture(&request))
    }

    struct FailingSink;

    impl Recorder for FailingSink {
        fn save_request(&self, _record: ExchangeRecord) -> Result<()> {
            Err(EngineError::RecordingFailed("disk full".to_string()))
        }
    }

    #[test]
    fn test_config_from_settings() {
        let config = RecorderConfig::default();
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.flush_interval_ms, 100);
    }

    #[test]
    fn test_flush_delivers_to_sink() {
        let sink = Arc::new(MemoryRecorder::new());
        let recorder = QueuedRecorder::new(RecorderConfig::default(), sink.clone());

        let record = record();
        recorder.save_request(record.clone()).unwrap();
        assert!(sink.is_empty());

        assert_eq!(recorder.flush(), 1);
        assert_eq!(sink.get(&record.id).unwrap().id, record.id);
        assert_eq!(recorder.stats().flushed, 1);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let sink = Arc::new(MemoryRecorder::new());
        let config = RecorderConfig {
            queue_capacity: 1,
            flush_interval_ms: 100,
        };
        let recorder = QueuedRecorder::new(config, sink);

        recorder.save_request(record()).unwrap();
        let result = recorder.save_request(record());

        assert!(matches!(result, Err(EngineError::RecordingFailed(_))));
        assert_eq!(recorder.stats().queue.drop_count, 1);
    }

    #[test]
    fn test_sink_errors_counted() {
        let recorder = QueuedRecorder::new(RecorderConfig::default(), Arc::new(FailingSink));
        recorder.save_request(record()).unwrap();

        assert_eq!(recorder.flush(), 0);
        assert_eq!(recorder.stats().sink_errors, 1);
    }

    #[tokio::test]
    async fn test_background_writer_flushes_final_snapshot() {
        let sink = Arc::new(MemoryRecorder::new());
        let recorder = QueuedRecorder::new(RecorderConfig::default(), sink.clone());
        recorder.start();

        let mut record = record();
        record.state = ExchangeState::Completed;
        recorder.save_request(record.clone()).unwrap();

        for _ in 0..50 {
            if sink.get(&record.id).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(sink.get(&record.id).unwrap().state, ExchangeState::Completed);
        recorder.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let sink = Arc::new(MemoryRecorder::new());
        let recorder = QueuedRecorder::new(RecorderConfig::default(), sink.clone());

        recorder.save_request(record()).unwrap();
        recorder.save_request(record()).unwrap();
        recorder.shutdown().await.unwrap();

        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_log_recorder_accepts_snapshots() {
        let mut record = record();
        assert!(LogRecorder.save_request(record.clone()).is_ok());

        record.state = ExchangeState::Failed;
        record.error_description = Some("timeout".to_string());
        assert!(LogRecorder.save_request(record).is_ok());
    }
}
