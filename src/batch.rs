//! Batch processor: owns the persistent queue, the in-memory staging
//! window, the export worker, and the retry/requeue path.

use crate::config::BufferConfig;
use crate::error::{PipelineError, Result};
use crate::exporter::Exporter;
use crate::metrics::metrics;
use crate::queue::PersistentQueue;
use crate::record::Record;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// The five-step bounded backoff `on_emit` uses when the queue reports
/// full: 10ms, 20ms, 40ms, 80ms, 160ms, ~310ms total.
const ENQUEUE_RETRY_DELAYS_MS: [u64; 5] = [10, 20, 40, 80, 160];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Draining,
    Closed,
}

/// Owns a [`PersistentQueue`] and a single background worker task that
/// drains it into `exporter` in batches.
pub struct BatchProcessor {
    queue: Arc<PersistentQueue<Record>>,
    exporter: Arc<dyn Exporter>,
    config: BufferConfig,
    state: std::sync::Mutex<State>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

impl BatchProcessor {
    pub fn new(queue: PersistentQueue<Record>, exporter: Arc<dyn Exporter>, config: BufferConfig) -> Arc<Self> {
        let processor = Arc::new(BatchProcessor {
            queue: Arc::new(queue),
            exporter,
            config,
            state: std::sync::Mutex::new(State::Open),
            worker: std::sync::Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        });
        processor.spawn_worker();
        processor
    }

    fn spawn_worker(self: &Arc<Self>) {
        let processor = self.clone();
        let handle = tokio::spawn(async move { processor.run_worker().await });
        *self.worker.lock().expect("worker mutex poisoned") = Some(handle);
    }

    fn endpoint(&self) -> String {
        self.exporter.endpoint()
    }

    /// Forwards the terminal exporter's [`Exporter::drop_reason`] so
    /// callers that count a record as delivered on enqueue (e.g.
    /// `BufferedClient`) can instead route it to `DroppedLogs{reason}`,
    /// keeping the two counters mutually exclusive for exporters (like the
    /// noop variant) that never actually deliver anything.
    pub fn drop_reason(&self) -> Option<&'static str> {
        self.exporter.drop_reason()
    }

    /// Advisory gate: false once closed. Callers must still handle
    /// `QueueFull` from [`Self::on_emit`] because this check is racy.
    pub fn enabled(&self) -> bool {
        *self.state.lock().expect("state mutex poisoned") == State::Open
    }

    /// Serializes and enqueues `record`. Retries up to 5 times with
    /// exponential backoff when the queue is at `max_queue_size`, releasing
    /// no external lock between attempts (the persistent queue's own lock is
    /// not held across the sleep). After the final failure the record is
    /// dropped and counted.
    pub async fn on_emit(&self, record: Record) -> Result<()> {
        if !self.enabled() {
            return Err(PipelineError::ProcessorClosed);
        }

        for delay_ms in ENQUEUE_RETRY_DELAYS_MS {
            if self.queue.size() < self.config.max_queue_size {
                self.queue.enqueue(&record)?;
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if self.queue.size() < self.config.max_queue_size {
            self.queue.enqueue(&record)?;
            return Ok(());
        }

        metrics()
            .dropped_logs
            .with_label_values(&[&self.endpoint(), "queue_full"])
            .inc();
        Err(PipelineError::QueueFull)
    }

    async fn run_worker(self: Arc<Self>) {
        let mut staging: Vec<Record> = Vec::with_capacity(self.config.max_batch_size);
        let mut interval = tokio::time::interval(self.config.export_interval);
        let mut gauge_interval = tokio::time::interval(Duration::from_secs(30));
        // The first tick of an `interval` fires immediately; consume it so
        // the loop's first real tick is one `export_interval` out.
        interval.tick().await;
        gauge_interval.tick().await;

        loop {
            tokio::select! {
                _ = self.queue_wake() => {
                    self.drain_into(&mut staging).await;
                    if staging.len() >= self.config.max_batch_size {
                        self.export_staging(&mut staging).await;
                    }
                }
                _ = interval.tick() => {
                    self.drain_into(&mut staging).await;
                    if !staging.is_empty() {
                        self.export_staging(&mut staging).await;
                    }
                }
                _ = gauge_interval.tick() => {
                    let size = self.queue.size() as f64;
                    metrics().dque_size.with_label_values(&[self.queue.name()]).set(size);
                    metrics().buffered_logs.with_label_values(&[&self.endpoint()]).set(size);
                    if self.config.dque.as_ref().is_some_and(|d| d.turbo) {
                        let _ = self.queue.turbo_sync();
                    }
                }
                _ = self.shutdown.notified() => {
                    self.drain_into(&mut staging).await;
                    if !staging.is_empty() {
                        self.export_staging(&mut staging).await;
                    }
                    while self.queue.size() > 0 {
                        self.drain_into(&mut staging).await;
                        if staging.is_empty() {
                            break;
                        }
                        self.export_staging(&mut staging).await;
                    }
                    return;
                }
            }
        }
    }

    /// Waits for the queue's enqueue notification; resolves immediately if
    /// data is already sitting in the queue. Shutdown is observed via the
    /// sibling `self.shutdown.notified()` branch in the `select!` below, not
    /// through this wait.
    async fn queue_wake(&self) {
        self.queue.wait_for_data().await;
    }

    async fn drain_into(&self, staging: &mut Vec<Record>) {
        while staging.len() < self.config.max_batch_size {
            match self.queue.dequeue() {
                Ok(Some(record)) => staging.push(record),
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(?err, "dequeued entry could not be decoded, discarding");
                    metrics()
                        .errors
                        .with_label_values(&["dequeuer_not_valid_type"])
                        .inc();
                }
            }
        }
    }

    async fn export_staging(&self, staging: &mut Vec<Record>) {
        if staging.is_empty() {
            return;
        }
        let batch_size = staging.len();
        let deadline = Duration::from_secs(30);
        match self.exporter.export(staging, deadline).await {
            Ok(()) => {
                match self.exporter.drop_reason() {
                    Some(reason) => metrics()
                        .dropped_logs
                        .with_label_values(&[&self.endpoint(), reason])
                        .inc_by(batch_size as f64),
                    None => metrics()
                        .exported_client_logs
                        .with_label_values(&[&self.endpoint()])
                        .inc_by(batch_size as f64),
                }
                staging.clear();
            }
            Err(err) => {
                tracing::error!(?err, batch_size, "export failed, requeuing batch");
                metrics()
                    .dropped_logs
                    .with_label_values(&[&self.endpoint(), "export_error"])
                    .inc_by(batch_size as f64);
                for record in staging.drain(..) {
                    if let Err(err) = self.queue.enqueue(&record) {
                        tracing::error!(?err, "requeue failed, record lost");
                        metrics()
                            .errors
                            .with_label_values(&["requeue_marshal_error"])
                            .inc();
                    }
                }
            }
        }
    }

    /// Drains the queue until empty or `deadline` expires, exporting in
    /// batches of up to `max_batch_size`.
    pub async fn force_flush(&self, deadline: Duration) -> Result<()> {
        let start = tokio::time::Instant::now();
        let mut staging = Vec::with_capacity(self.config.max_batch_size);
        while self.queue.size() > 0 && start.elapsed() < deadline {
            self.drain_into(&mut staging).await;
            if staging.is_empty() {
                break;
            }
            self.export_staging(&mut staging).await;
        }
        Ok(())
    }

    /// Sets closed, cancels the worker, waits for it, final-flushes, closes
    /// the queue (without deleting files), shuts down the exporter.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        {
            let mut state = self.state.lock().expect("state mutex poisoned");
            if *state == State::Closed {
                return Ok(());
            }
            *state = State::Draining;
        }

        self.shutdown.notify_one();
        let handle = self.worker.lock().expect("worker mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(deadline, handle).await;
        }

        self.queue.close();
        if self.config.delete_on_stop {
            let _ = self.queue.delete_all();
        }
        self.exporter.shutdown().await?;

        *self.state.lock().expect("state mutex poisoned") = State::Closed;
        Ok(())
    }

    /// Immediate shutdown: cancels in-flight work without draining. The
    /// worker task is aborted; the queue is closed but its files are kept
    /// unless `delete_on_stop` says otherwise.
    pub fn stop(&self) {
        *self.state.lock().expect("state mutex poisoned") = State::Draining;
        if let Some(handle) = self.worker.lock().expect("worker mutex poisoned").take() {
            handle.abort();
        }
        self.queue.close();
        if self.config.delete_on_stop {
            let _ = self.queue.delete_all();
        }
        *self.state.lock().expect("state mutex poisoned") = State::Closed;
    }

    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BufferConfig, ExporterConfig};
    use crate::exporter::NoopExporter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tempfile::tempdir;

    struct CountingExporter {
        exported: Arc<AtomicUsize>,
        fail_first_n: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Exporter for CountingExporter {
        async fn export(&self, batch: &[Record], _deadline: Duration) -> Result<()> {
            if self.fail_first_n.load(AtomicOrdering::SeqCst) > 0 {
                self.fail_first_n.fetch_sub(1, AtomicOrdering::SeqCst);
                return Err(PipelineError::Export("transient".into()));
            }
            self.exported.fetch_add(batch.len(), AtomicOrdering::SeqCst);
            Ok(())
        }
        async fn force_flush(&self) -> Result<()> {
            Ok(())
        }
        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
        fn endpoint(&self) -> String {
            "test".to_string()
        }
    }

    fn buffer_config(dir: &std::path::Path) -> BufferConfig {
        BufferConfig {
            enabled: true,
            dque: Some(crate::config::DqueConfig {
                name: "q".into(),
                dir: dir.to_string_lossy().into_owned(),
                segment_size: 50,
                turbo: false,
            }),
            max_queue_size: 100,
            max_batch_size: 10,
            export_interval: Duration::from_millis(50),
            delete_on_stop: false,
        }
    }

    #[tokio::test]
    async fn happy_path_exports_all_records_in_batches() {
        let dir = tempdir().unwrap();
        let config = buffer_config(dir.path());
        let queue = PersistentQueue::open("q", dir.path(), config.segment_size()).unwrap();
        let exported = Arc::new(AtomicUsize::new(0));
        let exporter = Arc::new(CountingExporter {
            exported: exported.clone(),
            fail_first_n: Arc::new(AtomicUsize::new(0)),
        });
        let processor = BatchProcessor::new(queue, exporter, config);

        for i in 0..50u32 {
            processor.on_emit(Record::new(i as u128, format!("msg-{i}"))).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(exported.load(AtomicOrdering::SeqCst), 50);
        processor.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn requeues_batch_on_export_failure() {
        let dir = tempdir().unwrap();
        let config = buffer_config(dir.path());
        let queue = PersistentQueue::open("q", dir.path(), config.segment_size()).unwrap();
        let exported = Arc::new(AtomicUsize::new(0));
        let exporter = Arc::new(CountingExporter {
            exported: exported.clone(),
            fail_first_n: Arc::new(AtomicUsize::new(3)),
        });
        let processor = BatchProcessor::new(queue, exporter, config);

        for i in 0..10u32 {
            processor.on_emit(Record::new(i as u128, format!("msg-{i}"))).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(exported.load(AtomicOrdering::SeqCst), 10);
        processor.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn on_emit_refused_after_shutdown() {
        let dir = tempdir().unwrap();
        let config = buffer_config(dir.path());
        let queue = PersistentQueue::open("q", dir.path(), config.segment_size()).unwrap();
        let exporter = Arc::new(NoopExporter::new(&ExporterConfig::default()));
        let processor = BatchProcessor::new(queue, exporter, config);
        processor.shutdown(Duration::from_secs(5)).await.unwrap();
        let result = processor.on_emit(Record::new(0, "x")).await;
        assert!(matches!(result, Err(PipelineError::ProcessorClosed)));
    }
}
