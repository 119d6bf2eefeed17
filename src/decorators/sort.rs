//! Sort decorator: accumulates records into a window and forwards them in
//! (label-set, timestamp) order. Uses a single channel for ingress plus a
//! ticker for the flush window; neither is exposed externally.

use crate::client::OutputClient;
use crate::error::{PipelineError, Result};
use crate::record::{cmp_by_labels_then_timestamp, Record};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// The window flushes once it holds `batch_size` records, or once the
/// oldest buffered record is older than `batch_wait + 5s`.
const AGE_GRACE: Duration = Duration::from_secs(5);

pub struct SortDecorator {
    inner: Arc<dyn OutputClient>,
    tx: mpsc::Sender<Record>,
    shutdown: Arc<Notify>,
    flush_on_shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SortDecorator {
    pub fn new(inner: Arc<dyn OutputClient>, batch_size: usize, batch_wait: Duration) -> Arc<Self> {
        // Unbuffered in spirit: tokio requires capacity >= 1, so a
        // capacity-1 channel is the closest direct equivalent while still
        // allowing `try_send` users to observe backpressure immediately.
        let (tx, rx) = mpsc::channel(1);
        let shutdown = Arc::new(Notify::new());
        let flush_on_shutdown = Arc::new(AtomicBool::new(false));

        let decorator = Arc::new(SortDecorator {
            inner: inner.clone(),
            tx,
            shutdown: shutdown.clone(),
            flush_on_shutdown: flush_on_shutdown.clone(),
            worker: Mutex::new(None),
        });

        let worker_inner = inner;
        let handle = tokio::spawn(Self::run_worker(
            rx,
            worker_inner,
            batch_size,
            batch_wait + AGE_GRACE,
            shutdown,
            flush_on_shutdown,
        ));
        *decorator.worker.lock().expect("worker mutex poisoned") = Some(handle);
        decorator
    }

    async fn run_worker(
        mut rx: mpsc::Receiver<Record>,
        inner: Arc<dyn OutputClient>,
        batch_size: usize,
        max_age: Duration,
        shutdown: Arc<Notify>,
        flush_on_shutdown: Arc<AtomicBool>,
    ) {
        let mut window: Vec<Record> = Vec::with_capacity(batch_size);
        let mut window_opened_at: Option<Instant> = None;
        let mut ticker = tokio::time::interval(Duration::from_millis(250));

        loop {
            tokio::select! {
                maybe_record = rx.recv() => {
                    match maybe_record {
                        Some(record) => {
                            if window.is_empty() {
                                window_opened_at = Some(Instant::now());
                            }
                            window.push(record);
                            if window.len() >= batch_size {
                                Self::flush(&inner, &mut window).await;
                                window_opened_at = None;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if let Some(opened_at) = window_opened_at {
                        if opened_at.elapsed() >= max_age && !window.is_empty() {
                            Self::flush(&inner, &mut window).await;
                            window_opened_at = None;
                        }
                    }
                }
                _ = shutdown.notified() => {
                    if flush_on_shutdown.load(Ordering::SeqCst) {
                        Self::flush(&inner, &mut window).await;
                    }
                    break;
                }
            }
        }
    }

    async fn flush(inner: &Arc<dyn OutputClient>, window: &mut Vec<Record>) {
        window.sort_by(cmp_by_labels_then_timestamp);
        for record in window.drain(..) {
            if let Err(err) = inner.handle(record).await {
                tracing::warn!(?err, "sort decorator: forwarding buffered record failed");
            }
        }
    }
}

#[async_trait]
impl OutputClient for SortDecorator {
    async fn handle(&self, record: Record) -> Result<()> {
        self.tx
            .send(record)
            .await
            .map_err(|_| PipelineError::ProcessorClosed)
    }

    async fn stop(&self) {
        self.flush_on_shutdown.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
        if let Some(handle) = self.worker.lock().expect("worker mutex poisoned").take() {
            handle.abort();
        }
        self.inner.stop().await;
    }

    async fn stop_wait(&self, deadline: Duration) -> Result<()> {
        self.flush_on_shutdown.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
        let handle = self.worker.lock().expect("worker mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(deadline, handle).await;
        }
        self.inner.stop_wait(deadline).await
    }

    fn endpoint(&self) -> String {
        self.inner.endpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct CapturingClient {
        records: StdMutex<Vec<Record>>,
    }

    #[async_trait]
    impl OutputClient for CapturingClient {
        async fn handle(&self, record: Record) -> Result<()> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
        async fn stop(&self) {}
        async fn stop_wait(&self, _deadline: Duration) -> Result<()> {
            Ok(())
        }
        fn endpoint(&self) -> String {
            "capture".into()
        }
    }

    #[tokio::test]
    async fn flushes_in_sorted_order_once_batch_size_reached() {
        let capture = Arc::new(CapturingClient {
            records: StdMutex::new(Vec::new()),
        });
        let decorator = SortDecorator::new(capture.clone(), 3, Duration::from_secs(10));

        decorator.handle(Record::new(30, "c")).await.unwrap();
        decorator.handle(Record::new(10, "a")).await.unwrap();
        decorator.handle(Record::new(20, "b")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let records = capture.records.lock().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].timestamp_unix_nano, 10);
        assert_eq!(records[1].timestamp_unix_nano, 20);
        assert_eq!(records[2].timestamp_unix_nano, 30);
        drop(records);
        decorator.stop_wait(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn flushes_after_age_threshold_even_if_not_full() {
        let capture = Arc::new(CapturingClient {
            records: StdMutex::new(Vec::new()),
        });
        let decorator = SortDecorator::new(capture.clone(), 100, Duration::from_millis(1));

        decorator.handle(Record::new(1, "a")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(capture.records.lock().unwrap().len(), 1);
        decorator.stop_wait(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn stop_discards_buffered_window() {
        let capture = Arc::new(CapturingClient {
            records: StdMutex::new(Vec::new()),
        });
        let decorator = SortDecorator::new(capture.clone(), 100, Duration::from_secs(60));
        decorator.handle(Record::new(1, "a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        decorator.stop().await;
        assert_eq!(capture.records.lock().unwrap().len(), 0);
    }
}
