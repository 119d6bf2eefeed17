//! Output Client: the per-target entry point.
//!
//! A single trait is shared by every terminal client variant and every
//! decorator, so the whole delivery chain (rate limiting, buffering,
//! tenant fan-out, label packing, sorting) is just nested implementations
//! of one interface, in the same interface-typed wrapper style
//! `opentelemetry-otlp`'s builder chain uses.

use crate::batch::BatchProcessor;
use crate::config::BufferConfig;
use crate::error::{PipelineError, Result};
use crate::exporter::Exporter;
use crate::metrics::metrics;
use crate::queue::PersistentQueue;
use crate::ratelimiter::RateLimiter;
use crate::record::Record;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Contract shared by every terminal client and every decorator in the
/// chain.
#[async_trait]
pub trait OutputClient: Send + Sync {
    /// Non-blocking acceptance of one record.
    async fn handle(&self, record: Record) -> Result<()>;

    /// Best-effort immediate shutdown; may abandon unsent records on disk.
    async fn stop(&self);

    /// Flush-and-close: stops accepting, drains within `deadline`, then
    /// shuts the exporter down.
    async fn stop_wait(&self, deadline: Duration) -> Result<()>;

    /// Credential-redacted view of the target endpoint.
    fn endpoint(&self) -> String;
}

/// Terminal client with no persistent queue: every `handle()` call exports
/// the single record directly (used when `BufferConfig::enabled` is false).
pub struct WireClient {
    exporter: Arc<dyn Exporter>,
    export_timeout: Duration,
}

impl WireClient {
    pub fn new(exporter: Arc<dyn Exporter>, export_timeout: Duration) -> Self {
        WireClient {
            exporter,
            export_timeout,
        }
    }
}

#[async_trait]
impl OutputClient for WireClient {
    async fn handle(&self, record: Record) -> Result<()> {
        let endpoint = self.exporter.endpoint();
        match self.exporter.export(&[record], self.export_timeout).await {
            Ok(()) => {
                match self.exporter.drop_reason() {
                    Some(reason) => metrics().dropped_logs.with_label_values(&[&endpoint, reason]).inc(),
                    None => metrics().output_client_logs.with_label_values(&[&endpoint]).inc(),
                }
                Ok(())
            }
            Err(err) => {
                metrics()
                    .dropped_logs
                    .with_label_values(&[&endpoint, "export_error"])
                    .inc();
                Err(err)
            }
        }
    }

    async fn stop(&self) {
        let _ = self.exporter.shutdown().await;
    }

    async fn stop_wait(&self, _deadline: Duration) -> Result<()> {
        self.exporter.force_flush().await?;
        self.exporter.shutdown().await
    }

    fn endpoint(&self) -> String {
        self.exporter.endpoint()
    }
}

/// Terminal client backed by a persistent-queue [`BatchProcessor`]. The
/// buffering adapter is folded into the terminal rather than kept as a
/// separate wrapper, since the batch processor talks to the exporter
/// directly rather than through another `OutputClient`.
pub struct BufferedClient {
    processor: Arc<BatchProcessor>,
    endpoint: String,
}

impl BufferedClient {
    pub fn new(exporter: Arc<dyn Exporter>, queue: PersistentQueue<Record>, config: BufferConfig) -> Self {
        let endpoint = exporter.endpoint();
        BufferedClient {
            processor: BatchProcessor::new(queue, exporter, config),
            endpoint,
        }
    }
}

#[async_trait]
impl OutputClient for BufferedClient {
    async fn handle(&self, record: Record) -> Result<()> {
        let result = self.processor.on_emit(record).await;
        match &result {
            // Exporters that never deliver anything (the noop variant) are
            // counted once, by the worker's `export_staging` when it later
            // drains this record, not here — otherwise it lands in
            // `DroppedLogs` twice for the same record.
            Ok(()) if self.processor.drop_reason().is_some() => {}
            Ok(()) => metrics().output_client_logs.with_label_values(&[&self.endpoint]).inc(),
            Err(PipelineError::QueueFull) => {}
            Err(_) => metrics()
                .dropped_logs
                .with_label_values(&[&self.endpoint, "marshal_error"])
                .inc(),
        }
        result
    }

    async fn stop(&self) {
        self.processor.stop();
    }

    async fn stop_wait(&self, deadline: Duration) -> Result<()> {
        self.processor.shutdown(deadline).await
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// Rate-limiting decorator: gates `handle()` on a token bucket before
/// forwarding to `inner`. Absent entirely when throttling is disabled, so
/// there's no allocation or indirection cost when it isn't configured.
pub struct RateLimitedClient {
    inner: Arc<dyn OutputClient>,
    limiter: RateLimiter,
}

impl RateLimitedClient {
    pub fn new(inner: Arc<dyn OutputClient>, rate_per_second: f64, burst_multiplier: f64) -> Self {
        RateLimitedClient {
            inner,
            limiter: RateLimiter::new(rate_per_second, burst_multiplier),
        }
    }
}

#[async_trait]
impl OutputClient for RateLimitedClient {
    async fn handle(&self, record: Record) -> Result<()> {
        if !self.limiter.try_acquire() {
            metrics()
                .throttled_logs
                .with_label_values(&[&self.inner.endpoint()])
                .inc();
            return Err(PipelineError::Throttled);
        }
        self.inner.handle(record).await
    }

    async fn stop(&self) {
        self.inner.stop().await;
    }

    async fn stop_wait(&self, deadline: Duration) -> Result<()> {
        self.inner.stop_wait(deadline).await
    }

    fn endpoint(&self) -> String {
        self.inner.endpoint()
    }
}
