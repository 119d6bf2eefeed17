//! Configuration tree consumed by the [`crate::factory`] to build a pipeline.
//!
//! A plain, `serde`-deserializable struct tree with documented defaults,
//! rather than a builder-only API, since this crate is embedded via
//! configuration rather than assembled fluently by application code.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Which terminal exporter variant a client instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    OtlpGrpc,
    OtlpHttp,
    Stdout,
    Noop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    Gzip,
}

/// TLS material for an OTLP exporter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    pub ca_cert_path: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub server_name: Option<String>,
    /// Bypasses certificate verification. Must never be the default and is
    /// dangerous in production use; left to the caller to gate.
    #[serde(default)]
    pub insecure: bool,
    #[serde(default = "default_min_tls_version")]
    pub min_version: TlsVersion,
    pub max_version: Option<TlsVersion>,
}

fn default_min_tls_version() -> TlsVersion {
    TlsVersion::Tls1_2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "1.2")]
    Tls1_2,
    #[serde(rename = "1.3")]
    Tls1_3,
}

/// Exponential backoff-with-jitter parameters for wire-layer retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            max_elapsed_time: Duration::from_secs(120),
        }
    }
}

/// Configuration for one terminal [`crate::exporter::Exporter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub client_type: ClientType,
    pub endpoint: String,
    pub headers: BTreeMap<String, String>,
    pub compression: Compression,
    pub tls: Option<TlsConfig>,
    pub export_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        ExporterConfig {
            client_type: ClientType::Noop,
            endpoint: String::new(),
            headers: BTreeMap::new(),
            compression: Compression::None,
            tls: None,
            export_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

/// On-disk persistent queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DqueConfig {
    pub name: String,
    pub dir: String,
    pub segment_size: usize,
    #[serde(default)]
    pub turbo: bool,
}

/// Batch processor + persistent queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub enabled: bool,
    pub dque: Option<DqueConfig>,
    pub max_queue_size: usize,
    pub max_batch_size: usize,
    pub export_interval: Duration,
    /// Whether `Stop()` (not `StopWait()`) deletes the on-disk queue.
    /// Defaults to not deleting; see DESIGN.md.
    pub delete_on_stop: bool,
}

impl BufferConfig {
    /// Segment size to open the persistent queue with; falls back to a
    /// sensible default when no `dque` section was configured (e.g. when
    /// buffering is disabled but a caller still wants to construct a queue
    /// for testing).
    pub fn segment_size(&self) -> usize {
        self.dque.as_ref().map(|d| d.segment_size).unwrap_or(1000)
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            enabled: false,
            dque: None,
            max_queue_size: 10_000,
            max_batch_size: 100,
            export_interval: Duration::from_secs(1),
            delete_on_stop: false,
        }
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub enabled: bool,
    pub rate_per_second: f64,
    /// Burst defaults to 2x rate but is left configurable; see DESIGN.md.
    pub burst_multiplier: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        ThrottleConfig {
            enabled: false,
            rate_per_second: 1000.0,
            burst_multiplier: 2.0,
        }
    }
}

/// Full per-target pipeline configuration, consumed by [`crate::factory::PipelineFactory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub exporter: ExporterConfig,
    pub buffer: BufferConfig,
    pub throttle: ThrottleConfig,
    pub multi_tenant_client: bool,
    pub remove_tenant_id: bool,
    pub preserved_labels: Vec<String>,
    pub sort_by_timestamp: bool,
    pub batch_wait: Duration,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            exporter: ExporterConfig::default(),
            buffer: BufferConfig::default(),
            throttle: ThrottleConfig::default(),
            multi_tenant_client: false,
            remove_tenant_id: false,
            preserved_labels: Vec::new(),
            sort_by_timestamp: false,
            batch_wait: Duration::from_secs(1),
            batch_size: 100,
        }
    }
}
