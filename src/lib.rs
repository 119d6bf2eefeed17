//! Output-client pipeline core: the composable chain of decorators that
//! takes a log record from a host collector and delivers it, durably, in
//! order, and rate-limited, to an OTLP or legacy Vali/Loki-style backend.
//!
//! See `SPEC_FULL.md` in the repository root for the full component design.
//! The modules here map directly onto that design:
//!
//! - [`record`]: the record, label set, tenant, and attribute types.
//! - [`ingress`]: turns a raw `(timestamp, map)` pair into a [`record::Record`].
//! - [`client`]: the [`client::OutputClient`] trait, terminal clients, and the rate limiter.
//! - [`exporter`]: OTLP/gRPC, OTLP/HTTP, stdout, and noop terminal exporters.
//! - [`batch`]: the batch processor, its worker loop, and the retry/requeue path.
//! - [`queue`]: the on-disk, segment-file-based persistent queue.
//! - [`decorators`]: sort, pack, remove-tenant-id, and multi-tenant fan-out.
//! - [`factory`]: builds a pipeline from a [`config::PipelineConfig`].
//! - [`config`]: the configuration tree consumed by [`factory::PipelineFactory`].
//! - [`metrics`]: the process-wide Prometheus registry and counters.
//! - [`error`]: the [`error::PipelineError`] enum shared across the pipeline.

pub mod batch;
pub mod client;
pub mod config;
pub mod decorators;
pub mod error;
pub mod exporter;
pub mod factory;
pub mod ingress;
pub mod metrics;
pub mod queue;
pub mod ratelimiter;
pub mod record;

pub use client::OutputClient;
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use factory::PipelineFactory;
pub use record::Record;
