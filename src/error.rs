//! Error kinds for the output-client pipeline.
//!
//! These mirror the concept labels from the design: callers of [`crate::client::OutputClient::handle`]
//! see a subset of these returned directly; the rest are absorbed by the
//! pipeline (logged, counted, retried/requeued) and never propagate back to
//! the producer.

use thiserror::Error;

/// Errors surfaced across the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rate limiter refused a token.
    #[error("throttled")]
    Throttled,

    /// Persistent queue is at capacity after the bounded retry loop.
    #[error("queue full")]
    QueueFull,

    /// The output client has started or finished shutting down.
    #[error("processor closed")]
    ProcessorClosed,

    /// The record could not be encoded into the queue's wire format.
    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Writing the encoded entry to the segment file failed.
    #[error("enqueue error: {0}")]
    Enqueue(#[source] std::io::Error),

    /// Wire-layer export failed after retries were exhausted. Carries the
    /// batch size so the caller can account for it; the caller never sees
    /// this directly (it is absorbed by the batch processor), but exporters
    /// return it internally.
    #[error("export error: {0}")]
    Export(String),

    /// Legacy (Vali/Loki) ingress path received a value that did not have
    /// the expected label-set shape.
    #[error("invalid label type")]
    InvalidLabelType,

    /// A dequeued entry could not be decoded back into a record.
    #[error("dequeued entry is not a valid record")]
    InvalidQueueEntry,

    /// Configuration was structurally invalid (bad URL, missing TLS material, ...).
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
