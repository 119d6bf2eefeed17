//! No-op exporter: discards every batch, counting it as dropped.

use super::Exporter;
use crate::config::ExporterConfig;
use crate::error::Result;
use crate::record::Record;
use async_trait::async_trait;
use std::time::Duration;

pub struct NoopExporter {
    endpoint: String,
}

impl NoopExporter {
    pub fn new(config: &ExporterConfig) -> Self {
        NoopExporter {
            endpoint: super::redact_endpoint(&config.endpoint),
        }
    }
}

#[async_trait]
impl Exporter for NoopExporter {
    async fn export(&self, _batch: &[Record], _deadline: Duration) -> Result<()> {
        // Counting the drop is the caller's job (see `Exporter::drop_reason`)
        // so a record is never counted under both `OutputClientLogs` and
        // `DroppedLogs{noop}`.
        Ok(())
    }

    async fn force_flush(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn drop_reason(&self) -> Option<&'static str> {
        Some("noop")
    }
}
