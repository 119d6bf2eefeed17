//! Stdout exporter: one JSON line per record.

use super::Exporter;
use crate::config::ExporterConfig;
use crate::error::{PipelineError, Result};
use crate::record::Record;
use async_trait::async_trait;
use serde_json::json;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;
use std::time::{Duration as StdDuration, UNIX_EPOCH};

pub struct StdoutExporter {
    endpoint: String,
    stdout: Mutex<std::io::Stdout>,
}

impl StdoutExporter {
    pub fn new(config: &ExporterConfig) -> Self {
        StdoutExporter {
            endpoint: super::redact_endpoint(&config.endpoint),
            stdout: Mutex::new(std::io::stdout()),
        }
    }
}

/// Formats a nanosecond Unix timestamp as RFC3339 with nanosecond precision,
/// without pulling in a date/time crate for one call site.
fn to_rfc3339_nanos(timestamp_unix_nano: u128) -> String {
    let secs = (timestamp_unix_nano / 1_000_000_000) as u64;
    let nanos = (timestamp_unix_nano % 1_000_000_000) as u32;
    let system_time = UNIX_EPOCH + StdDuration::new(secs, nanos);
    humantime_like_rfc3339(system_time, nanos)
}

// Minimal RFC3339 renderer good enough for stdout diagnostics: converts the
// Unix timestamp to a civil calendar date using the standard days-from-civil
// algorithm (no external date crate, matching the "no ambient dependency
// beyond what's needed" spirit of the stdout exporter).
fn humantime_like_rfc3339(system_time: std::time::SystemTime, nanos: u32) -> String {
    let since_epoch = system_time
        .duration_since(UNIX_EPOCH)
        .unwrap_or(StdDuration::ZERO);
    let secs = since_epoch.as_secs() as i64;
    let days = secs.div_euclid(86_400);
    let secs_of_day = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{nanos:09}Z")
}

/// Howard Hinnant's `civil_from_days`: days-since-epoch -> (year, month, day).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if m <= 2 { y + 1 } else { y };
    (year, m, d)
}

#[async_trait]
impl Exporter for StdoutExporter {
    async fn export(&self, batch: &[Record], _deadline: Duration) -> Result<()> {
        let mut stdout = self.stdout.lock().expect("stdout mutex poisoned");
        for record in batch {
            let line = json!({
                "timestamp": to_rfc3339_nanos(record.timestamp_unix_nano),
                "record": record,
            });
            writeln!(stdout, "{line}").map_err(|e| {
                PipelineError::Export(format!("stdout write failed: {e}"))
            })?;
        }
        Ok(())
    }

    async fn force_flush(&self) -> Result<()> {
        self.stdout
            .lock()
            .expect("stdout mutex poisoned")
            .flush()
            .map_err(|e| PipelineError::Export(e.to_string()))
    }

    async fn shutdown(&self) -> Result<()> {
        self.force_flush().await
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_epoch_as_rfc3339() {
        assert_eq!(to_rfc3339_nanos(0), "1970-01-01T00:00:00.000000000Z");
    }

    #[tokio::test]
    async fn export_writes_one_line_per_record() {
        let exporter = StdoutExporter::new(&ExporterConfig::default());
        let batch = vec![Record::new(0, "hi")];
        assert!(exporter.export(&batch, Duration::from_secs(1)).await.is_ok());
    }
}
