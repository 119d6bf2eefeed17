//! Record -> OTLP protobuf transform.
//!
//! Follows `opentelemetry-proto`'s own `LogRecord` construction
//! (`impl From<opentelemetry::logs::LogRecord> for LogRecord`) and its
//! `ResourceLogs`/`ScopeLogs` grouping: a severity enum maps to
//! `SeverityNumber`, attributes map to repeated `KeyValue`, and records
//! sharing a resource are grouped into one `ResourceLogs`. Here every
//! batch shares one process-wide [`crate::record::Resource`], so grouping
//! collapses to a single `ResourceLogs`/`ScopeLogs` pair holding every
//! record's `LogRecord`.

use crate::record::{AttributeValue, Record};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::resource::v1::Resource as OtlpResource;

fn attribute_to_any_value(value: &AttributeValue) -> AnyValue {
    let inner = match value {
        AttributeValue::String(s) => any_value::Value::StringValue(s.clone()),
        AttributeValue::Int64(i) => any_value::Value::IntValue(*i),
        AttributeValue::Float64(f) => any_value::Value::DoubleValue(*f),
        AttributeValue::Bool(b) => any_value::Value::BoolValue(*b),
        AttributeValue::Bytes(b) => any_value::Value::BytesValue(b.clone()),
    };
    AnyValue { value: Some(inner) }
}

fn key_values(attrs: &[(String, AttributeValue)]) -> Vec<KeyValue> {
    attrs
        .iter()
        .map(|(k, v)| KeyValue {
            key: k.clone(),
            value: Some(attribute_to_any_value(v)),
        })
        .collect()
}

fn record_to_log_record(record: &Record) -> LogRecord {
    let (trace_id, span_id, flags) = match &record.trace_context {
        Some(ctx) => (ctx.trace_id.to_vec(), ctx.span_id.to_vec(), ctx.flags as u32),
        None => (Vec::new(), Vec::new(), 0),
    };

    // Label-set entries ride along as string attributes so legacy-path
    // labels (e.g. `__tenant_id__` when not stripped) survive the OTLP hop.
    let mut attributes = key_values(&record.attributes);
    for (k, v) in record.labels.iter() {
        attributes.push(KeyValue {
            key: k.to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(v.to_string())),
            }),
        });
    }

    LogRecord {
        time_unix_nano: record.timestamp_unix_nano as u64,
        observed_time_unix_nano: record.timestamp_unix_nano as u64,
        severity_number: record.severity.otlp_number(),
        severity_text: record.severity_text.clone(),
        body: Some(AnyValue {
            value: Some(any_value::Value::StringValue(record.body.clone())),
        }),
        attributes,
        dropped_attributes_count: 0,
        flags,
        trace_id,
        span_id,
    }
}

/// Groups a batch into one `ExportLogsServiceRequest`. Every record in a
/// batch funnels through the same client, so they share one resource; the
/// resource attributes of the first record in the batch are used (they are
/// process-wide and identical across records in practice).
pub fn batch_to_request(batch: &[Record]) -> ExportLogsServiceRequest {
    let resource = batch.first().map(|r| OtlpResource {
        attributes: key_values(&r.resource.attributes),
        dropped_attributes_count: 0,
    });

    let log_records = batch.iter().map(record_to_log_record).collect();

    ExportLogsServiceRequest {
        resource_logs: vec![ResourceLogs {
            resource,
            scope_logs: vec![ScopeLogs {
                scope: None,
                log_records,
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{truncate_body, Severity};

    #[test]
    fn groups_batch_into_single_resource_logs() {
        let mut r1 = Record::new(1, truncate_body("a".into()));
        r1.severity = Severity::Error;
        r1.resource.set("k8s.node.name", "node-1");
        let r2 = Record::new(2, truncate_body("b".into()));

        let request = batch_to_request(&[r1, r2]);
        assert_eq!(request.resource_logs.len(), 1);
        let scope_logs = &request.resource_logs[0].scope_logs[0];
        assert_eq!(scope_logs.log_records.len(), 2);
        assert_eq!(scope_logs.log_records[0].severity_number, Severity::Error.otlp_number());
    }
}
