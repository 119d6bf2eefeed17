//! Record ingress: turns a raw `(timestamp, map)` pair handed in by the host
//! collector into a [`Record`].

use crate::record::{AttributeValue, Record, Resource, Severity};
use serde_json::Value;

/// Reserved keys recognized on the raw record map.
mod keys {
    pub const BODY: &[&str] = &["log", "message"];
    pub const SEVERITY: &[&str] = &["level", "severity", "loglevel", "log_level", "lvl"];
    pub const KUBERNETES: &str = "kubernetes";
    pub const TAG: &str = "tag";
}

/// `kubernetes` sub-map key -> OTLP resource attribute key.
const K8S_RESOURCE_MAP: &[(&str, &str)] = &[
    ("namespace_name", "k8s.namespace.name"),
    ("pod_name", "k8s.pod.name"),
    ("pod_id", "k8s.pod.uid"),
    ("container_name", "k8s.container.name"),
    ("container_id", "container.id"),
    ("host", "k8s.node.name"),
];

/// Builds a [`Record`] from a raw ingress map, as the host collector would
/// hand it to the embedding surface.
pub fn record_from_map(timestamp_unix_nano: u128, map: &serde_json::Map<String, Value>) -> Record {
    let mut record = Record::new(timestamp_unix_nano, "");

    if let Some(body) = find_first(map, keys::BODY).and_then(value_as_string) {
        record.body = crate::record::truncate_body(body);
    }

    if let Some(sev_value) = find_first(map, keys::SEVERITY) {
        let (severity, text) = map_severity(sev_value);
        record.severity = severity;
        record.severity_text = text;
    }

    if let Some(Value::Object(k8s)) = map.get(keys::KUBERNETES) {
        apply_kubernetes_resource(&mut record.resource, k8s);
    }

    if let Some(tag) = map.get(keys::TAG).and_then(Value::as_str) {
        record.labels.set("tag", tag);
    }

    if let Some(tenant_id) = map.get(crate::record::TENANT_ID_LABEL).and_then(Value::as_str) {
        record.labels.set(crate::record::TENANT_ID_LABEL, tenant_id);
    }

    if let Some(directive) = map
        .get(crate::record::MULTI_TENANT_DIRECTIVE_LABEL)
        .and_then(Value::as_str)
    {
        record
            .labels
            .set(crate::record::MULTI_TENANT_DIRECTIVE_LABEL, directive);
    }

    for (key, value) in map {
        if is_reserved_key(key) {
            continue;
        }
        record.attributes.push((key.clone(), collapse_value(value)));
    }

    record
}

fn is_reserved_key(key: &str) -> bool {
    keys::BODY.contains(&key)
        || keys::SEVERITY.contains(&key)
        || key == keys::KUBERNETES
        || key == keys::TAG
        || key == crate::record::TENANT_ID_LABEL
        || key == crate::record::MULTI_TENANT_DIRECTIVE_LABEL
}

fn find_first<'a>(map: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k))
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Maps a raw severity field to `(Severity, original_text)`: a string is
/// matched case-insensitively against the canonical set; a number is
/// matched against the syslog scale. Unknown shapes fall back to `INFO`
/// with an empty text, same as an absent field.
fn map_severity(value: &Value) -> (Severity, String) {
    match value {
        Value::String(text) => (Severity::from_text(text), text.clone()),
        Value::Number(n) => {
            let text = n.to_string();
            let severity = n
                .as_i64()
                .map(Severity::from_syslog_number)
                .unwrap_or(Severity::Info);
            (severity, text)
        }
        _ => (Severity::Info, String::new()),
    }
}

fn apply_kubernetes_resource(resource: &mut Resource, k8s: &serde_json::Map<String, Value>) {
    for (src_key, dst_key) in K8S_RESOURCE_MAP {
        match k8s.get(*src_key) {
            Some(Value::String(s)) if !s.is_empty() => {
                resource.set(dst_key, s.as_str());
            }
            // Empty strings and wrong types are skipped.
            _ => {}
        }
    }
}

/// Collapses a JSON value into a bounded-cost [`AttributeValue`]. Nested
/// maps/slices are replaced with size placeholders rather than serialized
/// recursively.
fn collapse_value(value: &Value) -> AttributeValue {
    match value {
        Value::String(s) => AttributeValue::String(s.clone()),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AttributeValue::Int64(i)
            } else {
                AttributeValue::Float64(n.as_f64().unwrap_or_default())
            }
        }
        Value::Null => AttributeValue::String(String::new()),
        Value::Object(m) => AttributeValue::String(format!("<map: {} keys>", m.len())),
        Value::Array(a) => AttributeValue::String(format!("<array: {} items>", a.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn extracts_body_from_log_field() {
        let record = record_from_map(1, &map(json!({"log": "hello"})));
        assert_eq!(record.body, "hello");
    }

    #[test]
    fn extracts_body_from_message_field_when_log_absent() {
        let record = record_from_map(1, &map(json!({"message": "hi"})));
        assert_eq!(record.body, "hi");
    }

    #[test]
    fn maps_numeric_syslog_severity() {
        let record = record_from_map(1, &map(json!({"log": "x", "severity": 3})));
        assert_eq!(record.severity, Severity::Error);
    }

    #[test]
    fn maps_kubernetes_resource_attributes() {
        let record = record_from_map(
            1,
            &map(json!({
                "log": "x",
                "kubernetes": {
                    "namespace_name": "kube-system",
                    "pod_name": "p1",
                    "pod_id": "",
                    "container_name": "c1",
                    "container_id": "abc",
                    "host": "node-1"
                }
            })),
        );
        let get = |k: &str| {
            record
                .resource
                .attributes
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(
            get("k8s.namespace.name"),
            Some(AttributeValue::String("kube-system".into()))
        );
        assert_eq!(get("k8s.pod.uid"), None, "empty strings are skipped");
        assert_eq!(
            get("container.id"),
            Some(AttributeValue::String("abc".into()))
        );
    }

    #[test]
    fn collapses_nested_maps_and_arrays() {
        let record = record_from_map(
            1,
            &map(json!({"log": "x", "extra": {"a": 1, "b": 2}, "list": [1,2,3]})),
        );
        let get = |k: &str| {
            record
                .attributes
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("extra"), Some(AttributeValue::String("<map: 2 keys>".into())));
        assert_eq!(get("list"), Some(AttributeValue::String("<array: 3 items>".into())));
    }

    #[test]
    fn reserved_keys_do_not_leak_into_attributes() {
        let record = record_from_map(
            1,
            &map(json!({"log": "x", "__tenant_id__": "t1", "tag": "kube.var.log"})),
        );
        assert!(record.attributes.iter().all(|(k, _)| k != "__tenant_id__"));
        assert_eq!(record.labels.get("tag"), Some("kube.var.log"));
    }

    #[test]
    fn reserved_tenant_keys_surface_as_labels_for_the_decorator_chain() {
        let record = record_from_map(
            1,
            &map(json!({
                "log": "x",
                "__tenant_id__": "t1",
                "__gardener_multitenant_id__": "a;b"
            })),
        );
        assert_eq!(record.labels.get(crate::record::TENANT_ID_LABEL), Some("t1"));
        assert_eq!(
            record.labels.get(crate::record::MULTI_TENANT_DIRECTIVE_LABEL),
            Some("a;b")
        );
    }
}
