//! Pack decorator: collapses non-preserved labels into the body as a JSON
//! object, for streams whose labels would otherwise explode cardinality
//! downstream.

use crate::client::OutputClient;
use crate::error::Result;
use crate::record::{Record, MULTI_TENANT_DIRECTIVE_LABEL, TENANT_ID_LABEL};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const RESERVED_LABELS: [&str; 2] = [TENANT_ID_LABEL, MULTI_TENANT_DIRECTIVE_LABEL];

pub struct PackDecorator {
    inner: Arc<dyn OutputClient>,
    preserved_labels: HashSet<String>,
}

impl PackDecorator {
    pub fn new(inner: Arc<dyn OutputClient>, preserved_labels: Vec<String>) -> Self {
        PackDecorator {
            inner,
            preserved_labels: preserved_labels.into_iter().collect(),
        }
    }

    fn intersects(&self, record: &Record) -> bool {
        record
            .labels
            .iter()
            .any(|(k, _)| self.preserved_labels.contains(k))
    }
}

#[async_trait]
impl OutputClient for PackDecorator {
    async fn handle(&self, mut record: Record) -> Result<()> {
        if self.preserved_labels.is_empty() || !self.intersects(&record) {
            return self.inner.handle(record).await;
        }

        let mut packed = Map::new();
        packed.insert("_entry".to_string(), Value::String(record.body.clone()));
        packed.insert(
            "time".to_string(),
            json!(record.timestamp_unix_nano as u64),
        );

        let mut kept = Vec::new();
        for (key, value) in record.labels.iter() {
            if self.preserved_labels.contains(key) {
                kept.push((key.to_string(), value.to_string()));
            } else if !RESERVED_LABELS.contains(&key) {
                packed.insert(key.to_string(), Value::String(value.to_string()));
            }
            // Reserved-but-not-preserved labels are dropped, matching the
            // "keep only preserved labels" rule literally.
        }

        record.labels = crate::record::LabelSet::from_pairs(kept);
        record.body = Value::Object(packed).to_string();
        record.timestamp_unix_nano = Record::now_unix_nano();

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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CapturingClient {
        last: Mutex<Option<Record>>,
    }

    #[async_trait]
    impl OutputClient for CapturingClient {
        async fn handle(&self, record: Record) -> Result<()> {
            *self.last.lock().unwrap() = Some(record);
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
    async fn collapses_extras_into_body_json() {
        let capture = Arc::new(CapturingClient { last: Mutex::new(None) });
        let decorator = PackDecorator::new(capture.clone(), vec!["origin".into(), "namespace".into()]);

        let mut record = Record::new(1000, "line");
        record.labels.set("origin", "seed");
        record.labels.set("namespace", "foo");
        record.labels.set("pod", "p1");
        record.labels.set("container", "c1");

        decorator.handle(record).await.unwrap();
        let packed = capture.last.lock().unwrap().clone().unwrap();

        assert_eq!(packed.labels.len(), 2);
        assert_eq!(packed.labels.get("origin"), Some("seed"));
        assert_eq!(packed.labels.get("namespace"), Some("foo"));
        assert!(packed.labels.get("pod").is_none());

        let body: serde_json::Value = serde_json::from_str(&packed.body).unwrap();
        assert_eq!(body["_entry"], "line");
        assert_eq!(body["pod"], "p1");
        assert_eq!(body["container"], "c1");
        assert_ne!(packed.timestamp_unix_nano, 1000, "timestamp is rewritten to now");
    }

    #[tokio::test]
    async fn forwards_unchanged_when_labels_do_not_intersect_preserved() {
        let capture = Arc::new(CapturingClient { last: Mutex::new(None) });
        let decorator = PackDecorator::new(capture.clone(), vec!["origin".into()]);
        let mut record = Record::new(1000, "line");
        record.labels.set("namespace", "foo");
        decorator.handle(record.clone()).await.unwrap();
        let forwarded = capture.last.lock().unwrap().clone().unwrap();
        assert_eq!(forwarded, record);
    }
}
