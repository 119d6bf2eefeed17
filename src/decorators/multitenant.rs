//! Multi-tenant fan-out and its sibling remove-directive decorator.

use crate::client::OutputClient;
use crate::error::{PipelineError, Result};
use crate::record::{Record, MULTI_TENANT_DIRECTIVE_LABEL, TENANT_ID_LABEL};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Parses the semicolon-separated multi-tenant directive, trimming and
/// dropping empty entries.
fn parse_tenants(directive: &str) -> Vec<String> {
    directive
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expands one record carrying `__gardener_multitenant_id__` into one
/// record per tenant, each stamped with `__tenant_id__` and stripped of the
/// directive. If the directive is absent or yields zero tenants, the record
/// is forwarded once, unchanged except for the directive being stripped.
pub struct MultiTenantFanoutDecorator {
    inner: Arc<dyn OutputClient>,
}

impl MultiTenantFanoutDecorator {
    pub fn new(inner: Arc<dyn OutputClient>) -> Self {
        MultiTenantFanoutDecorator { inner }
    }
}

/// Accumulates per-tenant send errors without retracting successful sends
/// made to sibling tenants: fan-out is best-effort per tenant.
#[derive(Debug)]
struct FanoutError {
    failures: Vec<(String, PipelineError)>,
}

impl fmt::Display for FanoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of the fan-out sends failed: ", self.failures.len())?;
        for (tenant, err) in &self.failures {
            write!(f, "[{tenant}: {err}] ")?;
        }
        Ok(())
    }
}

#[async_trait]
impl OutputClient for MultiTenantFanoutDecorator {
    async fn handle(&self, mut record: Record) -> Result<()> {
        let directive = record.labels.remove(MULTI_TENANT_DIRECTIVE_LABEL);
        let tenants = directive.as_deref().map(parse_tenants).unwrap_or_default();

        if tenants.is_empty() {
            return self.inner.handle(record).await;
        }

        let mut failures = Vec::new();
        for tenant in tenants {
            let mut cloned = record.clone();
            cloned.labels.set(TENANT_ID_LABEL, tenant.clone());
            if let Err(err) = self.inner.handle(cloned).await {
                failures.push((tenant, err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Export(FanoutError { failures }.to_string()))
        }
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

/// Installed instead of [`MultiTenantFanoutDecorator`] when multi-tenancy
/// is not in use: simply deletes the directive label so it never reaches
/// the wire.
pub struct RemoveMultiTenantIdDecorator {
    inner: Arc<dyn OutputClient>,
}

impl RemoveMultiTenantIdDecorator {
    pub fn new(inner: Arc<dyn OutputClient>) -> Self {
        RemoveMultiTenantIdDecorator { inner }
    }
}

#[async_trait]
impl OutputClient for RemoveMultiTenantIdDecorator {
    async fn handle(&self, mut record: Record) -> Result<()> {
        record.labels.remove(MULTI_TENANT_DIRECTIVE_LABEL);
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
        records: Mutex<Vec<Record>>,
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
    async fn fans_out_one_record_per_tenant() {
        let capture = Arc::new(CapturingClient {
            records: Mutex::new(Vec::new()),
        });
        let decorator = MultiTenantFanoutDecorator::new(capture.clone());

        let mut record = Record::new(0, "hi");
        record.labels.set("ns", "foo");
        record.labels.set(MULTI_TENANT_DIRECTIVE_LABEL, "op;user");
        decorator.handle(record).await.unwrap();

        let records = capture.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        let tenants: Vec<_> = records
            .iter()
            .map(|r| r.labels.get(TENANT_ID_LABEL).unwrap().to_string())
            .collect();
        assert!(tenants.contains(&"op".to_string()));
        assert!(tenants.contains(&"user".to_string()));
        assert!(records.iter().all(|r| r.labels.get(MULTI_TENANT_DIRECTIVE_LABEL).is_none()));
        assert!(records.iter().all(|r| r.labels.get("ns") == Some("foo")));
    }

    #[tokio::test]
    async fn forwards_once_when_directive_absent() {
        let capture = Arc::new(CapturingClient {
            records: Mutex::new(Vec::new()),
        });
        let decorator = MultiTenantFanoutDecorator::new(capture.clone());
        decorator.handle(Record::new(0, "x")).await.unwrap();
        assert_eq!(capture.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn forwards_once_when_directive_is_empty_after_trim() {
        let capture = Arc::new(CapturingClient {
            records: Mutex::new(Vec::new()),
        });
        let decorator = MultiTenantFanoutDecorator::new(capture.clone());
        let mut record = Record::new(0, "x");
        record.labels.set(MULTI_TENANT_DIRECTIVE_LABEL, " ; ; ");
        decorator.handle(record).await.unwrap();
        assert_eq!(capture.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_multi_tenant_id_strips_directive_without_fanout() {
        let capture = Arc::new(CapturingClient {
            records: Mutex::new(Vec::new()),
        });
        let decorator = RemoveMultiTenantIdDecorator::new(capture.clone());
        let mut record = Record::new(0, "x");
        record.labels.set(MULTI_TENANT_DIRECTIVE_LABEL, "a;b");
        decorator.handle(record).await.unwrap();
        let records = capture.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].labels.get(MULTI_TENANT_DIRECTIVE_LABEL).is_none());
    }
}
