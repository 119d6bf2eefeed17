//! Strips `__tenant_id__` from labels before forwarding, for downstream
//! endpoints that don't support multi-tenancy.

use crate::client::OutputClient;
use crate::record::{Record, TENANT_ID_LABEL};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct RemoveTenantIdDecorator {
    inner: Arc<dyn OutputClient>,
}

impl RemoveTenantIdDecorator {
    pub fn new(inner: Arc<dyn OutputClient>) -> Self {
        RemoveTenantIdDecorator { inner }
    }
}

#[async_trait]
impl OutputClient for RemoveTenantIdDecorator {
    async fn handle(&self, mut record: Record) -> crate::error::Result<()> {
        record.labels.remove(TENANT_ID_LABEL);
        self.inner.handle(record).await
    }

    async fn stop(&self) {
        self.inner.stop().await;
    }

    async fn stop_wait(&self, deadline: Duration) -> crate::error::Result<()> {
        self.inner.stop_wait(deadline).await
    }

    fn endpoint(&self) -> String {
        self.inner.endpoint()
    }
}
