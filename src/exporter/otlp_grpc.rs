//! OTLP/gRPC exporter, in the shape of `opentelemetry-otlp`'s
//! `exporter/tonic/logs.rs` and `exporter/tonic/mod.rs` (channel + TLS +
//! interceptor construction), with its retry policy reused via
//! [`crate::exporter::retry`].

use super::transform::batch_to_request;
use super::{retry::retry_with_backoff, Exporter};
use crate::config::{Compression, ExporterConfig};
use crate::error::{PipelineError, Result};
use crate::record::Record;
use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::logs::v1::logs_service_client::LogsServiceClient;
use std::time::Duration;
use tonic::metadata::{MetadataKey, MetadataValue};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tonic::Request;

pub struct OtlpGrpcExporter {
    channel: Channel,
    endpoint: String,
    headers: Vec<(MetadataKey<tonic::metadata::Ascii>, MetadataValue<tonic::metadata::Ascii>)>,
    compression: Compression,
    retry: crate::config::RetryConfig,
}

impl OtlpGrpcExporter {
    pub fn new(config: &ExporterConfig) -> Result<Self> {
        let mut endpoint = Channel::from_shared(config.endpoint.clone())
            .map_err(|e| PipelineError::Config(format!("invalid gRPC endpoint: {e}")))?;

        if let Some(tls) = &config.tls {
            let mut tls_config = ClientTlsConfig::new();
            if tls.insecure {
                tracing::warn!("OTLP/gRPC exporter configured with insecure TLS bypass");
            } else {
                if let Some(ca_path) = &tls.ca_cert_path {
                    let pem = std::fs::read(ca_path)
                        .map_err(|e| PipelineError::Config(format!("reading CA cert: {e}")))?;
                    tls_config = tls_config.ca_certificate(Certificate::from_pem(pem));
                }
                if let (Some(cert_path), Some(key_path)) = (&tls.client_cert_path, &tls.client_key_path) {
                    let cert = std::fs::read(cert_path)
                        .map_err(|e| PipelineError::Config(format!("reading client cert: {e}")))?;
                    let key = std::fs::read(key_path)
                        .map_err(|e| PipelineError::Config(format!("reading client key: {e}")))?;
                    tls_config = tls_config.identity(Identity::from_pem(cert, key));
                }
                if let Some(server_name) = &tls.server_name {
                    tls_config = tls_config.domain_name(server_name.clone());
                }
                endpoint = endpoint
                    .tls_config(tls_config)
                    .map_err(|e| PipelineError::Config(format!("invalid TLS config: {e}")))?;
            }
        }

        let channel = endpoint.connect_lazy();

        let mut headers = Vec::new();
        for (k, v) in &config.headers {
            let key = MetadataKey::from_bytes(k.as_bytes())
                .map_err(|e| PipelineError::Config(format!("invalid header name {k}: {e}")))?;
            let value = MetadataValue::try_from(v.as_str())
                .map_err(|e| PipelineError::Config(format!("invalid header value for {k}: {e}")))?;
            headers.push((key, value));
        }

        Ok(OtlpGrpcExporter {
            channel,
            endpoint: super::redact_endpoint(&config.endpoint),
            headers,
            compression: config.compression,
            retry: config.retry.clone(),
        })
    }

    fn client(&self) -> LogsServiceClient<Channel> {
        let mut client = LogsServiceClient::new(self.channel.clone());
        if self.compression == Compression::Gzip {
            client = client
                .send_compressed(tonic::codec::CompressionEncoding::Gzip)
                .accept_compressed(tonic::codec::CompressionEncoding::Gzip);
        }
        client
    }

    fn attach_headers(&self, mut request: Request<opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest>) -> Request<opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest> {
        for (key, value) in &self.headers {
            request.metadata_mut().insert(key.clone(), value.clone());
        }
        request
    }
}

#[async_trait]
impl Exporter for OtlpGrpcExporter {
    async fn export(&self, batch: &[Record], deadline: Duration) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let payload = batch_to_request(batch);

        retry_with_backoff(&self.retry, || {
            let mut client = self.client();
            let request = self.attach_headers(Request::new(payload.clone()));
            async move {
                tokio::time::timeout(deadline, client.export(request))
                    .await
                    .map_err(|_| PipelineError::Export("gRPC export timed out".into()))?
                    .map(|_| ())
                    .map_err(|status| PipelineError::Export(format!("gRPC export failed: {status}")))
            }
        })
        .await
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
}
