//! OTLP/HTTP exporter, in the shape of `opentelemetry-otlp`'s
//! `exporter/http/mod.rs` and `exporter/http/logs.rs`: reqwest client,
//! header injection, protobuf body.

use super::transform::batch_to_request;
use super::{retry::retry_with_backoff, Exporter};
use crate::config::{Compression, ExporterConfig};
use crate::error::{PipelineError, Result};
use crate::record::Record;
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;
use prost::Message;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use std::io::Write;
use std::time::Duration;

pub struct OtlpHttpExporter {
    client: reqwest::Client,
    endpoint: String,
    url: String,
    headers: HeaderMap,
    compression: Compression,
    retry: crate::config::RetryConfig,
}

impl OtlpHttpExporter {
    pub fn new(config: &ExporterConfig) -> Result<Self> {
        let mut client_builder = reqwest::Client::builder();
        if let Some(tls) = &config.tls {
            if tls.insecure {
                tracing::warn!("OTLP/HTTP exporter configured with insecure TLS bypass");
                client_builder = client_builder.danger_accept_invalid_certs(true);
            }
            if let Some(ca_path) = &tls.ca_cert_path {
                let pem = std::fs::read(ca_path)
                    .map_err(|e| PipelineError::Config(format!("reading CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| PipelineError::Config(format!("invalid CA cert: {e}")))?;
                client_builder = client_builder.add_root_certificate(cert);
            }
            if let (Some(cert_path), Some(key_path)) = (&tls.client_cert_path, &tls.client_key_path) {
                let mut pem = std::fs::read(cert_path)
                    .map_err(|e| PipelineError::Config(format!("reading client cert: {e}")))?;
                let mut key = std::fs::read(key_path)
                    .map_err(|e| PipelineError::Config(format!("reading client key: {e}")))?;
                pem.append(&mut key);
                let identity = reqwest::Identity::from_pem(&pem)
                    .map_err(|e| PipelineError::Config(format!("invalid client identity: {e}")))?;
                client_builder = client_builder.identity(identity);
            }
        }

        let client = client_builder
            .build()
            .map_err(|e| PipelineError::Config(format!("building HTTP client: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-protobuf"));
        for (k, v) in &config.headers {
            let name = HeaderName::try_from(k.as_str())
                .map_err(|e| PipelineError::Config(format!("invalid header name {k}: {e}")))?;
            let value = HeaderValue::try_from(v.as_str())
                .map_err(|e| PipelineError::Config(format!("invalid header value for {k}: {e}")))?;
            headers.insert(name, value);
        }

        Ok(OtlpHttpExporter {
            client,
            endpoint: super::redact_endpoint(&config.endpoint),
            url: config.endpoint.clone(),
            headers,
            compression: config.compression,
            retry: config.retry.clone(),
        })
    }

    fn encode_body(&self, batch: &[Record]) -> Result<Vec<u8>> {
        let request = batch_to_request(batch);
        let mut buf = Vec::with_capacity(request.encoded_len());
        request
            .encode(&mut buf)
            .map_err(|e| PipelineError::Export(format!("encoding protobuf body: {e}")))?;

        if self.compression == Compression::Gzip {
            let mut encoder = GzEncoder::new(Vec::new(), GzCompression::default());
            encoder
                .write_all(&buf)
                .map_err(|e| PipelineError::Export(format!("gzip encoding: {e}")))?;
            encoder
                .finish()
                .map_err(|e| PipelineError::Export(format!("gzip finish: {e}")))
        } else {
            Ok(buf)
        }
    }
}

#[async_trait]
impl Exporter for OtlpHttpExporter {
    async fn export(&self, batch: &[Record], deadline: Duration) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let body = self.encode_body(batch)?;

        retry_with_backoff(&self.retry, || {
            let body = body.clone();
            async move {
                let mut request = self
                    .client
                    .post(&self.url)
                    .headers(self.headers.clone())
                    .timeout(deadline)
                    .body(body);
                if self.compression == Compression::Gzip {
                    request = request.header(CONTENT_ENCODING, "gzip");
                }
                let response = request
                    .send()
                    .await
                    .map_err(|e| PipelineError::Export(format!("HTTP export failed: {e}")))?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(PipelineError::Export(format!(
                        "HTTP export returned status {}",
                        response.status()
                    )))
                }
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
