//! Ingestion sinks
//!
//! A sink accepts one decoded, timestamp-adjusted batch per call. Failures are
//! split into transient (worth retrying) and permanent (abort the replay).

use crate::config::{AuthConfig, IngestConfig, IngestProtocol};
use crate::error::OtlpConfigError;
use crate::otlp::{OtlpCodec, OtlpPayload, PayloadFormat};
use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::logs::v1::logs_service_client::LogsServiceClient;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_client::MetricsServiceClient;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use secrecy::ExposeSecret;
use std::sync::Arc;
use thiserror::Error;
use tonic::Code;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

/// Failure reported by a sink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestSinkError {
    /// Temporary condition; the same batch may succeed later
    #[error("transient ingestion failure: {0}")]
    Transient(String),

    /// The batch was rejected and retrying will not help
    #[error("permanent ingestion failure: {0}")]
    Permanent(String),
}

/// Downstream consumer of replayed batches
#[async_trait]
pub trait IngestSink: Send + Sync + std::fmt::Debug {
    /// Deliver one batch
    async fn ingest(&self, payload: &OtlpPayload) -> Result<(), IngestSinkError>;
}

/// Build the sink described by an ingest configuration
///
/// Returns `None` when ingest is disabled.
pub fn sink_from_config(
    config: &IngestConfig,
) -> Result<Option<Arc<dyn IngestSink>>, OtlpConfigError> {
    if !config.enabled {
        return Ok(None);
    }
    config.validate()?;
    let endpoint = config.endpoint_url.as_deref().ok_or_else(|| {
        OtlpConfigError::MissingRequiredField(
            "endpoint_url is required when ingest is enabled".to_string(),
        )
    })?;

    let sink: Arc<dyn IngestSink> = match config.protocol {
        IngestProtocol::HttpProtobuf => Arc::new(HttpIngestSink::new(
            endpoint,
            config.authentication.clone(),
        )?),
        IngestProtocol::Grpc => Arc::new(GrpcIngestSink::new(
            endpoint,
            config.authentication.as_ref(),
        )?),
    };
    Ok(Some(sink))
}

/// OTLP/HTTP sink posting protobuf bodies
#[derive(Debug, Clone)]
pub struct HttpIngestSink {
    endpoint: String,
    authentication: Option<AuthConfig>,
    client: reqwest::Client,
    codec: OtlpCodec,
}

impl HttpIngestSink {
    /// Create a sink posting to `{endpoint}/v1/{traces|metrics|logs}`
    pub fn new(endpoint: &str, authentication: Option<AuthConfig>) -> Result<Self, OtlpConfigError> {
        url::Url::parse(endpoint)
            .map_err(|e| OtlpConfigError::InvalidUrl(format!("{}: {}", endpoint, e)))?;
        if let Some(ref auth) = authentication {
            auth.validate()?;
        }

        let client = reqwest::Client::builder().build().map_err(|e| {
            OtlpConfigError::ValidationFailed(format!("Failed to create HTTP client: {}", e))
        })?;

        info!(endpoint = %endpoint, "Created OTLP/HTTP ingest sink");
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            authentication,
            client,
            codec: OtlpCodec::new(PayloadFormat::Protobuf),
        })
    }

    fn add_auth_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let Some(ref auth) = self.authentication else {
            return request;
        };
        let credential = |name: &str| auth.credentials.get(name).map(|s| s.expose_secret().as_str());

        // Credentials were checked by AuthConfig::validate
        match auth.auth_type.as_str() {
            "api_key" => {
                if let Some(key) = credential("key") {
                    let header_name = credential("header_name").unwrap_or("X-API-Key");
                    request = request.header(header_name, key);
                }
            }
            "bearer_token" => {
                if let Some(token) = credential("token") {
                    request = request.bearer_auth(token);
                }
            }
            "basic" => {
                if let Some(username) = credential("username") {
                    request = request.basic_auth(username, credential("password"));
                }
            }
            _ => {}
        }
        request
    }
}

#[async_trait]
impl IngestSink for HttpIngestSink {
    async fn ingest(&self, payload: &OtlpPayload) -> Result<(), IngestSinkError> {
        let body = self
            .codec
            .encode(payload)
            .map_err(|e| IngestSinkError::Permanent(e.to_string()))?;
        let url = format!("{}{}", self.endpoint, payload.signal_type().http_path());

        let request = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-protobuf");
        let response = self
            .add_auth_headers(request)
            .body(body)
            .send()
            .await
            .map_err(|e| IngestSinkError::Transient(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(url = %url, "Delivered replayed batch");
            return Ok(());
        }

        let message = format!("{} returned {}", url, status);
        if status.is_server_error()
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            Err(IngestSinkError::Transient(message))
        } else {
            Err(IngestSinkError::Permanent(message))
        }
    }
}

/// OTLP/gRPC sink using the collector export services
#[derive(Debug, Clone)]
pub struct GrpcIngestSink {
    channel: Channel,
    metadata: Vec<(AsciiMetadataKey, AsciiMetadataValue)>,
}

impl GrpcIngestSink {
    /// Create a sink over a lazily connected channel to `endpoint`
    pub fn new(endpoint: &str, authentication: Option<&AuthConfig>) -> Result<Self, OtlpConfigError> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| OtlpConfigError::InvalidUrl(format!("{}: {}", endpoint, e)))?
            .connect_lazy();

        let metadata = match authentication {
            Some(auth) => grpc_metadata(auth)?,
            None => Vec::new(),
        };

        info!(endpoint = %endpoint, "Created OTLP/gRPC ingest sink");
        Ok(Self { channel, metadata })
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        for (key, value) in &self.metadata {
            request.metadata_mut().insert(key.clone(), value.clone());
        }
        request
    }
}

fn grpc_metadata(
    auth: &AuthConfig,
) -> Result<Vec<(AsciiMetadataKey, AsciiMetadataValue)>, OtlpConfigError> {
    auth.validate()?;
    let credential = |name: &str| {
        auth.credentials
            .get(name)
            .map(|s| s.expose_secret().clone())
            .ok_or_else(|| {
                OtlpConfigError::MissingRequiredField(format!(
                    "{} required for {} authentication",
                    name, auth.auth_type
                ))
            })
    };

    let (name, value) = match auth.auth_type.as_str() {
        "api_key" => {
            let name = auth
                .credentials
                .get("header_name")
                .map(|s| s.expose_secret().to_lowercase())
                .unwrap_or_else(|| "x-api-key".to_string());
            (name, credential("key")?)
        }
        "bearer_token" => ("authorization".to_string(), format!("Bearer {}", credential("token")?)),
        other => {
            return Err(OtlpConfigError::ValidationFailed(format!(
                "{} authentication is not supported for gRPC ingest",
                other
            )));
        }
    };

    let key = AsciiMetadataKey::from_bytes(name.as_bytes())
        .map_err(|e| OtlpConfigError::ValidationFailed(format!("Invalid header name: {}", e)))?;
    let mut value: AsciiMetadataValue = value
        .parse()
        .map_err(|e| OtlpConfigError::ValidationFailed(format!("Invalid header value: {}", e)))?;
    value.set_sensitive(true);
    Ok(vec![(key, value)])
}

fn classify(status: tonic::Status) -> IngestSinkError {
    let message = format!("{:?}: {}", status.code(), status.message());
    match status.code() {
        Code::Unavailable | Code::DeadlineExceeded | Code::ResourceExhausted | Code::Aborted => {
            IngestSinkError::Transient(message)
        }
        _ => IngestSinkError::Permanent(message),
    }
}

#[async_trait]
impl IngestSink for GrpcIngestSink {
    async fn ingest(&self, payload: &OtlpPayload) -> Result<(), IngestSinkError> {
        match payload {
            OtlpPayload::Traces(req) => {
                TraceServiceClient::new(self.channel.clone())
                    .export(self.request(req.clone()))
                    .await
                    .map_err(classify)?;
            }
            OtlpPayload::Metrics(req) => {
                MetricsServiceClient::new(self.channel.clone())
                    .export(self.request(req.clone()))
                    .await
                    .map_err(classify)?;
            }
            OtlpPayload::Logs(req) => {
                LogsServiceClient::new(self.channel.clone())
                    .export(self.request(req.clone()))
                    .await
                    .map_err(classify)?;
            }
        }
        debug!(signal_type = %payload.signal_type(), "Delivered replayed batch over gRPC");
        Ok(())
    }
}
