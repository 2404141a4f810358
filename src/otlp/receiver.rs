//! gRPC receiver feeding live OTLP traffic into capture sessions
//!
//! Implements OTLP TraceService, MetricsService and LogsService using tonic.
//! Every received batch is ingested into each active capture session that
//! records its signal type.

use crate::capture::CaptureSessionManager;
use crate::error::{OtlpError, OtlpServerError};
use crate::otlp::OtlpPayload;
use opentelemetry_proto::tonic::collector::logs::v1::{
    ExportLogsServiceRequest, ExportLogsServiceResponse,
    logs_service_server::{LogsService, LogsServiceServer},
};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
    metrics_service_server::{MetricsService, MetricsServiceServer},
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
    trace_service_server::{TraceService, TraceServiceServer},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

/// gRPC server for OTLP capture
#[derive(Debug, Clone)]
pub struct CaptureReceiver {
    captures: Arc<CaptureSessionManager>,
}

impl CaptureReceiver {
    /// Create a new receiver backed by the capture manager
    pub fn new(captures: Arc<CaptureSessionManager>) -> Self {
        Self { captures }
    }

    /// Bind the address and serve until `shutdown` is cancelled
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    pub async fn start(
        &self,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(SocketAddr, tokio::task::JoinHandle<Result<(), OtlpError>>), OtlpError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| OtlpServerError::BindError(format!("{}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| OtlpServerError::BindError(e.to_string()))?;

        info!(address = %local_addr, "Starting OTLP capture receiver");

        let router = Server::builder()
            .add_service(TraceServiceServer::new(TraceCapture {
                captures: self.captures.clone(),
            }))
            .add_service(MetricsServiceServer::new(MetricsCapture {
                captures: self.captures.clone(),
            }))
            .add_service(LogsServiceServer::new(LogsCapture {
                captures: self.captures.clone(),
            }));

        let handle = tokio::spawn(async move {
            router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    shutdown.cancelled().await
                })
                .await
                .map_err(|e| OtlpError::Server(OtlpServerError::StartupError(e.to_string())))?;
            info!(address = %local_addr, "OTLP capture receiver stopped");
            Ok(())
        });

        Ok((local_addr, handle))
    }
}

async fn capture(captures: &CaptureSessionManager, payload: OtlpPayload) -> Result<(), Status> {
    let signal_type = payload.signal_type();
    match captures.ingest_into_active(payload).await {
        Ok(0) => {
            debug!(signal_type = %signal_type, "No active capture for received batch, dropping");
            Ok(())
        }
        Ok(sessions) => {
            debug!(signal_type = %signal_type, sessions, "Captured received batch");
            Ok(())
        }
        Err(e) => {
            warn!(signal_type = %signal_type, error = %e, "Failed to capture received batch");
            Err(Status::unavailable(format!("Failed to capture batch: {}", e)))
        }
    }
}

#[derive(Debug, Clone)]
struct TraceCapture {
    captures: Arc<CaptureSessionManager>,
}

#[tonic::async_trait]
impl TraceService for TraceCapture {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        capture(&self.captures, OtlpPayload::Traces(request.into_inner())).await?;
        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

#[derive(Debug, Clone)]
struct MetricsCapture {
    captures: Arc<CaptureSessionManager>,
}

#[tonic::async_trait]
impl MetricsService for MetricsCapture {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        capture(&self.captures, OtlpPayload::Metrics(request.into_inner())).await?;
        Ok(Response::new(ExportMetricsServiceResponse {
            partial_success: None,
        }))
    }
}

#[derive(Debug, Clone)]
struct LogsCapture {
    captures: Arc<CaptureSessionManager>,
}

#[tonic::async_trait]
impl LogsService for LogsCapture {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        capture(&self.captures, OtlpPayload::Logs(request.into_inner())).await?;
        Ok(Response::new(ExportLogsServiceResponse {
            partial_success: None,
        }))
    }
}
