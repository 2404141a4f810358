//! Mock ingestion sink for testing
//!
//! Records every delivered batch in memory and can be scripted to fail or to
//! respond slowly. It can also serve the OTLP/gRPC collector services so the
//! gRPC sink can be exercised end to end.

use crate::otlp::{OtlpPayload, SignalType};
use crate::replay::{IngestSink, IngestSinkError};
use async_trait::async_trait;
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
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};
use tracing::{error, info};

/// A batch accepted by the mock sink
#[derive(Debug, Clone)]
pub struct ReceivedBatch {
    /// Delivered payload
    pub payload: OtlpPayload,
    /// When the delivery was acknowledged (tokio clock)
    pub received_at: Instant,
}

/// Mock sink state
#[derive(Debug, Default)]
struct MockSinkState {
    received: Vec<ReceivedBatch>,
    calls: u64,
    scripted_failures: VecDeque<IngestSinkError>,
    fail_always: Option<IngestSinkError>,
    delay: Option<Duration>,
}

/// In-memory ingestion sink with programmable failures
#[derive(Debug, Clone, Default)]
pub struct MockIngestSink {
    state: Arc<RwLock<MockSinkState>>,
}

impl MockIngestSink {
    /// Create a new mock sink that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls with `error`
    pub async fn fail_next(&self, count: usize, error: IngestSinkError) {
        let mut state = self.state.write().await;
        state
            .scripted_failures
            .extend(std::iter::repeat_n(error, count));
    }

    /// Fail every call with `error` until [`MockIngestSink::reset`]
    pub async fn fail_always(&self, error: IngestSinkError) {
        self.state.write().await.fail_always = Some(error);
    }

    /// Wait `delay` inside every call before answering
    pub async fn set_delay(&self, delay: Duration) {
        self.state.write().await.delay = Some(delay);
    }

    /// Batches accepted so far, in delivery order
    pub async fn received_batches(&self) -> Vec<ReceivedBatch> {
        self.state.read().await.received.clone()
    }

    /// Number of accepted batches of one signal type
    pub async fn received_count(&self, signal_type: SignalType) -> usize {
        self.state
            .read()
            .await
            .received
            .iter()
            .filter(|b| b.payload.signal_type() == signal_type)
            .count()
    }

    /// Number of `ingest` calls, including failed ones
    pub async fn calls_count(&self) -> u64 {
        self.state.read().await.calls
    }

    /// Assert that the expected number of batches were accepted
    pub async fn assert_batches_received(&self, expected_count: usize) -> Result<(), String> {
        let state = self.state.read().await;
        if state.received.len() != expected_count {
            Err(format!(
                "Expected {} batches, but received {}",
                expected_count,
                state.received.len()
            ))
        } else {
            Ok(())
        }
    }

    /// Reset the mock sink state (for test isolation)
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        *state = MockSinkState::default();
    }

    /// Serve the OTLP/gRPC collector services backed by this sink
    ///
    /// Returns the `http://` address to point a gRPC sink at. Scripted
    /// transient failures surface as `UNAVAILABLE`, permanent ones as
    /// `INVALID_ARGUMENT`.
    pub async fn start_grpc(&self) -> Result<String, String> {
        let addr = "127.0.0.1:0"
            .parse::<SocketAddr>()
            .map_err(|e| format!("Failed to parse address: {}", e))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| format!("Failed to bind listener: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| format!("Failed to get local address: {}", e))?;

        let collector = MockCollector { sink: self.clone() };
        tokio::spawn(async move {
            let server = tonic::transport::Server::builder()
                .add_service(TraceServiceServer::new(collector.clone()))
                .add_service(MetricsServiceServer::new(collector.clone()))
                .add_service(LogsServiceServer::new(collector))
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await;
            if let Err(e) = server {
                error!(error = %e, "Mock collector server error");
            }
        });

        let endpoint = format!("http://{}", addr);
        info!(endpoint = %endpoint, "Mock OTLP collector started");
        Ok(endpoint)
    }
}

#[async_trait]
impl IngestSink for MockIngestSink {
    async fn ingest(&self, payload: &OtlpPayload) -> Result<(), IngestSinkError> {
        let (delay, failure) = {
            let mut state = self.state.write().await;
            state.calls += 1;
            let failure = state
                .scripted_failures
                .pop_front()
                .or_else(|| state.fail_always.clone());
            (state.delay, failure)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = failure {
            return Err(failure);
        }

        self.state.write().await.received.push(ReceivedBatch {
            payload: payload.clone(),
            received_at: Instant::now(),
        });
        Ok(())
    }
}

/// gRPC front end of the mock sink
#[derive(Debug, Clone)]
struct MockCollector {
    sink: MockIngestSink,
}

impl MockCollector {
    async fn accept(&self, payload: OtlpPayload) -> Result<(), Status> {
        self.sink.ingest(&payload).await.map_err(|e| match e {
            IngestSinkError::Transient(msg) => Status::unavailable(msg),
            IngestSinkError::Permanent(msg) => Status::invalid_argument(msg),
        })
    }
}

#[tonic::async_trait]
impl TraceService for MockCollector {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        self.accept(OtlpPayload::Traces(request.into_inner())).await?;
        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

#[tonic::async_trait]
impl MetricsService for MockCollector {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        self.accept(OtlpPayload::Metrics(request.into_inner()))
            .await?;
        Ok(Response::new(ExportMetricsServiceResponse {
            partial_success: None,
        }))
    }
}

#[tonic::async_trait]
impl LogsService for MockCollector {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        self.accept(OtlpPayload::Logs(request.into_inner())).await?;
        Ok(Response::new(ExportLogsServiceResponse {
            partial_success: None,
        }))
    }
}
