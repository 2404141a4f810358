//! OpenTelemetry Protocol (OTLP) module
//!
//! Signal and payload types shared by capture and replay, the payload codec,
//! timestamp rewriting, and the gRPC capture receiver.

use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::metrics::v1::metric::Data;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod codec;
pub mod receiver;
pub mod timestamps;

pub use codec::OtlpCodec;
pub use receiver::CaptureReceiver;

/// OpenTelemetry signal type
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// Spans
    Traces,
    /// Metric data points
    Metrics,
    /// Log records
    Logs,
}

impl SignalType {
    /// All signal types in replay order
    pub const ALL: [SignalType; 3] = [SignalType::Traces, SignalType::Metrics, SignalType::Logs];

    /// Name used in storage keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Traces => "traces",
            SignalType::Metrics => "metrics",
            SignalType::Logs => "logs",
        }
    }

    /// OTLP/HTTP path for this signal
    pub fn http_path(&self) -> &'static str {
        match self {
            SignalType::Traces => "/v1/traces",
            SignalType::Metrics => "/v1/metrics",
            SignalType::Logs => "/v1/logs",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "traces" => Ok(SignalType::Traces),
            "metrics" => Ok(SignalType::Metrics),
            "logs" => Ok(SignalType::Logs),
            other => Err(format!("unknown signal type '{}'", other)),
        }
    }
}

/// Serialization used for stored batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// Protobuf wire encoding
    #[default]
    Protobuf,
    /// OTLP/JSON encoding
    Json,
}

/// One OTLP export batch for a single signal type
#[derive(Debug, Clone, PartialEq)]
pub enum OtlpPayload {
    /// Trace export request
    Traces(ExportTraceServiceRequest),
    /// Metrics export request
    Metrics(ExportMetricsServiceRequest),
    /// Logs export request
    Logs(ExportLogsServiceRequest),
}

impl OtlpPayload {
    /// Signal type carried by this payload
    pub fn signal_type(&self) -> SignalType {
        match self {
            OtlpPayload::Traces(_) => SignalType::Traces,
            OtlpPayload::Metrics(_) => SignalType::Metrics,
            OtlpPayload::Logs(_) => SignalType::Logs,
        }
    }

    /// Number of spans, metric data points or log records in the batch
    pub fn item_count(&self) -> usize {
        match self {
            OtlpPayload::Traces(req) => req
                .resource_spans
                .iter()
                .flat_map(|rs| rs.scope_spans.iter())
                .map(|ss| ss.spans.len())
                .sum(),
            OtlpPayload::Metrics(req) => req
                .resource_metrics
                .iter()
                .flat_map(|rm| rm.scope_metrics.iter())
                .flat_map(|sm| sm.metrics.iter())
                .map(|metric| match &metric.data {
                    Some(Data::Gauge(g)) => g.data_points.len(),
                    Some(Data::Sum(s)) => s.data_points.len(),
                    Some(Data::Histogram(h)) => h.data_points.len(),
                    Some(Data::ExponentialHistogram(h)) => h.data_points.len(),
                    Some(Data::Summary(s)) => s.data_points.len(),
                    None => 0,
                })
                .sum(),
            OtlpPayload::Logs(req) => req
                .resource_logs
                .iter()
                .flat_map(|rl| rl.scope_logs.iter())
                .map(|sl| sl.log_records.len())
                .sum(),
        }
    }

    /// Whether the batch carries no items
    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }
}

impl From<ExportTraceServiceRequest> for OtlpPayload {
    fn from(req: ExportTraceServiceRequest) -> Self {
        OtlpPayload::Traces(req)
    }
}

impl From<ExportMetricsServiceRequest> for OtlpPayload {
    fn from(req: ExportMetricsServiceRequest) -> Self {
        OtlpPayload::Metrics(req)
    }
}

impl From<ExportLogsServiceRequest> for OtlpPayload {
    fn from(req: ExportLogsServiceRequest) -> Self {
        OtlpPayload::Logs(req)
    }
}
