//! Shared helpers for integration tests
//!
//! Payload builders and an engine over an in-memory store that replays into a
//! `MockIngestSink`.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::metrics::v1::{
    Gauge, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics, metric::Data,
    number_data_point::Value,
};
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};
use otlp_capture_replay::capture::encode_batch;
use otlp_capture_replay::config::{ReplayConfig, StorageBackend};
use otlp_capture_replay::storage::{
    BatchKey, InMemoryObjectStore, ObjectStore, ObjectStoreSessionStore,
};
use otlp_capture_replay::{
    CaptureReplayEngine, Config, ConfigBuilder, IngestSink, MockIngestSink, OtlpPayload,
    PayloadFormat,
};
use std::sync::Arc;

/// Nanosecond timestamp used as the start of generated records
pub const BASE_NANOS: u64 = 1_700_000_000_000_000_000;

/// Trace batch with `spans` spans starting at `start_nanos`
pub fn trace_batch_at(spans: usize, start_nanos: u64) -> ExportTraceServiceRequest {
    let spans = (0..spans)
        .map(|i| Span {
            trace_id: vec![(i % 256) as u8; 16],
            span_id: vec![(i % 256) as u8; 8],
            name: format!("test-span-{}", i),
            start_time_unix_nano: start_nanos + i as u64 * 1_000,
            end_time_unix_nano: start_nanos + i as u64 * 1_000 + 500,
            ..Default::default()
        })
        .collect();

    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            scope_spans: vec![ScopeSpans {
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// Trace batch with `spans` spans
pub fn trace_batch(spans: usize) -> ExportTraceServiceRequest {
    trace_batch_at(spans, BASE_NANOS)
}

/// Metrics batch with one gauge carrying `points` data points
pub fn metrics_batch(points: usize) -> ExportMetricsServiceRequest {
    let data_points = (0..points)
        .map(|i| NumberDataPoint {
            time_unix_nano: BASE_NANOS + i as u64,
            value: Some(Value::AsDouble(i as f64)),
            ..Default::default()
        })
        .collect();

    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            scope_metrics: vec![ScopeMetrics {
                metrics: vec![Metric {
                    name: "test.gauge".to_string(),
                    data: Some(Data::Gauge(Gauge { data_points })),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// Logs batch with `records` log records
pub fn logs_batch(records: usize) -> ExportLogsServiceRequest {
    let log_records = (0..records)
        .map(|i| LogRecord {
            time_unix_nano: BASE_NANOS + i as u64,
            observed_time_unix_nano: BASE_NANOS + i as u64,
            ..Default::default()
        })
        .collect();

    ExportLogsServiceRequest {
        resource_logs: vec![ResourceLogs {
            scope_logs: vec![ScopeLogs {
                log_records,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// Configuration for in-memory tests with fast retries and no retention task
pub fn test_config() -> Config {
    ConfigBuilder::new()
        .storage_backend(StorageBackend::Memory)
        .retention_enabled(false)
        .replay(ReplayConfig {
            ingest_timeout_secs: 1,
            max_ingest_attempts: 3,
            retry_backoff_millis: 10,
        })
        .build()
        .unwrap()
}

/// Engine over an in-memory store delivering to a mock sink
pub struct TestHarness {
    pub engine: CaptureReplayEngine,
    pub objects: Arc<InMemoryObjectStore>,
    pub sink: MockIngestSink,
}

/// Build a [`TestHarness`] with [`test_config`]
pub async fn harness() -> TestHarness {
    harness_with_config(test_config()).await
}

/// Build a [`TestHarness`] with a custom configuration
pub async fn harness_with_config(config: Config) -> TestHarness {
    let objects = Arc::new(InMemoryObjectStore::new());
    let sessions = Arc::new(ObjectStoreSessionStore::new(objects.clone()));
    let sink = MockIngestSink::new();
    let sink_arc: Arc<dyn IngestSink> = Arc::new(sink.clone());
    let engine =
        CaptureReplayEngine::with_components(config, objects.clone(), sessions, Some(sink_arc))
            .await
            .unwrap();
    TestHarness {
        engine,
        objects,
        sink,
    }
}

/// Write a gzip protobuf batch object captured at `captured_at` directly
///
/// Lets tests control capture spacing without waiting in real time.
pub async fn put_batch(
    objects: &dyn ObjectStore,
    session_id: &str,
    payload: impl Into<OtlpPayload>,
    captured_at: DateTime<Utc>,
) -> String {
    let payload = payload.into();
    let key = BatchKey::new(session_id, payload.signal_type(), captured_at, true).to_key();
    let bytes = encode_batch(&payload, PayloadFormat::Protobuf, Some(6)).unwrap();
    objects.put(&key, bytes).await.unwrap();
    key
}
