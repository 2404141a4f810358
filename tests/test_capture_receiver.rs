//! Integration tests for the OTLP/gRPC capture receiver

mod common;

use common::{harness, logs_batch, metrics_batch, trace_batch};
use opentelemetry_proto::tonic::collector::logs::v1::logs_service_client::LogsServiceClient;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_client::MetricsServiceClient;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use otlp_capture_replay::{CaptureOptions, SignalType};
use std::net::SocketAddr;

async fn start_receiver(h: &common::TestHarness) -> String {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let bound = h.engine.start_receiver_on(addr).await.unwrap();
    format!("http://{}", bound)
}

#[tokio::test]
async fn test_received_batches_feed_active_sessions() {
    let h = harness().await;
    h.engine
        .start_capture(CaptureOptions::new("all-signals"))
        .await
        .unwrap();
    h.engine
        .start_capture(CaptureOptions::for_signals("traces-only", &[SignalType::Traces]))
        .await
        .unwrap();
    let endpoint = start_receiver(&h).await;

    let mut traces = TraceServiceClient::connect(endpoint.clone()).await.unwrap();
    let mut metrics = MetricsServiceClient::connect(endpoint.clone()).await.unwrap();
    let mut logs = LogsServiceClient::connect(endpoint).await.unwrap();

    traces.export(trace_batch(2)).await.unwrap();
    traces.export(trace_batch(1)).await.unwrap();
    metrics.export(metrics_batch(4)).await.unwrap();
    logs.export(logs_batch(3)).await.unwrap();

    let all = h.engine.stop_capture("all-signals").await.unwrap();
    assert_eq!(all.captured_traces, 2);
    assert_eq!(all.captured_metrics, 1);
    assert_eq!(all.captured_logs, 1);

    let only = h.engine.stop_capture("traces-only").await.unwrap();
    assert_eq!(only.captured_traces, 2);
    assert_eq!(only.captured_metrics, 0);
    assert_eq!(only.captured_logs, 0);

    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_batches_without_active_session_are_accepted_and_dropped() {
    let h = harness().await;
    let endpoint = start_receiver(&h).await;

    let mut traces = TraceServiceClient::connect(endpoint).await.unwrap();
    traces.export(trace_batch(1)).await.unwrap();

    assert!(h.objects.is_empty().await);
    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_receiver_cannot_start_twice() {
    let h = harness().await;
    start_receiver(&h).await;
    let again = h
        .engine
        .start_receiver_on("127.0.0.1:0".parse().unwrap())
        .await;
    assert!(again.is_err());
    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_the_receiver() {
    let h = harness().await;
    let endpoint = start_receiver(&h).await;
    h.engine.shutdown().await.unwrap();

    assert!(TraceServiceClient::connect(endpoint).await.is_err());
}
