//! Integration tests for replay lifecycle, pacing and failure handling

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{BASE_NANOS, harness, logs_batch, put_batch, trace_batch, trace_batch_at};
use futures::StreamExt;
use otlp_capture_replay::storage::{BatchKey, ObjectStore};
use otlp_capture_replay::{
    CaptureOptions, CaptureStatus, IngestSinkError, OtlpError, OtlpPayload, OtlpReplayError,
    ReplayFailureKind, ReplayOptions, ReplayStatus, SignalType, TimestampAdjustment,
};
use std::time::Duration;

/// Start a traces-only session, write batches `gaps_secs` apart, stop it
async fn recorded_session(
    h: &common::TestHarness,
    session_id: &str,
    gaps_secs: &[i64],
) -> Vec<String> {
    h.engine
        .start_capture(CaptureOptions::for_signals(session_id, &[SignalType::Traces]))
        .await
        .unwrap();
    let first = Utc::now() - ChronoDuration::hours(1);
    let mut keys = Vec::new();
    for (i, gap) in gaps_secs.iter().enumerate() {
        let captured_at = first + ChronoDuration::seconds(*gap);
        let batch = trace_batch_at(i + 1, BASE_NANOS + *gap as u64 * 1_000_000_000);
        keys.push(put_batch(h.objects.as_ref(), session_id, batch, captured_at).await);
    }
    h.engine.stop_capture(session_id).await.unwrap();
    keys
}

#[tokio::test]
async fn test_replay_delivers_every_captured_batch() {
    let h = harness().await;
    h.engine
        .start_capture(CaptureOptions::for_signals("cap-1", &[SignalType::Traces]))
        .await
        .unwrap();
    for _ in 0..3 {
        h.engine.ingest_batch("cap-1", trace_batch(2)).await.unwrap();
    }
    h.engine.stop_capture("cap-1").await.unwrap();

    let replay = h
        .engine
        .start_replay(ReplayOptions::new("cap-1").with_speed(100.0))
        .await
        .unwrap();
    assert_eq!(replay.total_records, 3);
    assert_eq!(replay.status, ReplayStatus::Running);
    assert!(replay.processed_records <= replay.total_records);

    let finished = h.engine.wait_for_replay(&replay.replay_id).await.unwrap();
    assert_eq!(finished.status, ReplayStatus::Completed);
    assert_eq!(finished.processed_records, 3);
    assert!(finished.completed_at.is_some());
    assert!(finished.error.is_none());

    h.sink.assert_batches_received(3).await.unwrap();
    for batch in h.sink.received_batches().await {
        assert_eq!(batch.payload, OtlpPayload::Traces(trace_batch(2)));
    }

    let status = h.engine.get_replay_status(&replay.replay_id).await.unwrap();
    assert_eq!(status, finished);
}

#[tokio::test]
async fn test_replay_of_active_session_is_rejected() {
    let h = harness().await;
    h.engine
        .start_capture(CaptureOptions::new("live"))
        .await
        .unwrap();

    match h.engine.start_replay(ReplayOptions::new("live")).await {
        Err(OtlpError::Replay(OtlpReplayError::InvalidState { status, .. })) => {
            assert_eq!(status, CaptureStatus::Active)
        }
        other => panic!("Expected InvalidState error, got {:?}", other),
    }
    assert_eq!(h.sink.calls_count().await, 0);
}

#[tokio::test]
async fn test_replay_rejects_invalid_requests() {
    let h = harness().await;
    recorded_session(&h, "only-traces", &[0]).await;

    assert!(matches!(
        h.engine.start_replay(ReplayOptions::new("nope")).await,
        Err(OtlpError::Replay(OtlpReplayError::SessionNotFound(_)))
    ));
    assert!(matches!(
        h.engine
            .start_replay(ReplayOptions::new("only-traces").with_speed(0.0))
            .await,
        Err(OtlpError::Replay(OtlpReplayError::InvalidOptions(_)))
    ));
    assert!(matches!(
        h.engine
            .start_replay(ReplayOptions::new("only-traces").with_speed(f64::NAN))
            .await,
        Err(OtlpError::Replay(OtlpReplayError::InvalidOptions(_)))
    ));
    // Logs were never captured
    assert!(matches!(
        h.engine
            .start_replay(ReplayOptions::for_signals("only-traces", &[SignalType::Logs]))
            .await,
        Err(OtlpError::Replay(OtlpReplayError::InvalidOptions(_)))
    ));
    assert!(matches!(
        h.engine.get_replay_status("unknown").await,
        Err(OtlpError::Replay(OtlpReplayError::ReplayNotFound(_)))
    ));
}

#[tokio::test]
async fn test_corrupted_batch_fails_replay() {
    let h = harness().await;
    let keys = recorded_session(&h, "corrupt", &[0, 1, 2]).await;

    let mut bytes = h.objects.get(&keys[0]).await.unwrap();
    bytes[0] = 0;
    bytes[1] = 0;
    h.objects.put(&keys[0], bytes).await.unwrap();

    let replay = h
        .engine
        .start_replay(ReplayOptions::new("corrupt"))
        .await
        .unwrap();
    let finished = h.engine.wait_for_replay(&replay.replay_id).await.unwrap();

    assert_eq!(finished.status, ReplayStatus::Failed);
    assert_eq!(finished.failure_kind, Some(ReplayFailureKind::DataCorrupted));
    assert_eq!(finished.processed_records, 0);
    assert_eq!(finished.total_records, 3);
    assert!(finished.error.is_some());
    assert_eq!(h.sink.calls_count().await, 0);

    // Progress stays frozen after failure
    tokio::time::sleep(Duration::from_millis(50)).await;
    let later = h.engine.get_replay_status(&replay.replay_id).await.unwrap();
    assert_eq!(later.processed_records, 0);
}

#[tokio::test]
async fn test_corrupted_uncompressed_batch_fails_replay() {
    let h = harness().await;
    h.engine
        .start_capture(CaptureOptions {
            compression_enabled: false,
            ..CaptureOptions::for_signals("plain", &[SignalType::Traces])
        })
        .await
        .unwrap();
    for spans in 1..=3 {
        h.engine.ingest_batch("plain", trace_batch(spans)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    h.engine.stop_capture("plain").await.unwrap();

    let mut stored: Vec<BatchKey> = h
        .objects
        .list("sessions/plain/")
        .await
        .unwrap()
        .iter()
        .filter_map(|key| BatchKey::parse(key).ok())
        .collect();
    stored.sort_by(|a, b| a.captured_at.cmp(&b.captured_at));
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|key| !key.compressed));

    // Second batch is no longer valid protobuf
    h.objects
        .put(&stored[1].to_key(), b"not an otlp batch".to_vec())
        .await
        .unwrap();

    let replay = h
        .engine
        .start_replay(ReplayOptions::new("plain").with_speed(100.0))
        .await
        .unwrap();
    let finished = h.engine.wait_for_replay(&replay.replay_id).await.unwrap();

    assert_eq!(finished.status, ReplayStatus::Failed);
    assert_eq!(finished.failure_kind, Some(ReplayFailureKind::DataCorrupted));
    assert_eq!(finished.processed_records, 1);
    assert_eq!(finished.total_records, 3);

    // Nothing after the bad object reaches the sink
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.sink.assert_batches_received(1).await.unwrap();
    let received = h.sink.received_batches().await;
    assert_eq!(received[0].payload, OtlpPayload::Traces(trace_batch(1)));
    let later = h.engine.get_replay_status(&replay.replay_id).await.unwrap();
    assert_eq!(later.processed_records, 1);
}

#[tokio::test(start_paused = true)]
async fn test_speed_multiplier_scales_capture_gaps() {
    let h = harness().await;
    recorded_session(&h, "paced", &[0, 10]).await;

    let replay = h
        .engine
        .start_replay(ReplayOptions::new("paced").with_speed(2.0))
        .await
        .unwrap();
    let finished = h.engine.wait_for_replay(&replay.replay_id).await.unwrap();
    assert_eq!(finished.status, ReplayStatus::Completed);

    let received = h.sink.received_batches().await;
    assert_eq!(received.len(), 2);
    let gap = received[1].received_at - received[0].received_at;
    assert!(gap >= Duration::from_secs(5), "gap was {:?}", gap);
    assert!(gap < Duration::from_millis(5_100), "gap was {:?}", gap);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let h = harness().await;
    recorded_session(&h, "flaky", &[0]).await;
    h.sink
        .fail_next(2, IngestSinkError::Transient("collector busy".to_string()))
        .await;

    let replay = h.engine.start_replay(ReplayOptions::new("flaky")).await.unwrap();
    let finished = h.engine.wait_for_replay(&replay.replay_id).await.unwrap();

    assert_eq!(finished.status, ReplayStatus::Completed);
    assert_eq!(finished.processed_records, 1);
    assert_eq!(h.sink.calls_count().await, 3);
    h.sink.assert_batches_received(1).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_exhaust_attempts() {
    let h = harness().await;
    recorded_session(&h, "down", &[0]).await;
    h.sink
        .fail_always(IngestSinkError::Transient("connection refused".to_string()))
        .await;

    let replay = h.engine.start_replay(ReplayOptions::new("down")).await.unwrap();
    let finished = h.engine.wait_for_replay(&replay.replay_id).await.unwrap();

    assert_eq!(finished.status, ReplayStatus::Failed);
    assert_eq!(finished.failure_kind, Some(ReplayFailureKind::Ingestion));
    assert_eq!(h.sink.calls_count().await, 3);
}

#[tokio::test]
async fn test_permanent_failure_fails_replay() {
    let h = harness().await;
    recorded_session(&h, "rejected", &[0, 1]).await;
    h.sink
        .fail_always(IngestSinkError::Permanent("400 Bad Request".to_string()))
        .await;

    let replay = h
        .engine
        .start_replay(ReplayOptions::new("rejected").with_speed(50.0))
        .await
        .unwrap();
    let finished = h.engine.wait_for_replay(&replay.replay_id).await.unwrap();

    assert_eq!(finished.status, ReplayStatus::Failed);
    assert_eq!(finished.failure_kind, Some(ReplayFailureKind::Ingestion));
    assert_eq!(finished.processed_records, 0);
    assert!(finished.error.unwrap().contains("400 Bad Request"));
    assert_eq!(h.sink.calls_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_sink_times_out() {
    let h = harness().await;
    recorded_session(&h, "slow", &[0]).await;
    h.sink.set_delay(Duration::from_secs(30)).await;

    let replay = h.engine.start_replay(ReplayOptions::new("slow")).await.unwrap();
    let finished = h.engine.wait_for_replay(&replay.replay_id).await.unwrap();

    assert_eq!(finished.status, ReplayStatus::Failed);
    assert_eq!(finished.failure_kind, Some(ReplayFailureKind::Ingestion));
    assert_eq!(h.sink.calls_count().await, 3);
    h.sink.assert_batches_received(0).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_delivered_progress() {
    let h = harness().await;
    recorded_session(&h, "long", &[0, 60]).await;

    let replay = h.engine.start_replay(ReplayOptions::new("long")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.sink.assert_batches_received(1).await.unwrap();

    let cancelled = h.engine.cancel_replay(&replay.replay_id).await.unwrap();
    assert_eq!(cancelled.status, ReplayStatus::Failed);
    assert_eq!(cancelled.failure_kind, Some(ReplayFailureKind::Cancelled));
    assert_eq!(cancelled.processed_records, 1);
    assert_eq!(cancelled.total_records, 2);

    tokio::time::sleep(Duration::from_secs(120)).await;
    h.sink.assert_batches_received(1).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_missing_object_fails_with_ingestion_error() {
    let h = harness().await;
    let keys = recorded_session(&h, "vanishing", &[0, 10, 20]).await;

    let replay = h
        .engine
        .start_replay(ReplayOptions::new("vanishing"))
        .await
        .unwrap();
    // The next batch is fetched ahead of its emission, so remove the one after it
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.objects.delete(&keys[2]).await.unwrap();

    let finished = h.engine.wait_for_replay(&replay.replay_id).await.unwrap();
    assert_eq!(finished.status, ReplayStatus::Failed);
    assert_eq!(finished.failure_kind, Some(ReplayFailureKind::Ingestion));
    assert_eq!(finished.processed_records, 2);
}

#[tokio::test]
async fn test_current_timestamps_start_at_replay_start() {
    let h = harness().await;
    recorded_session(&h, "shifted", &[0]).await;

    let replay = h
        .engine
        .start_replay(
            ReplayOptions::new("shifted").with_timestamp_adjustment(TimestampAdjustment::Current),
        )
        .await
        .unwrap();
    h.engine.wait_for_replay(&replay.replay_id).await.unwrap();

    let received = h.sink.received_batches().await;
    let OtlpPayload::Traces(request) = &received[0].payload else {
        panic!("Expected a trace batch");
    };
    let span = &request.resource_spans[0].scope_spans[0].spans[0];
    let started_nanos = replay.started_at.timestamp_nanos_opt().unwrap() as u64;
    assert_eq!(span.start_time_unix_nano, started_nanos);
    assert_eq!(span.end_time_unix_nano, started_nanos + 500);
}

#[tokio::test]
async fn test_original_timestamps_are_untouched() {
    let h = harness().await;
    recorded_session(&h, "verbatim", &[0]).await;

    let replay = h
        .engine
        .start_replay(ReplayOptions::new("verbatim"))
        .await
        .unwrap();
    h.engine.wait_for_replay(&replay.replay_id).await.unwrap();

    let received = h.sink.received_batches().await;
    assert_eq!(received[0].payload, OtlpPayload::Traces(trace_batch_at(1, BASE_NANOS)));
}

#[tokio::test]
async fn test_replay_data_stream_yields_batches_in_capture_order() {
    let h = harness().await;
    recorded_session(&h, "streamed", &[0, 5, 10]).await;

    let batches: Vec<_> = h
        .engine
        .replay_data_stream("streamed", SignalType::Traces)
        .collect()
        .await;
    assert_eq!(batches.len(), 3);
    for (i, batch) in batches.into_iter().enumerate() {
        let batch = batch.unwrap();
        assert_eq!(batch.payload.item_count(), i + 1);
    }

    let empty: Vec<_> = h
        .engine
        .replay_data_stream("streamed", SignalType::Logs)
        .collect()
        .await;
    assert!(empty.is_empty());

    let missing: Vec<_> = h
        .engine
        .replay_data_stream("nope", SignalType::Traces)
        .collect()
        .await;
    assert_eq!(missing.len(), 1);
    assert!(matches!(missing[0], Err(OtlpReplayError::SessionNotFound(_))));
}

#[tokio::test]
async fn test_signals_replay_as_independent_streams() {
    let h = harness().await;
    h.engine
        .start_capture(CaptureOptions::new("mixed"))
        .await
        .unwrap();
    h.engine.ingest_batch("mixed", trace_batch(1)).await.unwrap();
    h.engine.ingest_batch("mixed", logs_batch(1)).await.unwrap();
    h.engine.ingest_batch("mixed", logs_batch(2)).await.unwrap();
    h.engine.stop_capture("mixed").await.unwrap();

    let replay = h
        .engine
        .start_replay(ReplayOptions::new("mixed").with_speed(100.0))
        .await
        .unwrap();
    assert_eq!(replay.total_records, 3);
    let finished = h.engine.wait_for_replay(&replay.replay_id).await.unwrap();
    assert_eq!(finished.status, ReplayStatus::Completed);
    assert_eq!(h.sink.received_count(SignalType::Traces).await, 1);
    assert_eq!(h.sink.received_count(SignalType::Logs).await, 2);
}

#[tokio::test]
async fn test_listing_available_and_past_replays() {
    let h = harness().await;
    recorded_session(&h, "done", &[0]).await;
    h.engine
        .start_capture(CaptureOptions::new("recording"))
        .await
        .unwrap();

    let available = h.engine.list_available_replays().await.unwrap();
    let ids: Vec<&str> = available.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["done"]);

    let first = h.engine.start_replay(ReplayOptions::new("done")).await.unwrap();
    h.engine.wait_for_replay(&first.replay_id).await.unwrap();
    let second = h.engine.start_replay(ReplayOptions::new("done")).await.unwrap();
    h.engine.wait_for_replay(&second.replay_id).await.unwrap();

    let replays = h.engine.list_replays().await.unwrap();
    assert_eq!(replays.len(), 2);
    assert!(replays.iter().all(|r| r.status == ReplayStatus::Completed));
    assert_ne!(replays[0].replay_id, replays[1].replay_id);
}

#[tokio::test]
async fn test_shutdown_cancels_running_replays() {
    let h = harness().await;
    recorded_session(&h, "interrupted", &[0, 3600]).await;

    let replay = h
        .engine
        .start_replay(ReplayOptions::new("interrupted"))
        .await
        .unwrap();
    h.engine.shutdown().await.unwrap();

    let status = h.engine.get_replay_status(&replay.replay_id).await.unwrap();
    assert_eq!(status.status, ReplayStatus::Failed);
    assert_eq!(status.failure_kind, Some(ReplayFailureKind::Cancelled));

    assert!(matches!(
        h.engine.start_replay(ReplayOptions::new("interrupted")).await,
        Err(OtlpError::Replay(OtlpReplayError::InvalidOptions(_)))
    ));
}
