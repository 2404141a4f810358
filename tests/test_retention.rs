//! Integration tests for retention sweeps

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{harness, logs_batch, metrics_batch, put_batch, trace_batch};
use otlp_capture_replay::storage::ObjectStore;
use otlp_capture_replay::{CaptureOptions, RetentionPolicy};
use std::time::Duration;

#[tokio::test]
async fn test_retention_deletes_expired_batches_of_stopped_sessions() {
    let h = harness().await;
    h.engine
        .start_capture(CaptureOptions::new("old"))
        .await
        .unwrap();
    let two_hours_ago = Utc::now() - ChronoDuration::hours(2);
    let expired = put_batch(h.objects.as_ref(), "old", trace_batch(1), two_hours_ago).await;
    let fresh = put_batch(h.objects.as_ref(), "old", trace_batch(1), Utc::now()).await;
    h.engine.stop_capture("old").await.unwrap();

    let policy = RetentionPolicy::uniform(Duration::from_secs(3600));
    let report = h.engine.apply_retention_policy(&policy).await;
    assert_eq!(report.sessions_scanned, 1);
    assert_eq!(report.objects_scanned, 2);
    assert_eq!(report.objects_deleted, 1);
    assert_eq!(report.errors, 0);

    let remaining = h.objects.list("sessions/old/").await.unwrap();
    assert!(!remaining.contains(&expired));
    assert!(remaining.contains(&fresh));
    // Session metadata survives
    assert!(remaining.contains(&"sessions/old/metadata.json".to_string()));

    // A second pass finds nothing more to delete
    let again = h.engine.apply_retention_policy(&policy).await;
    assert_eq!(again.objects_deleted, 0);
    assert_eq!(again.objects_scanned, 1);
}

#[tokio::test]
async fn test_retention_never_touches_active_sessions() {
    let h = harness().await;
    h.engine
        .start_capture(CaptureOptions::new("recording"))
        .await
        .unwrap();
    let long_ago = Utc::now() - ChronoDuration::days(30);
    let key = put_batch(h.objects.as_ref(), "recording", logs_batch(1), long_ago).await;

    let report = h
        .engine
        .apply_retention_policy(&RetentionPolicy::uniform(Duration::from_secs(60)))
        .await;
    assert_eq!(report.sessions_skipped_active, 1);
    assert_eq!(report.objects_deleted, 0);
    assert!(h.objects.get(&key).await.is_ok());
}

#[tokio::test]
async fn test_retention_windows_are_per_signal() {
    let h = harness().await;
    h.engine
        .start_capture(CaptureOptions::new("mixed"))
        .await
        .unwrap();
    let day_ago = Utc::now() - ChronoDuration::days(1);
    let trace = put_batch(h.objects.as_ref(), "mixed", trace_batch(1), day_ago).await;
    let metric = put_batch(h.objects.as_ref(), "mixed", metrics_batch(1), day_ago).await;
    let log = put_batch(h.objects.as_ref(), "mixed", logs_batch(1), day_ago).await;
    h.engine.stop_capture("mixed").await.unwrap();

    let policy = RetentionPolicy {
        traces: Some(Duration::from_secs(3600)),
        metrics: Some(Duration::from_secs(7 * 24 * 3600)),
        logs: None,
    };
    let report = h.engine.apply_retention_policy(&policy).await;
    assert_eq!(report.objects_deleted, 1);

    assert!(h.objects.get(&trace).await.is_err());
    assert!(h.objects.get(&metric).await.is_ok());
    assert!(h.objects.get(&log).await.is_ok());
}

#[tokio::test]
async fn test_replay_totals_follow_retention() {
    let h = harness().await;
    h.engine
        .start_capture(CaptureOptions::new("trimmed"))
        .await
        .unwrap();
    put_batch(
        h.objects.as_ref(),
        "trimmed",
        trace_batch(1),
        Utc::now() - ChronoDuration::hours(3),
    )
    .await;
    put_batch(h.objects.as_ref(), "trimmed", trace_batch(1), Utc::now()).await;
    h.engine.stop_capture("trimmed").await.unwrap();

    h.engine
        .apply_retention_policy(&RetentionPolicy::uniform(Duration::from_secs(3600)))
        .await;

    let replay = h
        .engine
        .start_replay(otlp_capture_replay::ReplayOptions::new("trimmed"))
        .await
        .unwrap();
    assert_eq!(replay.total_records, 1);
}
