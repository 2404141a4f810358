//! Replay session manager
//!
//! Validates replay requests against the stored capture sessions, computes the
//! record totals, runs one pacer task per replay and tracks its progress.
//! Replay records are persisted through the [`SessionStore`] when they are
//! created and when they finish.

use crate::capture::{CaptureSession, CaptureStatus};
use crate::error::{OtlpReplayError, OtlpStorageError};
use crate::otlp::{PayloadFormat, SignalType};
use crate::replay::pacer::{fetch_batch, ReplayPlan, StoredObject};
use crate::replay::{
    DeliverySettings, IngestSink, ReplayOptions, ReplayPacer, ReplaySession, ReplayStatus,
    ReplayedBatch,
};
use crate::storage::keys::raw_prefix;
use crate::storage::{BatchKey, ObjectStore, SessionStore};
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Live state of one replay run
#[derive(Debug)]
struct ReplayTracker {
    session: RwLock<ReplaySession>,
    processed: AtomicU64,
    /// Cancels the pacer
    cancel: CancellationToken,
    /// Fired once the final record has been written
    done: CancellationToken,
}

impl ReplayTracker {
    async fn snapshot(&self) -> ReplaySession {
        let mut session = self.session.read().await.clone();
        if !session.status.is_terminal() {
            session.processed_records = self.processed.load(Ordering::Acquire);
        }
        session
    }
}

/// Manages replay lifecycle and progress
#[derive(Debug)]
pub struct ReplaySessionManager {
    objects: Arc<dyn ObjectStore>,
    sessions: Arc<dyn SessionStore>,
    sink: Option<Arc<dyn IngestSink>>,
    settings: DeliverySettings,
    /// Running replays; finished ones are served from the session store
    replays: Arc<RwLock<HashMap<String, Arc<ReplayTracker>>>>,
    shutdown: CancellationToken,
}

impl ReplaySessionManager {
    /// Create a manager delivering to `sink`
    ///
    /// Without a sink every `start_replay` is rejected; the raw data stream
    /// still works.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        sessions: Arc<dyn SessionStore>,
        sink: Option<Arc<dyn IngestSink>>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            objects,
            sessions,
            sink,
            settings,
            replays: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start replaying a stopped capture session
    ///
    /// Returns the replay record in `running` state; progress continues in a
    /// background task.
    pub async fn start_replay(
        &self,
        options: ReplayOptions,
    ) -> Result<ReplaySession, OtlpReplayError> {
        if !options.speed_multiplier.is_finite() || options.speed_multiplier <= 0.0 {
            return Err(OtlpReplayError::InvalidOptions(format!(
                "speed_multiplier must be a finite number greater than 0, got {}",
                options.speed_multiplier
            )));
        }
        let requested = options.signal_types();
        if requested.is_empty() {
            return Err(OtlpReplayError::InvalidOptions(
                "at least one signal type must be replayed".to_string(),
            ));
        }
        let sink = self.sink.clone().ok_or_else(|| {
            OtlpReplayError::InvalidOptions("no ingestion sink is configured".to_string())
        })?;
        if self.shutdown.is_cancelled() {
            return Err(OtlpReplayError::InvalidOptions(
                "replay manager is shutting down".to_string(),
            ));
        }

        let capture = load_capture(self.sessions.as_ref(), &options.session_id).await?;
        if capture.status != CaptureStatus::Stopped {
            return Err(OtlpReplayError::InvalidState {
                session_id: capture.session_id,
                status: capture.status,
            });
        }
        if let Some(missing) = requested.iter().find(|s| !capture.captures(**s)) {
            return Err(OtlpReplayError::InvalidOptions(format!(
                "session {} did not capture {}",
                capture.session_id, missing
            )));
        }

        let objects = list_objects(self.objects.as_ref(), &capture.session_id, &requested)
            .await
            .map_err(|source| OtlpReplayError::StorageFailure {
                session_id: capture.session_id.clone(),
                source,
            })?;

        let mut session = ReplaySession {
            replay_id: Uuid::new_v4().to_string(),
            session_id: capture.session_id.clone(),
            speed_multiplier: options.speed_multiplier,
            replay_traces: options.replay_traces,
            replay_metrics: options.replay_metrics,
            replay_logs: options.replay_logs,
            timestamp_adjustment: options.timestamp_adjustment,
            status: ReplayStatus::Pending,
            total_records: objects.len() as u64,
            processed_records: 0,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            failure_kind: None,
        };
        self.save(&session).await?;
        session.status = ReplayStatus::Running;
        self.save(&session).await?;

        let plan = ReplayPlan {
            replay_id: session.replay_id.clone(),
            session_id: session.session_id.clone(),
            format: capture.payload_format,
            speed_multiplier: session.speed_multiplier,
            timestamp_adjustment: session.timestamp_adjustment,
            started_at: session.started_at,
            streams: requested
                .iter()
                .map(|signal| {
                    let stream: Vec<StoredObject> = objects
                        .iter()
                        .filter(|o| o.batch.signal_type == *signal)
                        .cloned()
                        .collect();
                    (*signal, stream)
                })
                .collect(),
        };

        let tracker = Arc::new(ReplayTracker {
            session: RwLock::new(session.clone()),
            processed: AtomicU64::new(0),
            cancel: self.shutdown.child_token(),
            done: CancellationToken::new(),
        });
        self.replays
            .write()
            .await
            .insert(session.replay_id.clone(), tracker.clone());

        let pacer = ReplayPacer::new(self.objects.clone(), sink, self.settings);
        let sessions = self.sessions.clone();
        let replays = self.replays.clone();
        tokio::spawn(async move {
            let result = pacer.run(&plan, &tracker.processed, &tracker.cancel).await;
            // Keep the tracker when the final record could not be stored so
            // status queries still see the outcome
            if finish_replay(&tracker, sessions.as_ref(), result).await {
                replays.write().await.remove(&plan.replay_id);
            }
        });

        info!(
            replay_id = %session.replay_id,
            session_id = %session.session_id,
            total_records = session.total_records,
            speed_multiplier = session.speed_multiplier,
            signals = ?requested,
            "Started replay"
        );
        Ok(session)
    }

    /// Current record of a replay, with live progress while it runs
    pub async fn get_replay_status(&self, replay_id: &str) -> Result<ReplaySession, OtlpReplayError> {
        let tracker = self.replays.read().await.get(replay_id).cloned();
        if let Some(tracker) = tracker {
            return Ok(tracker.snapshot().await);
        }
        self.sessions
            .load_replay(replay_id)
            .await
            .map_err(|source| OtlpReplayError::StorageFailure {
                session_id: String::new(),
                source,
            })?
            .ok_or_else(|| OtlpReplayError::ReplayNotFound(replay_id.to_string()))
    }

    /// Capture sessions that can be replayed
    pub async fn list_available_replays(&self) -> Result<Vec<CaptureSession>, OtlpReplayError> {
        let sessions = self
            .sessions
            .list_captures()
            .await
            .map_err(|source| OtlpReplayError::StorageFailure {
                session_id: String::new(),
                source,
            })?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.status == CaptureStatus::Stopped)
            .collect())
    }

    /// Every known replay, ordered by start time
    pub async fn list_replays(&self) -> Result<Vec<ReplaySession>, OtlpReplayError> {
        let mut replays = self
            .sessions
            .list_replays()
            .await
            .map_err(|source| OtlpReplayError::StorageFailure {
                session_id: String::new(),
                source,
            })?;

        let trackers: Vec<Arc<ReplayTracker>> =
            self.replays.read().await.values().cloned().collect();
        for tracker in trackers {
            let live = tracker.snapshot().await;
            match replays.iter_mut().find(|r| r.replay_id == live.replay_id) {
                Some(stored) => *stored = live,
                None => replays.push(live),
            }
        }
        replays.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(replays)
    }

    /// Stop a running replay and wait for its final record
    pub async fn cancel_replay(&self, replay_id: &str) -> Result<ReplaySession, OtlpReplayError> {
        let tracker = self.replays.read().await.get(replay_id).cloned();
        match tracker {
            Some(tracker) => {
                if !tracker.done.is_cancelled() {
                    info!(replay_id = %replay_id, "Cancelling replay");
                }
                tracker.cancel.cancel();
                tracker.done.cancelled().await;
                Ok(tracker.snapshot().await)
            }
            None => self.get_replay_status(replay_id).await,
        }
    }

    /// Wait until a replay reaches a terminal status
    pub async fn wait_for_replay(&self, replay_id: &str) -> Result<ReplaySession, OtlpReplayError> {
        let tracker = self.replays.read().await.get(replay_id).cloned();
        match tracker {
            Some(tracker) => {
                tracker.done.cancelled().await;
                Ok(tracker.snapshot().await)
            }
            None => self.get_replay_status(replay_id).await,
        }
    }

    /// Decoded batches of one signal type in storage order, without pacing
    ///
    /// Nothing is read until the stream is polled, and each poll fetches one
    /// object. The stream ends after the first error.
    pub fn replay_data_stream(
        &self,
        session_id: &str,
        signal_type: SignalType,
    ) -> BoxStream<'static, Result<ReplayedBatch, OtlpReplayError>> {
        enum State {
            Start,
            Reading {
                format: PayloadFormat,
                pending: VecDeque<StoredObject>,
            },
            Done,
        }

        let objects = self.objects.clone();
        let sessions = self.sessions.clone();
        let session_id = session_id.to_string();

        futures::stream::unfold(State::Start, move |state| {
            let objects = objects.clone();
            let sessions = sessions.clone();
            let session_id = session_id.clone();
            async move {
                let (format, mut pending) = match state {
                    State::Done => return None,
                    State::Reading { format, pending } => (format, pending),
                    State::Start => {
                        let listed = async {
                            let capture = load_capture(sessions.as_ref(), &session_id).await?;
                            let listed =
                                list_objects(objects.as_ref(), &session_id, &[signal_type])
                                    .await
                                    .map_err(|source| OtlpReplayError::StorageFailure {
                                        session_id: session_id.clone(),
                                        source,
                                    })?;
                            Ok::<_, OtlpReplayError>((capture.payload_format, listed))
                        }
                        .await;
                        match listed {
                            Ok((format, listed)) => {
                                debug!(
                                    session_id = %session_id,
                                    signal_type = %signal_type,
                                    batches = listed.len(),
                                    "Opened replay data stream"
                                );
                                (format, VecDeque::from(listed))
                            }
                            Err(e) => return Some((Err(e), State::Done)),
                        }
                    }
                };

                let object = pending.pop_front()?;
                match fetch_batch(objects.as_ref(), &session_id, &object, format).await {
                    Ok(batch) => Some((Ok(batch), State::Reading { format, pending })),
                    Err(e) => Some((Err(e), State::Done)),
                }
            }
        })
        .boxed()
    }

    /// Cancel every running replay and wait for their final records
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let trackers: Vec<Arc<ReplayTracker>> =
            self.replays.read().await.values().cloned().collect();
        for tracker in trackers {
            tracker.done.cancelled().await;
        }
        info!("Replay manager shut down");
    }

    /// Number of replays whose pacer has not finished yet
    pub async fn running_count(&self) -> usize {
        self.replays.read().await.len()
    }

    async fn save(&self, session: &ReplaySession) -> Result<(), OtlpReplayError> {
        self.sessions
            .save_replay(session)
            .await
            .map_err(|source| OtlpReplayError::StorageFailure {
                session_id: session.session_id.clone(),
                source,
            })
    }
}

/// Record the outcome of a pacer run and release waiters
///
/// Returns whether the final record was persisted.
async fn finish_replay(
    tracker: &ReplayTracker,
    sessions: &dyn SessionStore,
    result: Result<(), OtlpReplayError>,
) -> bool {
    let processed = tracker.processed.load(Ordering::Acquire);
    let record = {
        let mut session = tracker.session.write().await;
        session.processed_records = processed;
        session.completed_at = Some(Utc::now());

        match result {
            _ if processed == session.total_records => {
                session.status = ReplayStatus::Completed;
                info!(
                    replay_id = %session.replay_id,
                    session_id = %session.session_id,
                    processed_records = processed,
                    "Replay completed"
                );
            }
            Err(e) => {
                session.status = ReplayStatus::Failed;
                session.failure_kind = Some(e.failure_kind());
                session.error = Some(e.to_string());
                error!(
                    replay_id = %session.replay_id,
                    session_id = %session.session_id,
                    processed_records = processed,
                    total_records = session.total_records,
                    error = %e,
                    "Replay failed"
                );
            }
            Ok(()) => {
                session.status = ReplayStatus::Failed;
                session.failure_kind = Some(crate::replay::ReplayFailureKind::Storage);
                session.error = Some(format!(
                    "stream ended after {} of {} records",
                    processed, session.total_records
                ));
                error!(
                    replay_id = %session.replay_id,
                    processed_records = processed,
                    total_records = session.total_records,
                    "Replay ended early"
                );
            }
        }
        session.clone()
    };

    let persisted = match sessions.save_replay(&record).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                replay_id = %record.replay_id,
                error = %e,
                "Failed to persist final replay record"
            );
            false
        }
    };
    tracker.done.cancel();
    persisted
}

async fn load_capture(
    sessions: &dyn SessionStore,
    session_id: &str,
) -> Result<CaptureSession, OtlpReplayError> {
    sessions
        .load_capture(session_id)
        .await
        .map_err(|source| OtlpReplayError::StorageFailure {
            session_id: session_id.to_string(),
            source,
        })?
        .ok_or_else(|| OtlpReplayError::SessionNotFound(session_id.to_string()))
}

/// Stored objects of a session for the given signals, in capture order
async fn list_objects(
    objects: &dyn ObjectStore,
    session_id: &str,
    signals: &[SignalType],
) -> Result<Vec<StoredObject>, OtlpStorageError> {
    let mut listed: Vec<StoredObject> = objects
        .list(&raw_prefix(session_id))
        .await?
        .into_iter()
        .filter_map(|key| match BatchKey::parse(&key) {
            Ok(batch) => Some(StoredObject { key, batch }),
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping unrecognised object in session");
                None
            }
        })
        .filter(|o| o.batch.session_id == session_id && signals.contains(&o.batch.signal_type))
        .collect();
    listed.sort_by(|a, b| {
        a.batch
            .captured_at
            .cmp(&b.batch.captured_at)
            .then_with(|| a.key.cmp(&b.key))
    });
    Ok(listed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureOptions, CaptureSessionManager};
    use crate::mock::MockIngestSink;
    use crate::storage::{InMemoryObjectStore, ObjectStoreSessionStore};
    use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;

    #[tokio::test]
    async fn test_finished_replays_leave_the_running_set() {
        let objects: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let sessions: Arc<dyn SessionStore> =
            Arc::new(ObjectStoreSessionStore::new(objects.clone()));
        let captures = CaptureSessionManager::new(objects.clone(), sessions.clone(), 6);
        captures
            .start_capture(CaptureOptions::new("cap-1"))
            .await
            .unwrap();
        captures
            .ingest_batch("cap-1", ExportTraceServiceRequest::default().into())
            .await
            .unwrap();
        captures.stop_capture("cap-1").await.unwrap();

        let sink = MockIngestSink::new();
        let manager = ReplaySessionManager::new(
            objects,
            sessions,
            Some(Arc::new(sink.clone())),
            DeliverySettings::default(),
        );

        let mut replay_ids = Vec::new();
        for _ in 0..5 {
            let replay = manager
                .start_replay(ReplayOptions::new("cap-1").with_speed(1000.0))
                .await
                .unwrap();
            manager.wait_for_replay(&replay.replay_id).await.unwrap();
            replay_ids.push(replay.replay_id);
        }

        // The pacer task drops its tracker right after releasing waiters
        for _ in 0..100 {
            if manager.running_count().await == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(manager.running_count().await, 0);

        for replay_id in &replay_ids {
            let status = manager.get_replay_status(replay_id).await.unwrap();
            assert_eq!(status.status, ReplayStatus::Completed);
            assert_eq!(status.processed_records, 1);
        }
        assert_eq!(manager.list_replays().await.unwrap().len(), 5);
        sink.assert_batches_received(5).await.unwrap();
    }
}
