//! Capture session manager
//!
//! Owns the lifecycle of capture sessions and the live counters of the ones
//! that are recording. Session records are persisted through a
//! [`SessionStore`]; this manager only keeps per-process state.
//!
//! Each active session carries a state gate. Ingests hold it shared while
//! encoding and storing, so they run in parallel; stopping takes it
//! exclusively, which waits for accepted ingests and keeps a checkpoint from
//! ever overwriting a finished record.

use crate::capture::{BatchEncoder, CaptureOptions, CaptureSession, CaptureStatus, IngestReceipt};
use crate::error::OtlpCaptureError;
use crate::otlp::{OtlpPayload, SignalType};
use crate::storage::keys::validate_session_id;
use crate::storage::{ObjectStore, SessionStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Live state of one recording session
#[derive(Debug)]
struct ActiveCapture {
    /// Record as started; counters and status are overlaid from the fields below
    header: CaptureSession,
    captured_traces: AtomicU64,
    captured_metrics: AtomicU64,
    captured_logs: AtomicU64,
    total_size_bytes: AtomicU64,
    failed_batches: AtomicU64,
    last_error: Mutex<Option<String>>,
    state: RwLock<CaptureStatus>,
}

impl ActiveCapture {
    fn new(session: CaptureSession) -> Self {
        Self {
            captured_traces: AtomicU64::new(session.captured_traces),
            captured_metrics: AtomicU64::new(session.captured_metrics),
            captured_logs: AtomicU64::new(session.captured_logs),
            total_size_bytes: AtomicU64::new(session.total_size_bytes),
            failed_batches: AtomicU64::new(session.failed_batches),
            last_error: Mutex::new(session.last_error.clone()),
            state: RwLock::new(CaptureStatus::Active),
            header: session,
        }
    }

    fn counter(&self, signal_type: SignalType) -> &AtomicU64 {
        match signal_type {
            SignalType::Traces => &self.captured_traces,
            SignalType::Metrics => &self.captured_metrics,
            SignalType::Logs => &self.captured_logs,
        }
    }

    async fn snapshot(&self, status: CaptureStatus) -> CaptureSession {
        CaptureSession {
            status,
            captured_traces: self.captured_traces.load(Ordering::Acquire),
            captured_metrics: self.captured_metrics.load(Ordering::Acquire),
            captured_logs: self.captured_logs.load(Ordering::Acquire),
            total_size_bytes: self.total_size_bytes.load(Ordering::Acquire),
            failed_batches: self.failed_batches.load(Ordering::Acquire),
            last_error: self.last_error.lock().await.clone(),
            ..self.header.clone()
        }
    }
}

enum Resolved {
    Active(Arc<ActiveCapture>),
    Finished(CaptureSession),
}

/// Manages capture session lifecycle and batch ingestion
#[derive(Debug)]
pub struct CaptureSessionManager {
    sessions: Arc<dyn SessionStore>,
    encoder: BatchEncoder,
    active: RwLock<HashMap<String, Arc<ActiveCapture>>>,
}

impl CaptureSessionManager {
    /// Create a manager storing batches in `objects` and records in `sessions`
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        sessions: Arc<dyn SessionStore>,
        compression_level: u32,
    ) -> Self {
        Self {
            sessions,
            encoder: BatchEncoder::new(objects, compression_level),
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Start recording a new capture session
    pub async fn start_capture(
        &self,
        options: CaptureOptions,
    ) -> Result<CaptureSession, OtlpCaptureError> {
        if !(options.capture_traces || options.capture_metrics || options.capture_logs) {
            return Err(OtlpCaptureError::InvalidOptions(
                "at least one signal type must be captured".to_string(),
            ));
        }
        let session_id = options
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        validate_session_id(&session_id).map_err(OtlpCaptureError::InvalidOptions)?;

        let mut active = self.active.write().await;
        if active.contains_key(&session_id) {
            return Err(OtlpCaptureError::SessionAlreadyActive(session_id));
        }
        match self.load(&session_id).await? {
            Some(existing) if existing.status == CaptureStatus::Active => {
                return Err(OtlpCaptureError::SessionAlreadyActive(session_id));
            }
            Some(_) => return Err(OtlpCaptureError::SessionAlreadyExists(session_id)),
            None => {}
        }

        let session = CaptureSession {
            session_id: session_id.clone(),
            description: options.description,
            enabled_flags: options.enabled_flags,
            capture_traces: options.capture_traces,
            capture_metrics: options.capture_metrics,
            capture_logs: options.capture_logs,
            compression_enabled: options.compression_enabled,
            payload_format: options.payload_format,
            status: CaptureStatus::Active,
            captured_traces: 0,
            captured_metrics: 0,
            captured_logs: 0,
            total_size_bytes: 0,
            failed_batches: 0,
            last_error: None,
            started_at: Utc::now(),
            stopped_at: None,
        };
        self.save(&session).await?;
        active.insert(session_id.clone(), Arc::new(ActiveCapture::new(session.clone())));

        info!(
            session_id = %session_id,
            signals = ?session.signal_types(),
            compression = session.compression_enabled,
            "Started capture session"
        );
        Ok(session)
    }

    /// Encode, store and count one batch for an active session
    pub async fn ingest_batch(
        &self,
        session_id: &str,
        payload: OtlpPayload,
    ) -> Result<IngestReceipt, OtlpCaptureError> {
        match self.resolve(session_id).await? {
            Resolved::Active(capture) => self.ingest_into(&capture, &payload).await,
            Resolved::Finished(session) => Err(OtlpCaptureError::InvalidState {
                session_id: session.session_id,
                status: session.status,
            }),
        }
    }

    /// Ingest one batch into every active session recording its signal type
    ///
    /// Returns the number of sessions that stored the batch. When any session
    /// fails the first error is returned after all sessions were attempted.
    pub async fn ingest_into_active(&self, payload: OtlpPayload) -> Result<usize, OtlpCaptureError> {
        let signal_type = payload.signal_type();
        let targets: Vec<Arc<ActiveCapture>> = self
            .active
            .read()
            .await
            .values()
            .filter(|c| c.header.captures(signal_type))
            .cloned()
            .collect();

        let mut stored = 0;
        let mut first_error = None;
        for capture in targets {
            match self.ingest_into(&capture, &payload).await {
                Ok(_) => stored += 1,
                // Stopped between listing and ingesting
                Err(OtlpCaptureError::InvalidState { .. }) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(stored),
        }
    }

    async fn ingest_into(
        &self,
        capture: &ActiveCapture,
        payload: &OtlpPayload,
    ) -> Result<IngestReceipt, OtlpCaptureError> {
        let session_id = &capture.header.session_id;
        let signal_type = payload.signal_type();
        if !capture.header.captures(signal_type) {
            return Err(OtlpCaptureError::SignalNotCaptured {
                session_id: session_id.clone(),
                signal_type,
            });
        }

        let state = capture.state.read().await;
        if *state != CaptureStatus::Active {
            return Err(OtlpCaptureError::InvalidState {
                session_id: session_id.clone(),
                status: *state,
            });
        }

        match self
            .encoder
            .store_batch(&capture.header, payload, Utc::now())
            .await
        {
            Ok(receipt) => {
                capture.counter(signal_type).fetch_add(1, Ordering::AcqRel);
                capture
                    .total_size_bytes
                    .fetch_add(receipt.size_bytes, Ordering::AcqRel);
                debug!(
                    session_id = %session_id,
                    signal_type = %signal_type,
                    items = payload.item_count(),
                    size_bytes = receipt.size_bytes,
                    "Captured batch"
                );
                Ok(receipt)
            }
            Err(e) => {
                capture.failed_batches.fetch_add(1, Ordering::AcqRel);
                *capture.last_error.lock().await = Some(e.to_string());
                warn!(
                    session_id = %session_id,
                    signal_type = %signal_type,
                    error = %e,
                    "Failed to capture batch"
                );
                Err(e)
            }
        }
    }

    /// Stop an active session
    ///
    /// Stopping a session that is already stopped returns its stored record.
    pub async fn stop_capture(&self, session_id: &str) -> Result<CaptureSession, OtlpCaptureError> {
        self.finish(session_id, CaptureStatus::Stopped, None).await
    }

    /// Mark an active session as failed
    pub async fn fail_capture(
        &self,
        session_id: &str,
        reason: impl Into<String>,
    ) -> Result<CaptureSession, OtlpCaptureError> {
        self.finish(session_id, CaptureStatus::Failed, Some(reason.into()))
            .await
    }

    async fn finish(
        &self,
        session_id: &str,
        target: CaptureStatus,
        reason: Option<String>,
    ) -> Result<CaptureSession, OtlpCaptureError> {
        let capture = match self.resolve(session_id).await? {
            Resolved::Active(capture) => capture,
            Resolved::Finished(session) if session.status == target && reason.is_none() => {
                return Ok(session);
            }
            Resolved::Finished(session) => {
                return Err(OtlpCaptureError::InvalidState {
                    session_id: session.session_id,
                    status: session.status,
                });
            }
        };

        let mut state = capture.state.write().await;
        if *state != CaptureStatus::Active {
            // Lost a race with another stop/fail; report what it persisted
            let status = *state;
            drop(state);
            return match self.load(session_id).await? {
                Some(session) if status == target && reason.is_none() => Ok(session),
                _ => Err(OtlpCaptureError::InvalidState {
                    session_id: session_id.to_string(),
                    status,
                }),
            };
        }

        if let Some(reason) = &reason {
            *capture.last_error.lock().await = Some(reason.clone());
        }
        let mut record = capture.snapshot(target).await;
        record.stopped_at = Some(Utc::now());
        self.save(&record).await?;
        *state = target;
        drop(state);

        self.active.write().await.remove(session_id);
        info!(
            session_id = %session_id,
            status = %target,
            traces = record.captured_traces,
            metrics = record.captured_metrics,
            logs = record.captured_logs,
            total_size_bytes = record.total_size_bytes,
            "Capture session finished"
        );
        Ok(record)
    }

    /// Current record of a session, with live counters while it is active
    pub async fn get_capture_status(
        &self,
        session_id: &str,
    ) -> Result<CaptureSession, OtlpCaptureError> {
        let live = self.active.read().await.get(session_id).cloned();
        if let Some(capture) = live {
            let status = *capture.state.read().await;
            if status == CaptureStatus::Active {
                return Ok(capture.snapshot(status).await);
            }
        }
        self.load(session_id)
            .await?
            .ok_or_else(|| OtlpCaptureError::SessionNotFound(session_id.to_string()))
    }

    /// All capture sessions ordered by start time
    pub async fn list_capture_sessions(&self) -> Result<Vec<CaptureSession>, OtlpCaptureError> {
        let mut sessions = self
            .sessions
            .list_captures()
            .await
            .map_err(|source| OtlpCaptureError::StorageFailure {
                session_id: None,
                source,
            })?;

        let live: Vec<Arc<ActiveCapture>> = self.active.read().await.values().cloned().collect();
        for capture in live {
            let status = *capture.state.read().await;
            if status != CaptureStatus::Active {
                continue;
            }
            let snapshot = capture.snapshot(status).await;
            match sessions
                .iter_mut()
                .find(|s| s.session_id == snapshot.session_id)
            {
                Some(stored) if stored.status == CaptureStatus::Active => *stored = snapshot,
                Some(_) => {}
                None => sessions.push(snapshot),
            }
        }
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(sessions)
    }

    /// Ids of the sessions currently recording in this process
    pub async fn active_session_ids(&self) -> Vec<String> {
        self.active.read().await.keys().cloned().collect()
    }

    /// Persist the live counters of every active session
    ///
    /// Returns the number of sessions written. Failures are logged and
    /// skipped; the next checkpoint retries them.
    pub async fn checkpoint(&self) -> usize {
        let live: Vec<Arc<ActiveCapture>> = self.active.read().await.values().cloned().collect();
        let mut written = 0;
        for capture in live {
            let state = capture.state.read().await;
            if *state != CaptureStatus::Active {
                continue;
            }
            let snapshot = capture.snapshot(*state).await;
            match self.sessions.save_capture(&snapshot).await {
                Ok(()) => written += 1,
                Err(e) => warn!(
                    session_id = %snapshot.session_id,
                    error = %e,
                    "Failed to checkpoint capture session"
                ),
            }
        }
        debug!(sessions = written, "Checkpointed capture sessions");
        written
    }

    /// Load every stored session still marked active into memory
    ///
    /// Used after a restart so the receiver keeps recording into them.
    pub async fn adopt_active_sessions(&self) -> Result<usize, OtlpCaptureError> {
        let stored = self
            .sessions
            .list_captures()
            .await
            .map_err(|source| OtlpCaptureError::StorageFailure {
                session_id: None,
                source,
            })?;

        let mut active = self.active.write().await;
        let mut adopted = 0;
        for session in stored {
            if session.status == CaptureStatus::Active && !active.contains_key(&session.session_id)
            {
                info!(session_id = %session.session_id, "Adopted active capture session");
                active.insert(
                    session.session_id.clone(),
                    Arc::new(ActiveCapture::new(session)),
                );
                adopted += 1;
            }
        }
        Ok(adopted)
    }

    async fn resolve(&self, session_id: &str) -> Result<Resolved, OtlpCaptureError> {
        if let Some(capture) = self.active.read().await.get(session_id) {
            return Ok(Resolved::Active(capture.clone()));
        }

        let session = self
            .load(session_id)
            .await?
            .ok_or_else(|| OtlpCaptureError::SessionNotFound(session_id.to_string()))?;
        if session.status != CaptureStatus::Active {
            return Ok(Resolved::Finished(session));
        }

        let mut active = self.active.write().await;
        let capture = active
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!(session_id = %session_id, "Adopted active capture session");
                Arc::new(ActiveCapture::new(session))
            })
            .clone();
        Ok(Resolved::Active(capture))
    }

    async fn load(&self, session_id: &str) -> Result<Option<CaptureSession>, OtlpCaptureError> {
        self.sessions
            .load_capture(session_id)
            .await
            .map_err(|source| OtlpCaptureError::StorageFailure {
                session_id: Some(session_id.to_string()),
                source,
            })
    }

    async fn save(&self, session: &CaptureSession) -> Result<(), OtlpCaptureError> {
        self.sessions
            .save_capture(session)
            .await
            .map_err(|source| OtlpCaptureError::StorageFailure {
                session_id: Some(session.session_id.clone()),
                source,
            })
    }
}
