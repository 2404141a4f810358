//! Retention enforcement
//!
//! Deletes stored batch objects older than a per-signal-type window. Age is
//! taken from the capture time embedded in each key. Sessions that are still
//! recording are never touched.

use crate::capture::CaptureStatus;
use crate::otlp::SignalType;
use crate::storage::keys::{self, SESSIONS_PREFIX};
use crate::storage::{BatchKey, ObjectStore, SessionStore};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum age per signal type; `None` keeps data forever
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Trace batch retention
    pub traces: Option<Duration>,
    /// Metric batch retention
    pub metrics: Option<Duration>,
    /// Log batch retention
    pub logs: Option<Duration>,
}

impl RetentionPolicy {
    /// Same window for every signal type
    pub fn uniform(max_age: Duration) -> Self {
        Self {
            traces: Some(max_age),
            metrics: Some(max_age),
            logs: Some(max_age),
        }
    }

    /// Window for one signal type
    pub fn max_age(&self, signal_type: SignalType) -> Option<Duration> {
        match signal_type {
            SignalType::Traces => self.traces,
            SignalType::Metrics => self.metrics,
            SignalType::Logs => self.logs,
        }
    }
}

/// Outcome of one retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Sessions with stored batches
    pub sessions_scanned: usize,
    /// Sessions left alone because they are recording
    pub sessions_skipped_active: usize,
    /// Batch objects examined
    pub objects_scanned: usize,
    /// Batch objects removed
    pub objects_deleted: usize,
    /// Delete or metadata failures that were skipped
    pub errors: usize,
}

/// Applies retention policies to the object store
#[derive(Debug, Clone)]
pub struct RetentionEnforcer {
    objects: Arc<dyn ObjectStore>,
    sessions: Arc<dyn SessionStore>,
}

impl RetentionEnforcer {
    /// Create an enforcer over the given stores
    pub fn new(objects: Arc<dyn ObjectStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { objects, sessions }
    }

    /// Delete batches older than the policy allows, as of now
    pub async fn apply_retention_policy(
        &self,
        policy: &RetentionPolicy,
        live_sessions: &HashSet<String>,
    ) -> RetentionReport {
        self.apply_retention_policy_at(policy, live_sessions, Utc::now())
            .await
    }

    /// Delete batches older than the policy allows, as of `now`
    ///
    /// `live_sessions` are ids known to be recording in this process; they are
    /// skipped in addition to any session whose stored status is active.
    pub async fn apply_retention_policy_at(
        &self,
        policy: &RetentionPolicy,
        live_sessions: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> RetentionReport {
        let mut report = RetentionReport::default();

        let stored_keys = match self.objects.list(SESSIONS_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Retention pass could not list stored objects");
                report.errors += 1;
                return report;
            }
        };

        let mut by_session: BTreeMap<String, Vec<(String, BatchKey)>> = BTreeMap::new();
        for key in stored_keys {
            if keys::is_metadata_key(&key) {
                continue;
            }
            match BatchKey::parse(&key) {
                Ok(batch) => by_session
                    .entry(batch.session_id.clone())
                    .or_default()
                    .push((key, batch)),
                Err(e) => debug!(key = %key, error = %e, "Ignoring unrecognised object"),
            }
        }

        for (session_id, batches) in by_session {
            report.sessions_scanned += 1;

            if live_sessions.contains(&session_id) {
                report.sessions_skipped_active += 1;
                continue;
            }
            match self.sessions.load_capture(&session_id).await {
                Ok(Some(session)) if session.status == CaptureStatus::Active => {
                    report.sessions_skipped_active += 1;
                    continue;
                }
                // Orphaned batches without metadata are eligible
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        error = %e,
                        "Skipping session with unreadable metadata"
                    );
                    report.errors += 1;
                    continue;
                }
            }

            for (key, batch) in batches {
                report.objects_scanned += 1;
                let Some(max_age) = policy.max_age(batch.signal_type) else {
                    continue;
                };
                let age = now
                    .signed_duration_since(batch.captured_at)
                    .to_std()
                    .unwrap_or_default();
                if age <= max_age {
                    continue;
                }

                match self.objects.delete(&key).await {
                    Ok(()) => {
                        report.objects_deleted += 1;
                        debug!(key = %key, age_secs = age.as_secs(), "Deleted expired batch");
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to delete expired batch");
                        report.errors += 1;
                    }
                }
            }
        }

        info!(
            sessions_scanned = report.sessions_scanned,
            sessions_skipped_active = report.sessions_skipped_active,
            objects_scanned = report.objects_scanned,
            objects_deleted = report.objects_deleted,
            errors = report.errors,
            "Retention pass complete"
        );
        report
    }
}
