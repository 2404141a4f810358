//! Session record persistence
//!
//! Capture and replay session records sit behind [`SessionStore`] so the
//! managers never keep a process-global registry of their own.

use crate::capture::CaptureSession;
use crate::error::OtlpStorageError;
use crate::replay::ReplaySession;
use crate::storage::keys::{self, REPLAYS_PREFIX, SESSIONS_PREFIX};
use crate::storage::ObjectStore;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::warn;

/// Persistence for capture and replay session records
#[async_trait]
pub trait SessionStore: Send + Sync + std::fmt::Debug {
    /// Load a capture session record
    async fn load_capture(&self, session_id: &str)
    -> Result<Option<CaptureSession>, OtlpStorageError>;

    /// Create or replace a capture session record
    async fn save_capture(&self, session: &CaptureSession) -> Result<(), OtlpStorageError>;

    /// All readable capture session records
    async fn list_captures(&self) -> Result<Vec<CaptureSession>, OtlpStorageError>;

    /// Load a replay session record
    async fn load_replay(&self, replay_id: &str)
    -> Result<Option<ReplaySession>, OtlpStorageError>;

    /// Create or replace a replay session record
    async fn save_replay(&self, replay: &ReplaySession) -> Result<(), OtlpStorageError>;

    /// All readable replay session records
    async fn list_replays(&self) -> Result<Vec<ReplaySession>, OtlpStorageError>;
}

/// Session store keeping JSON records next to the batch objects
///
/// Capture metadata lives at `sessions/{id}/metadata.json`, replay records at
/// `replays/{replay_id}.json`.
#[derive(Debug, Clone)]
pub struct ObjectStoreSessionStore {
    objects: Arc<dyn ObjectStore>,
}

impl ObjectStoreSessionStore {
    /// Create a session store over an object store
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, OtlpStorageError> {
        let bytes = match self.objects.get(key).await {
            Ok(bytes) => bytes,
            Err(OtlpStorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| OtlpStorageError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn save<T: Serialize + Sync>(&self, key: &str, record: &T) -> Result<(), OtlpStorageError> {
        let bytes =
            serde_json::to_vec_pretty(record).map_err(|e| OtlpStorageError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        self.objects.put(key, bytes).await
    }

    async fn load_all<T: DeserializeOwned>(
        &self,
        keys: impl IntoIterator<Item = String>,
    ) -> Vec<T> {
        let mut records = Vec::new();
        for key in keys {
            match self.load::<T>(&key).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable session record"),
            }
        }
        records
    }
}

#[async_trait]
impl SessionStore for ObjectStoreSessionStore {
    async fn load_capture(
        &self,
        session_id: &str,
    ) -> Result<Option<CaptureSession>, OtlpStorageError> {
        self.load(&keys::metadata_key(session_id)).await
    }

    async fn save_capture(&self, session: &CaptureSession) -> Result<(), OtlpStorageError> {
        self.save(&keys::metadata_key(&session.session_id), session)
            .await
    }

    async fn list_captures(&self) -> Result<Vec<CaptureSession>, OtlpStorageError> {
        // One metadata lookup per session directory, never per batch object
        let session_dirs = self.objects.list_prefixes(SESSIONS_PREFIX).await?;
        let mut sessions: Vec<CaptureSession> = self
            .load_all(
                session_dirs
                    .into_iter()
                    .map(|dir| format!("{}{}", dir, keys::METADATA_FILE)),
            )
            .await;
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(sessions)
    }

    async fn load_replay(&self, replay_id: &str) -> Result<Option<ReplaySession>, OtlpStorageError> {
        self.load(&keys::replay_key(replay_id)).await
    }

    async fn save_replay(&self, replay: &ReplaySession) -> Result<(), OtlpStorageError> {
        self.save(&keys::replay_key(&replay.replay_id), replay).await
    }

    async fn list_replays(&self) -> Result<Vec<ReplaySession>, OtlpStorageError> {
        let keys = self.objects.list(REPLAYS_PREFIX).await?;
        let mut replays: Vec<ReplaySession> = self.load_all(keys).await;
        replays.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(replays)
    }
}
