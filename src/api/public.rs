//! Public API for embedded usage
//!
//! Wires configuration, stores, the capture and replay managers and the
//! periodic background tasks behind one handle.

use crate::capture::{
    CaptureOptions, CaptureSession, CaptureSessionManager, IngestReceipt, RetentionEnforcer,
    RetentionPolicy, RetentionReport,
};
use crate::config::{Config, StorageBackend};
use crate::error::{OtlpError, OtlpServerError};
use crate::otlp::{CaptureReceiver, OtlpPayload, SignalType};
use crate::replay::sink::sink_from_config;
use crate::replay::{
    DeliverySettings, IngestSink, ReplayOptions, ReplaySession, ReplaySessionManager,
    ReplayedBatch,
};
use crate::scheduler::TaskScheduler;
use crate::storage::{
    FileSystemObjectStore, InMemoryObjectStore, ObjectStore, ObjectStoreSessionStore,
    SessionStore,
};
use futures::stream::BoxStream;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Main engine instance for embedded usage
///
/// The `CaptureReplayEngine` records OTLP traces, metrics and logs into
/// compressed, time-partitioned storage and replays recorded sessions into an
/// ingestion sink at a controlled speed.
///
/// # Features
///
/// - **Capture Sessions**: Batches are written as they arrive under
///   `sessions/{id}/raw/{yyyy-MM-dd}/{HH}/{signal}-{unix_millis}-{uuid}.otlp[.gz]`
/// - **Paced Replay**: Recorded gaps are reproduced, scaled by a speed multiplier
/// - **Retention**: Old objects are deleted per signal type on a schedule
/// - **Checkpointing**: Live capture counters are persisted periodically
/// - **Capture Receiver**: Optional OTLP/gRPC endpoint feeding active sessions
///
/// # Example
///
/// ```no_run
/// use otlp_capture_replay::{CaptureOptions, CaptureReplayEngine, Config};
///
/// # async fn example() -> Result<(), otlp_capture_replay::OtlpError> {
/// let config = Config::default();
/// let engine = CaptureReplayEngine::new(config).await?;
///
/// let session = engine.start_capture(CaptureOptions::default()).await?;
/// // engine.ingest_batch(&session.session_id, request).await?;
/// engine.stop_capture(&session.session_id).await?;
///
/// // Shutdown gracefully
/// engine.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct CaptureReplayEngine {
    config: Config,
    captures: Arc<CaptureSessionManager>,
    replays: Arc<ReplaySessionManager>,
    retention: RetentionEnforcer,
    scheduler: Arc<TaskScheduler>,
    shutdown: CancellationToken,
    receiver_handle: Arc<Mutex<Option<JoinHandle<Result<(), OtlpError>>>>>,
}

impl CaptureReplayEngine {
    /// Create a new engine with the provided configuration
    ///
    /// Opens the configured storage backend, builds the ingestion sink if
    /// `ingest` is enabled, adopts capture sessions left active by a previous
    /// process and starts the checkpoint and retention tasks.
    ///
    /// # Arguments
    ///
    /// * `config` - Storage backend, compression, retention, replay delivery and
    ///   optional ingestion sink settings
    ///
    /// # Returns
    ///
    /// Returns `Ok(CaptureReplayEngine)` if initialization succeeds, or `Err(OtlpError)` if:
    /// - Configuration validation fails
    /// - The storage directory cannot be created
    /// - Stored session records cannot be read
    ///
    /// # Example
    ///
    /// ```no_run
    /// use otlp_capture_replay::{CaptureReplayEngine, Config};
    ///
    /// # async fn example() -> Result<(), otlp_capture_replay::OtlpError> {
    /// let config = Config::default();
    /// let engine = CaptureReplayEngine::new(config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(config: Config) -> Result<Self, OtlpError> {
        config.validate()?;

        let objects: Arc<dyn ObjectStore> = match config.storage_backend {
            StorageBackend::Filesystem => {
                Arc::new(FileSystemObjectStore::new(config.storage_dir.clone()).await?)
            }
            StorageBackend::Memory => Arc::new(InMemoryObjectStore::new()),
        };
        let sessions: Arc<dyn SessionStore> =
            Arc::new(ObjectStoreSessionStore::new(objects.clone()));
        let sink = match &config.ingest {
            Some(ingest) => sink_from_config(ingest)?,
            None => None,
        };

        Self::with_components(config, objects, sessions, sink).await
    }

    /// Create an engine over caller-provided stores and sink
    ///
    /// Used to embed the engine over another object store or to replay into
    /// an in-process sink such as [`crate::mock::MockIngestSink`]. The
    /// `storage_backend`, `storage_dir` and `ingest` settings are ignored.
    pub async fn with_components(
        config: Config,
        objects: Arc<dyn ObjectStore>,
        sessions: Arc<dyn SessionStore>,
        sink: Option<Arc<dyn IngestSink>>,
    ) -> Result<Self, OtlpError> {
        config.validate()?;

        let captures = Arc::new(CaptureSessionManager::new(
            objects.clone(),
            sessions.clone(),
            config.compression_level,
        ));
        let adopted = captures.adopt_active_sessions().await?;
        let replays = Arc::new(ReplaySessionManager::new(
            objects.clone(),
            sessions.clone(),
            sink,
            DeliverySettings::from(&config.replay),
        ));
        let retention = RetentionEnforcer::new(objects, sessions);
        let scheduler = Arc::new(TaskScheduler::new());

        // Start background checkpoint task
        let checkpoint_captures = captures.clone();
        scheduler
            .spawn_periodic("checkpoint", config.checkpoint_interval(), move || {
                let captures = checkpoint_captures.clone();
                async move {
                    captures.checkpoint().await;
                }
            })
            .await;

        // Start background retention task
        if config.retention.enabled {
            let policy = config.retention.policy();
            let retention_captures = captures.clone();
            let enforcer = retention.clone();
            scheduler
                .spawn_periodic("retention", config.retention.interval(), move || {
                    let captures = retention_captures.clone();
                    let enforcer = enforcer.clone();
                    async move {
                        let live: HashSet<String> =
                            captures.active_session_ids().await.into_iter().collect();
                        let report = enforcer.apply_retention_policy(&policy, &live).await;
                        if report.errors > 0 {
                            warn!(
                                errors = report.errors,
                                deleted = report.objects_deleted,
                                "Retention sweep finished with errors"
                            );
                        }
                    }
                })
                .await;
        }

        info!(
            storage_backend = ?config.storage_backend,
            adopted_sessions = adopted,
            retention_enabled = config.retention.enabled,
            "Capture/replay engine started"
        );

        Ok(Self {
            config,
            captures,
            replays,
            retention,
            scheduler,
            shutdown: CancellationToken::new(),
            receiver_handle: Arc::new(Mutex::new(None)),
        })
    }

    /// Create a configuration builder for programmatic configuration
    ///
    /// # Example
    ///
    /// ```no_run
    /// use otlp_capture_replay::CaptureReplayEngine;
    ///
    /// # async fn example() -> Result<(), otlp_capture_replay::OtlpError> {
    /// let config = CaptureReplayEngine::with_config_builder()
    ///     .storage_dir("./recordings")
    ///     .compression_level(9)
    ///     .build()?;
    /// let engine = CaptureReplayEngine::new(config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_config_builder() -> crate::config::ConfigBuilder {
        crate::config::ConfigBuilder::new()
    }

    /// Start a capture session
    ///
    /// When `options.session_id` is `None` a UUID is generated. The returned
    /// record is already persisted with status `active`.
    ///
    /// # Errors
    ///
    /// - `SessionAlreadyActive` / `SessionAlreadyExists` if the id is taken
    /// - `InvalidOptions` if no signal type is enabled or the id is not a
    ///   valid storage path segment
    pub async fn start_capture(&self, options: CaptureOptions) -> Result<CaptureSession, OtlpError> {
        Ok(self.captures.start_capture(options).await?)
    }

    /// Store one batch in an active capture session
    ///
    /// The batch is serialized, compressed when the session enables it, and
    /// written under its partition key before the session counters move.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use otlp_capture_replay::CaptureReplayEngine;
    /// use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
    ///
    /// # async fn example(engine: CaptureReplayEngine, request: ExportTraceServiceRequest) -> Result<(), otlp_capture_replay::OtlpError> {
    /// let receipt = engine.ingest_batch("cap-1", request).await?;
    /// println!("stored {} bytes at {}", receipt.size_bytes, receipt.key);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn ingest_batch(
        &self,
        session_id: &str,
        payload: impl Into<OtlpPayload>,
    ) -> Result<IngestReceipt, OtlpError> {
        Ok(self
            .captures
            .ingest_batch(session_id, payload.into())
            .await?)
    }

    /// Stop a capture session; stopping a stopped session returns its record
    pub async fn stop_capture(&self, session_id: &str) -> Result<CaptureSession, OtlpError> {
        Ok(self.captures.stop_capture(session_id).await?)
    }

    /// Mark an active capture session failed with a reason
    pub async fn fail_capture(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<CaptureSession, OtlpError> {
        Ok(self.captures.fail_capture(session_id, reason).await?)
    }

    /// Current record of a capture session, with live counters while active
    pub async fn get_capture_status(&self, session_id: &str) -> Result<CaptureSession, OtlpError> {
        Ok(self.captures.get_capture_status(session_id).await?)
    }

    /// Every known capture session, ordered by start time
    pub async fn list_capture_sessions(&self) -> Result<Vec<CaptureSession>, OtlpError> {
        Ok(self.captures.list_capture_sessions().await?)
    }

    /// Start replaying a stopped capture session into the configured sink
    ///
    /// Returns immediately with the replay record in `running` state; use
    /// [`CaptureReplayEngine::get_replay_status`] or
    /// [`CaptureReplayEngine::wait_for_replay`] to follow progress.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` if the capture session does not exist
    /// - `InvalidState` if the capture session is not stopped
    /// - `InvalidOptions` for a non-positive speed, signals the session did not
    ///   capture, or an engine without an ingestion sink
    ///
    /// # Example
    ///
    /// ```no_run
    /// use otlp_capture_replay::{CaptureReplayEngine, ReplayOptions};
    ///
    /// # async fn example(engine: CaptureReplayEngine) -> Result<(), otlp_capture_replay::OtlpError> {
    /// let replay = engine
    ///     .start_replay(ReplayOptions::new("cap-1").with_speed(2.0))
    ///     .await?;
    /// let finished = engine.wait_for_replay(&replay.replay_id).await?;
    /// println!("{:?}: {}/{}", finished.status, finished.processed_records, finished.total_records);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start_replay(&self, options: ReplayOptions) -> Result<ReplaySession, OtlpError> {
        Ok(self.replays.start_replay(options).await?)
    }

    /// Current record of a replay, with live progress while it runs
    pub async fn get_replay_status(&self, replay_id: &str) -> Result<ReplaySession, OtlpError> {
        Ok(self.replays.get_replay_status(replay_id).await?)
    }

    /// Stopped capture sessions that can be replayed
    pub async fn list_available_replays(&self) -> Result<Vec<CaptureSession>, OtlpError> {
        Ok(self.replays.list_available_replays().await?)
    }

    /// Every known replay, ordered by start time
    pub async fn list_replays(&self) -> Result<Vec<ReplaySession>, OtlpError> {
        Ok(self.replays.list_replays().await?)
    }

    /// Stop a running replay; returns its final record
    pub async fn cancel_replay(&self, replay_id: &str) -> Result<ReplaySession, OtlpError> {
        Ok(self.replays.cancel_replay(replay_id).await?)
    }

    /// Wait until a replay completes or fails
    pub async fn wait_for_replay(&self, replay_id: &str) -> Result<ReplaySession, OtlpError> {
        Ok(self.replays.wait_for_replay(replay_id).await?)
    }

    /// Decoded batches of one signal type in storage order, without pacing
    pub fn replay_data_stream(
        &self,
        session_id: &str,
        signal_type: SignalType,
    ) -> BoxStream<'static, Result<ReplayedBatch, crate::error::OtlpReplayError>> {
        self.replays.replay_data_stream(session_id, signal_type)
    }

    /// Run one retention sweep now
    ///
    /// Sessions recording in this process and sessions stored as active are
    /// never touched.
    pub async fn apply_retention_policy(&self, policy: &RetentionPolicy) -> RetentionReport {
        let live: HashSet<String> = self
            .captures
            .active_session_ids()
            .await
            .into_iter()
            .collect();
        self.retention.apply_retention_policy(policy, &live).await
    }

    /// Persist the live counters of every active capture session now
    pub async fn checkpoint(&self) -> usize {
        self.captures.checkpoint().await
    }

    /// Start the OTLP/gRPC capture receiver on the configured address
    pub async fn start_receiver(&self) -> Result<SocketAddr, OtlpError> {
        let addr = self.config.receiver.socket_addr()?;
        self.start_receiver_on(addr).await
    }

    /// Start the OTLP/gRPC capture receiver on `addr`
    ///
    /// Returns the bound address, which differs from `addr` when port 0 is
    /// used. The receiver runs until [`CaptureReplayEngine::shutdown`].
    pub async fn start_receiver_on(&self, addr: SocketAddr) -> Result<SocketAddr, OtlpError> {
        let mut guard = self.receiver_handle.lock().await;
        if guard.is_some() {
            return Err(OtlpServerError::StartupError(
                "capture receiver is already running".to_string(),
            )
            .into());
        }
        let receiver = CaptureReceiver::new(self.captures.clone());
        let (bound, handle) = receiver.start(addr, self.shutdown.child_token()).await?;
        *guard = Some(handle);
        Ok(bound)
    }

    /// Shutdown the engine gracefully
    ///
    /// Stops the receiver, cancels running replays and waits for their final
    /// records, stops the background tasks and writes a last checkpoint.
    /// Active capture sessions stay active and are adopted by the next engine
    /// opened over the same storage.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use otlp_capture_replay::CaptureReplayEngine;
    ///
    /// # async fn example(engine: CaptureReplayEngine) -> Result<(), otlp_capture_replay::OtlpError> {
    /// engine.shutdown().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn shutdown(&self) -> Result<(), OtlpError> {
        self.shutdown.cancel();
        let receiver = self.receiver_handle.lock().await.take();
        if let Some(handle) = receiver {
            handle
                .await
                .map_err(|e| OtlpServerError::ShutdownError(e.to_string()))??;
        }

        self.replays.shutdown().await;
        self.scheduler.shutdown().await;
        self.captures.checkpoint().await;

        info!("Capture/replay engine shutdown complete");
        Ok(())
    }

    /// Get a reference to the engine's configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
