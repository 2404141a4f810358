//! Replay module
//!
//! Replay session records, the ingestion sinks replayed batches are delivered
//! to, the pacer that times delivery, and the session manager.

use crate::otlp::{OtlpPayload, SignalType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod manager;
pub mod pacer;
pub mod sink;

pub use manager::ReplaySessionManager;
pub use pacer::{DeliverySettings, ReplayPacer};
pub use sink::{GrpcIngestSink, HttpIngestSink, IngestSink, IngestSinkError};

/// How replayed timestamps relate to the recorded ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampAdjustment {
    /// Emit recorded timestamps unchanged
    #[default]
    Original,
    /// Shift timestamps so the first record lands at replay start
    Current,
}

/// Lifecycle status of a replay session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    /// Created, pacer not yet running
    Pending,
    /// Delivering batches
    Running,
    /// Every record was delivered
    Completed,
    /// Stopped before every record was delivered
    Failed,
}

impl ReplayStatus {
    /// Whether the replay has finished one way or the other
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplayStatus::Completed | ReplayStatus::Failed)
    }
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReplayStatus::Pending => "pending",
            ReplayStatus::Running => "running",
            ReplayStatus::Completed => "completed",
            ReplayStatus::Failed => "failed",
        })
    }
}

/// Classification of a failed replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayFailureKind {
    /// Stored data is unusable
    DataCorrupted,
    /// Stored data failed to inflate
    Decompression,
    /// The sink rejected a batch, timed out, or a batch disappeared
    Ingestion,
    /// The object store could not be read
    Storage,
    /// Cancelled by the caller or by shutdown
    Cancelled,
}

/// Options for starting a replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayOptions {
    /// Capture session to replay
    pub session_id: String,
    /// Pacing relative to the original capture; 2.0 replays twice as fast
    pub speed_multiplier: f64,
    /// Replay trace batches
    pub replay_traces: bool,
    /// Replay metric batches
    pub replay_metrics: bool,
    /// Replay log batches
    pub replay_logs: bool,
    /// Timestamp rewriting mode
    pub timestamp_adjustment: TimestampAdjustment,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            speed_multiplier: 1.0,
            replay_traces: true,
            replay_metrics: true,
            replay_logs: true,
            timestamp_adjustment: TimestampAdjustment::default(),
        }
    }
}

impl ReplayOptions {
    /// Options replaying every signal type at original speed
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Options replaying only the given signal types at original speed
    pub fn for_signals(session_id: impl Into<String>, signals: &[SignalType]) -> Self {
        Self {
            session_id: session_id.into(),
            replay_traces: signals.contains(&SignalType::Traces),
            replay_metrics: signals.contains(&SignalType::Metrics),
            replay_logs: signals.contains(&SignalType::Logs),
            ..Self::default()
        }
    }

    /// Set the speed multiplier
    pub fn with_speed(mut self, speed_multiplier: f64) -> Self {
        self.speed_multiplier = speed_multiplier;
        self
    }

    /// Set the timestamp adjustment
    pub fn with_timestamp_adjustment(mut self, adjustment: TimestampAdjustment) -> Self {
        self.timestamp_adjustment = adjustment;
        self
    }

    /// Signal types requested for replay
    pub fn signal_types(&self) -> Vec<SignalType> {
        SignalType::ALL
            .into_iter()
            .filter(|s| match s {
                SignalType::Traces => self.replay_traces,
                SignalType::Metrics => self.replay_metrics,
                SignalType::Logs => self.replay_logs,
            })
            .collect()
    }
}

/// One playback run of a stopped capture session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySession {
    /// Unique replay id
    pub replay_id: String,
    /// Capture session being replayed
    pub session_id: String,
    /// Pacing relative to the original capture
    pub speed_multiplier: f64,
    /// Whether traces are replayed
    pub replay_traces: bool,
    /// Whether metrics are replayed
    pub replay_metrics: bool,
    /// Whether logs are replayed
    pub replay_logs: bool,
    /// Timestamp rewriting mode
    pub timestamp_adjustment: TimestampAdjustment,
    /// Lifecycle status
    pub status: ReplayStatus,
    /// Stored batch objects selected for replay
    pub total_records: u64,
    /// Batches acknowledged by the sink
    pub processed_records: u64,
    /// When the replay was created
    pub started_at: DateTime<Utc>,
    /// When the replay reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Last error on a failed replay
    pub error: Option<String>,
    /// Classification of the failure
    pub failure_kind: Option<ReplayFailureKind>,
}

/// One decoded batch read back from storage
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayedBatch {
    /// Object store key the batch was read from
    pub key: String,
    /// Capture wall-clock time
    pub captured_at: DateTime<Utc>,
    /// Decoded payload
    pub payload: OtlpPayload,
}
