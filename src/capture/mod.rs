//! Capture module
//!
//! Capture session records, the batch encoder, the session manager and the
//! retention enforcer.

use crate::otlp::{PayloadFormat, SignalType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub mod encoder;
pub mod manager;
pub mod retention;

pub use encoder::{BatchDecodeError, BatchEncodeError, BatchEncoder, encode_batch};
pub use manager::CaptureSessionManager;
pub use retention::{RetentionEnforcer, RetentionPolicy, RetentionReport};

/// Lifecycle status of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    /// Accepting batches
    Active,
    /// Finished normally; eligible for replay
    Stopped,
    /// Abandoned
    Failed,
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptureStatus::Active => "active",
            CaptureStatus::Stopped => "stopped",
            CaptureStatus::Failed => "failed",
        })
    }
}

/// Options for starting a capture session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    /// Caller-chosen id; a UUID is assigned when absent
    pub session_id: Option<String>,
    /// Free-form description
    pub description: String,
    /// Feature flags active during the capture, for correlation only
    pub enabled_flags: BTreeSet<String>,
    /// Record traces
    pub capture_traces: bool,
    /// Record metrics
    pub capture_metrics: bool,
    /// Record logs
    pub capture_logs: bool,
    /// Gzip stored batches
    pub compression_enabled: bool,
    /// Serialization of stored batches
    pub payload_format: PayloadFormat,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            description: String::new(),
            enabled_flags: BTreeSet::new(),
            capture_traces: true,
            capture_metrics: true,
            capture_logs: true,
            compression_enabled: true,
            payload_format: PayloadFormat::default(),
        }
    }
}

impl CaptureOptions {
    /// Options recording every signal type under `session_id`
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    /// Options recording only the given signal types
    pub fn for_signals(session_id: impl Into<String>, signals: &[SignalType]) -> Self {
        Self {
            session_id: Some(session_id.into()),
            capture_traces: signals.contains(&SignalType::Traces),
            capture_metrics: signals.contains(&SignalType::Metrics),
            capture_logs: signals.contains(&SignalType::Logs),
            ..Self::default()
        }
    }
}

/// Identity and accounting for one recording run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSession {
    /// Unique session id
    pub session_id: String,
    /// Free-form description
    pub description: String,
    /// Feature flags active during the capture
    pub enabled_flags: BTreeSet<String>,
    /// Whether traces are recorded
    pub capture_traces: bool,
    /// Whether metrics are recorded
    pub capture_metrics: bool,
    /// Whether logs are recorded
    pub capture_logs: bool,
    /// Whether stored batches are gzip-compressed
    pub compression_enabled: bool,
    /// Serialization of stored batches
    #[serde(default)]
    pub payload_format: PayloadFormat,
    /// Lifecycle status
    pub status: CaptureStatus,
    /// Stored trace batches
    pub captured_traces: u64,
    /// Stored metric batches
    pub captured_metrics: u64,
    /// Stored log batches
    pub captured_logs: u64,
    /// Sum of stored object sizes
    pub total_size_bytes: u64,
    /// Batches that failed to encode or store
    #[serde(default)]
    pub failed_batches: u64,
    /// Most recent per-batch failure
    #[serde(default)]
    pub last_error: Option<String>,
    /// When recording began
    pub started_at: DateTime<Utc>,
    /// When recording stopped or failed
    pub stopped_at: Option<DateTime<Utc>>,
}

impl CaptureSession {
    /// Whether the session records this signal type
    pub fn captures(&self, signal_type: SignalType) -> bool {
        match signal_type {
            SignalType::Traces => self.capture_traces,
            SignalType::Metrics => self.capture_metrics,
            SignalType::Logs => self.capture_logs,
        }
    }

    /// Stored batch count for a signal type
    pub fn captured(&self, signal_type: SignalType) -> u64 {
        match signal_type {
            SignalType::Traces => self.captured_traces,
            SignalType::Metrics => self.captured_metrics,
            SignalType::Logs => self.captured_logs,
        }
    }

    /// Signal types this session records
    pub fn signal_types(&self) -> Vec<SignalType> {
        SignalType::ALL
            .into_iter()
            .filter(|s| self.captures(*s))
            .collect()
    }
}

/// Result of a successful ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    /// Object store key of the stored batch
    pub key: String,
    /// Stored size in bytes
    pub size_bytes: u64,
}
