//! Error types for the OTLP capture/replay engine
//!
//! Defines all error types used throughout the library with clear error messages
//! and context for debugging.

use thiserror::Error;

use crate::capture::CaptureStatus;
use crate::otlp::SignalType;
use crate::replay::ReplayFailureKind;

/// Main error type for the capture/replay engine
#[derive(Error, Debug)]
pub enum OtlpError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] OtlpConfigError),

    /// Capture session errors
    #[error("Capture error: {0}")]
    Capture(#[from] OtlpCaptureError),

    /// Replay session errors
    #[error("Replay error: {0}")]
    Replay(#[from] OtlpReplayError),

    /// Object store errors
    #[error("Storage error: {0}")]
    Storage(#[from] OtlpStorageError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Server-related errors
    #[error("Server error: {0}")]
    Server(#[from] OtlpServerError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum OtlpConfigError {
    /// Invalid storage directory path
    #[error("Invalid storage directory: {0}")]
    InvalidStorageDir(String),

    /// Invalid interval value
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// Missing required configuration field
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    /// Invalid URL format
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Object store errors
#[derive(Error, Debug)]
pub enum OtlpStorageError {
    /// No object stored under the key
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Key cannot be mapped onto the backend or parsed as a batch key
    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey {
        /// Offending key
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// Backend I/O failure
    #[error("I/O failure on '{key}': {source}")]
    Io {
        /// Key being accessed
        key: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Session record could not be (de)serialized
    #[error("Serialization failure for '{key}': {reason}")]
    Serialization {
        /// Key of the record
        key: String,
        /// Underlying error message
        reason: String,
    },
}

/// OTLP codec errors
#[derive(Error, Debug)]
pub enum OtlpCodecError {
    /// Bytes are not a structurally valid payload for the signal type
    #[error("Corrupt {signal_type} payload: {reason}")]
    Corrupt {
        /// Signal type being decoded
        signal_type: SignalType,
        /// Decoder message
        reason: String,
    },

    /// Payload could not be serialized
    #[error("Failed to encode {signal_type} payload: {reason}")]
    Encode {
        /// Signal type being encoded
        signal_type: SignalType,
        /// Encoder message
        reason: String,
    },
}

/// Capture session errors
#[derive(Error, Debug)]
pub enum OtlpCaptureError {
    /// No capture session with this id
    #[error("Capture session not found: {0}")]
    SessionNotFound(String),

    /// A session with this id is currently recording
    #[error("Capture session already active: {0}")]
    SessionAlreadyActive(String),

    /// The id belongs to a finished session; ids are never reused
    #[error("Capture session id already used: {0}")]
    SessionAlreadyExists(String),

    /// Operation not allowed in the session's current status
    #[error("Capture session {session_id} is {status}")]
    InvalidState {
        /// Session id
        session_id: String,
        /// Current status
        status: CaptureStatus,
    },

    /// The session does not record this signal type
    #[error("Capture session {session_id} does not capture {signal_type}")]
    SignalNotCaptured {
        /// Session id
        session_id: String,
        /// Rejected signal type
        signal_type: SignalType,
    },

    /// Capture options rejected
    #[error("Invalid capture options: {0}")]
    InvalidOptions(String),

    /// Batch or metadata could not be persisted
    #[error("Storage failure{}: {source}", fmt_session(.session_id))]
    StorageFailure {
        /// Session the write belonged to, if any
        session_id: Option<String>,
        /// Underlying store error
        #[source]
        source: OtlpStorageError,
    },

    /// Batch could not be compressed
    #[error("Compression failure{}: {cause}", fmt_session(.session_id))]
    CompressionFailure {
        /// Session the batch belonged to, if any
        session_id: Option<String>,
        /// Compressor message
        cause: String,
    },

    /// Batch could not be serialized
    #[error("Serialization failure{}: {cause}", fmt_session(.session_id))]
    SerializationFailure {
        /// Session the batch belonged to, if any
        session_id: Option<String>,
        /// Codec message
        cause: String,
    },
}

/// Replay session errors
#[derive(Error, Debug)]
pub enum OtlpReplayError {
    /// Referenced capture session does not exist
    #[error("Capture session not found: {0}")]
    SessionNotFound(String),

    /// No replay with this id
    #[error("Replay not found: {0}")]
    ReplayNotFound(String),

    /// Capture session is not in a replayable status
    #[error("Capture session {session_id} is {status} and cannot be replayed")]
    InvalidState {
        /// Capture session id
        session_id: String,
        /// Its current status
        status: CaptureStatus,
    },

    /// Replay options rejected
    #[error("Invalid replay options: {0}")]
    InvalidOptions(String),

    /// Stored data is structurally unusable
    #[error("Data corrupted in session {session_id}: {description}")]
    DataCorrupted {
        /// Capture session id
        session_id: String,
        /// What was wrong with the data
        description: String,
    },

    /// Stored blob failed to inflate
    #[error("Decompression failure in session {session_id}: {cause}")]
    DecompressionFailure {
        /// Capture session id
        session_id: String,
        /// Inflater message
        cause: String,
    },

    /// Downstream ingestion rejected, timed out, or the batch disappeared
    #[error("Ingestion failure in session {session_id}: {description}: {cause}")]
    IngestionFailure {
        /// Capture session id
        session_id: String,
        /// What was being delivered
        description: String,
        /// Sink or store message
        cause: String,
    },

    /// Object store unreachable while reading stored batches
    #[error("Storage failure in session {session_id}: {source}")]
    StorageFailure {
        /// Capture session id
        session_id: String,
        /// Underlying store error
        #[source]
        source: OtlpStorageError,
    },

    /// Replay was cancelled before all records were delivered
    #[error("Replay of session {session_id} cancelled")]
    Cancelled {
        /// Capture session id
        session_id: String,
    },
}

impl OtlpReplayError {
    /// Classification recorded on a failed replay session
    pub fn failure_kind(&self) -> ReplayFailureKind {
        match self {
            OtlpReplayError::DataCorrupted { .. } => ReplayFailureKind::DataCorrupted,
            OtlpReplayError::DecompressionFailure { .. } => ReplayFailureKind::Decompression,
            OtlpReplayError::IngestionFailure { .. } => ReplayFailureKind::Ingestion,
            OtlpReplayError::Cancelled { .. } => ReplayFailureKind::Cancelled,
            _ => ReplayFailureKind::Storage,
        }
    }
}

/// Server-related errors
#[derive(Error, Debug)]
pub enum OtlpServerError {
    /// Failed to bind server address
    #[error("Failed to bind server address: {0}")]
    BindError(String),

    /// Failed to start server
    #[error("Failed to start server: {0}")]
    StartupError(String),

    /// Server shutdown error
    #[error("Server shutdown error: {0}")]
    ShutdownError(String),
}

fn fmt_session(session_id: &Option<String>) -> String {
    match session_id {
        Some(id) => format!(" in session {}", id),
        None => String::new(),
    }
}

impl From<anyhow::Error> for OtlpError {
    fn from(err: anyhow::Error) -> Self {
        OtlpError::Io(std::io::Error::other(err.to_string()))
    }
}
