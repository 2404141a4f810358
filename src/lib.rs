//! OTLP Capture/Replay Library
//!
//! Records live OpenTelemetry Protocol (OTLP) traces, metrics and logs into
//! compressed, time-partitioned object storage and replays recorded sessions
//! into an ingestion endpoint, reproducing the original pacing scaled by a
//! speed multiplier.
//!
//! # Features
//!
//! - Capture sessions with per-signal counters and periodic checkpoints
//! - Gzip-compressed protobuf or JSON batch storage
//! - Paced replay with retry, cancellation and timestamp rewriting
//! - Per-signal retention
//! - OTLP/gRPC capture receiver
//! - OTLP/HTTP and OTLP/gRPC ingestion sinks
//! - Configurable via YAML, environment variables, or programmatic API
//! - Mock ingestion sink for testing
//!
//! # Example
//!
//! ```no_run
//! use otlp_capture_replay::{CaptureOptions, CaptureReplayEngine, Config, ReplayOptions};
//!
//! # async fn example() -> Result<(), otlp_capture_replay::OtlpError> {
//! let config = Config::default();
//! let engine = CaptureReplayEngine::new(config).await?;
//!
//! engine.start_capture(CaptureOptions::new("cap-1")).await?;
//! // engine.ingest_batch("cap-1", request).await?;
//! engine.stop_capture("cap-1").await?;
//!
//! let replay = engine.start_replay(ReplayOptions::new("cap-1")).await?;
//! engine.wait_for_replay(&replay.replay_id).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod capture;
pub mod config;
pub mod error;
pub mod mock;
pub mod otlp;
pub mod replay;
pub mod scheduler;
pub mod storage;

// Re-export public API
pub use api::CaptureReplayEngine;
pub use capture::{
    CaptureOptions, CaptureSession, CaptureStatus, IngestReceipt, RetentionPolicy,
    RetentionReport,
};
pub use config::{AuthConfig, Config, ConfigBuilder, ConfigLoader, IngestConfig, IngestProtocol};
pub use error::{
    OtlpCaptureError, OtlpCodecError, OtlpConfigError, OtlpError, OtlpReplayError,
    OtlpServerError, OtlpStorageError,
};
pub use mock::MockIngestSink;
pub use otlp::{OtlpPayload, PayloadFormat, SignalType};
pub use replay::{
    IngestSink, IngestSinkError, ReplayFailureKind, ReplayOptions, ReplaySession, ReplayStatus,
    ReplayedBatch, TimestampAdjustment,
};

// Initialize tracing subscriber for structured logging
use tracing_subscriber::EnvFilter;

/// Initialize structured logging
///
/// Reads the filter from `RUST_LOG`. Calling it more than once is harmless.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}
