//! Replay pacer
//!
//! Streams stored batches to a sink in capture order, spacing emissions by the
//! original capture gaps divided by the speed multiplier. Each signal type is
//! an independent stream; the streams of one replay run concurrently and the
//! first failure cancels the others.
//!
//! Emission instants are computed from the stream start rather than from the
//! previous emission, so slow fetches or sink calls never accumulate drift.

use crate::capture::BatchEncoder;
use crate::config::ReplayConfig;
use crate::error::{OtlpReplayError, OtlpStorageError};
use crate::otlp::timestamps::{earliest_timestamp, shift_timestamps};
use crate::otlp::{OtlpPayload, PayloadFormat, SignalType};
use crate::replay::{IngestSink, IngestSinkError, ReplayedBatch, TimestampAdjustment};
use crate::storage::{BatchKey, ObjectStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Upper bound on a single scheduled wait
const MAX_EMISSION_DELAY: Duration = Duration::from_secs(365 * 24 * 3600);

/// How batches are handed to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Upper bound on one sink call
    pub ingest_timeout: Duration,
    /// Attempts per batch for transient failures and timeouts
    pub max_attempts: u32,
    /// Delay before the second attempt; grows linearly after that
    pub retry_backoff: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self::from(&ReplayConfig::default())
    }
}

impl From<&ReplayConfig> for DeliverySettings {
    fn from(config: &ReplayConfig) -> Self {
        Self {
            ingest_timeout: config.ingest_timeout(),
            max_attempts: config.max_ingest_attempts.max(1),
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// A stored batch object selected for replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object store key as listed
    pub key: String,
    /// Parsed key
    pub batch: BatchKey,
}

/// Everything the pacer needs to run one replay
#[derive(Debug, Clone)]
pub struct ReplayPlan {
    /// Replay id, for logging
    pub replay_id: String,
    /// Capture session being replayed
    pub session_id: String,
    /// Serialization of the stored batches
    pub format: PayloadFormat,
    /// Pacing relative to the original capture
    pub speed_multiplier: f64,
    /// Timestamp rewriting mode
    pub timestamp_adjustment: TimestampAdjustment,
    /// Replay start; target of the `current` adjustment
    pub started_at: DateTime<Utc>,
    /// Objects per signal type, in storage order
    pub streams: Vec<(SignalType, Vec<StoredObject>)>,
}

/// Fetch one stored object and decode it
pub(crate) async fn fetch_batch(
    objects: &dyn ObjectStore,
    session_id: &str,
    object: &StoredObject,
    format: PayloadFormat,
) -> Result<ReplayedBatch, OtlpReplayError> {
    let bytes = objects.get(&object.key).await.map_err(|e| match e {
        OtlpStorageError::NotFound(_) => OtlpReplayError::IngestionFailure {
            session_id: session_id.to_string(),
            description: format!("stored batch {} is missing", object.key),
            cause: e.to_string(),
        },
        source => OtlpReplayError::StorageFailure {
            session_id: session_id.to_string(),
            source,
        },
    })?;

    let payload = BatchEncoder::decode_batch(&object.batch, &bytes, format)
        .map_err(|e| e.into_replay_error(session_id))?;

    Ok(ReplayedBatch {
        key: object.key.clone(),
        captured_at: object.batch.captured_at,
        payload,
    })
}

/// Paces stored batches into a sink
#[derive(Debug, Clone)]
pub struct ReplayPacer {
    objects: Arc<dyn ObjectStore>,
    sink: Arc<dyn IngestSink>,
    settings: DeliverySettings,
}

impl ReplayPacer {
    /// Create a pacer reading from `objects` and delivering to `sink`
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        sink: Arc<dyn IngestSink>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            objects,
            sink,
            settings,
        }
    }

    /// Run every stream of the plan to completion
    ///
    /// `processed` is incremented once per acknowledged batch. Cancelling
    /// `cancel` stops all streams before their next emission.
    pub async fn run(
        &self,
        plan: &ReplayPlan,
        processed: &AtomicU64,
        cancel: &CancellationToken,
    ) -> Result<(), OtlpReplayError> {
        let streams = cancel.child_token();
        let runs = plan.streams.iter().map(|(signal_type, objects)| {
            let streams = streams.clone();
            async move {
                let result = self
                    .run_stream(plan, *signal_type, objects, processed, &streams)
                    .await;
                if result.is_err() {
                    streams.cancel();
                }
                result
            }
        });
        let results = futures::future::join_all(runs).await;

        // A sibling's real error wins over the cancellation it caused
        let mut cancelled = None;
        for result in results {
            match result {
                Ok(()) => {}
                Err(e @ OtlpReplayError::Cancelled { .. }) => {
                    cancelled.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        cancelled.map_or(Ok(()), Err)
    }

    async fn run_stream(
        &self,
        plan: &ReplayPlan,
        signal_type: SignalType,
        objects: &[StoredObject],
        processed: &AtomicU64,
        cancel: &CancellationToken,
    ) -> Result<(), OtlpReplayError> {
        let Some(first) = objects.first() else {
            return Ok(());
        };
        let first_captured_at = first.batch.captured_at;
        let stream_start = Instant::now();
        let mut offset: Option<i128> = None;

        debug!(
            replay_id = %plan.replay_id,
            signal_type = %signal_type,
            batches = objects.len(),
            "Starting replay stream"
        );

        for object in objects {
            if cancel.is_cancelled() {
                return Err(self.cancelled(plan));
            }

            let mut batch =
                fetch_batch(self.objects.as_ref(), &plan.session_id, object, plan.format).await?;

            if plan.timestamp_adjustment == TimestampAdjustment::Current {
                if offset.is_none() {
                    offset = earliest_timestamp(&batch.payload).map(|earliest| {
                        nanos_since_epoch(plan.started_at) - i128::from(earliest)
                    });
                }
                if let Some(offset) = offset {
                    shift_timestamps(&mut batch.payload, offset);
                }
            }

            let delay = emission_delay(
                object.batch.captured_at,
                first_captured_at,
                plan.speed_multiplier,
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(plan)),
                _ = tokio::time::sleep_until(stream_start + delay) => {}
            }

            self.deliver(plan, &object.key, &batch.payload, cancel).await?;
            processed.fetch_add(1, Ordering::AcqRel);
            trace!(
                replay_id = %plan.replay_id,
                key = %object.key,
                "Replayed batch"
            );
        }
        Ok(())
    }

    async fn deliver(
        &self,
        plan: &ReplayPlan,
        key: &str,
        payload: &OtlpPayload,
        cancel: &CancellationToken,
    ) -> Result<(), OtlpReplayError> {
        let mut attempt = 1;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(plan)),
                outcome = tokio::time::timeout(self.settings.ingest_timeout, self.sink.ingest(payload)) => outcome,
            };

            let cause = match outcome {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(IngestSinkError::Permanent(cause))) => {
                    return Err(OtlpReplayError::IngestionFailure {
                        session_id: plan.session_id.clone(),
                        description: format!("sink rejected batch {}", key),
                        cause,
                    });
                }
                Ok(Err(IngestSinkError::Transient(cause))) => cause,
                Err(_) => format!("sink call timed out after {:?}", self.settings.ingest_timeout),
            };

            if attempt >= self.settings.max_attempts {
                return Err(OtlpReplayError::IngestionFailure {
                    session_id: plan.session_id.clone(),
                    description: format!("delivering batch {} failed after {} attempts", key, attempt),
                    cause,
                });
            }

            warn!(
                replay_id = %plan.replay_id,
                key = %key,
                attempt,
                error = %cause,
                "Transient ingestion failure, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(plan)),
                _ = tokio::time::sleep(self.settings.retry_backoff * attempt) => {}
            }
            attempt += 1;
        }
    }

    fn cancelled(&self, plan: &ReplayPlan) -> OtlpReplayError {
        OtlpReplayError::Cancelled {
            session_id: plan.session_id.clone(),
        }
    }
}

fn nanos_since_epoch(at: DateTime<Utc>) -> i128 {
    i128::from(at.timestamp()) * 1_000_000_000 + i128::from(at.timestamp_subsec_nanos())
}

/// Offset of a batch's emission from its stream's start
fn emission_delay(
    captured_at: DateTime<Utc>,
    first_captured_at: DateTime<Utc>,
    speed_multiplier: f64,
) -> Duration {
    let gap = captured_at
        .signed_duration_since(first_captured_at)
        .to_std()
        .unwrap_or_default();
    Duration::try_from_secs_f64(gap.as_secs_f64() / speed_multiplier)
        .unwrap_or(MAX_EMISSION_DELAY)
        .min(MAX_EMISSION_DELAY)
}
