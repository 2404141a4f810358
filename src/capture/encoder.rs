//! Batch encoder
//!
//! Serializes one OTLP payload, optionally gzips it, derives its partition key
//! from the capture wall-clock time and writes it to the object store.
//! [`BatchEncoder::decode_batch`] is the inverse used by replay.

use crate::capture::{CaptureSession, IngestReceipt};
use crate::error::{OtlpCaptureError, OtlpCodecError, OtlpReplayError};
use crate::otlp::{OtlpCodec, OtlpPayload, PayloadFormat};
use crate::storage::{BatchKey, ObjectStore};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Default gzip level for stored batches
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Why a stored blob could not be turned back into a payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchDecodeError {
    /// Blob is structurally unusable (bad header, truncated, undecodable)
    #[error("{key}: {reason}")]
    Corrupted {
        /// Object key
        key: String,
        /// What was wrong
        reason: String,
    },

    /// Gzip stream failed to inflate
    #[error("{key}: {reason}")]
    Decompression {
        /// Object key
        key: String,
        /// Inflater message
        reason: String,
    },
}

impl BatchDecodeError {
    /// Attach the owning capture session
    pub fn into_replay_error(self, session_id: &str) -> OtlpReplayError {
        match self {
            BatchDecodeError::Corrupted { .. } => OtlpReplayError::DataCorrupted {
                session_id: session_id.to_string(),
                description: self.to_string(),
            },
            BatchDecodeError::Decompression { .. } => OtlpReplayError::DecompressionFailure {
                session_id: session_id.to_string(),
                cause: self.to_string(),
            },
        }
    }
}

/// Writes and reads stored batch objects
#[derive(Debug, Clone)]
pub struct BatchEncoder {
    objects: Arc<dyn ObjectStore>,
    compression_level: u32,
}

impl BatchEncoder {
    /// Create an encoder writing to `objects`
    pub fn new(objects: Arc<dyn ObjectStore>, compression_level: u32) -> Self {
        Self {
            objects,
            compression_level: compression_level.min(9),
        }
    }

    /// Object store the encoder writes to
    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    /// Encode `payload` for `session` and store it under a fresh key
    pub async fn store_batch(
        &self,
        session: &CaptureSession,
        payload: &OtlpPayload,
        captured_at: DateTime<Utc>,
    ) -> Result<IngestReceipt, OtlpCaptureError> {
        let bytes = encode_batch(
            payload,
            session.payload_format,
            session.compression_enabled.then_some(self.compression_level),
        )
        .map_err(|e| e.with_session(&session.session_id))?;

        let key = BatchKey::new(
            &session.session_id,
            payload.signal_type(),
            captured_at,
            session.compression_enabled,
        )
        .to_key();
        let size_bytes = bytes.len() as u64;

        self.objects
            .put(&key, bytes)
            .await
            .map_err(|source| OtlpCaptureError::StorageFailure {
                session_id: Some(session.session_id.clone()),
                source,
            })?;

        trace!(
            session_id = %session.session_id,
            key = %key,
            size_bytes,
            "Stored batch"
        );
        Ok(IngestReceipt { key, size_bytes })
    }

    /// Decode a stored blob back into a payload
    pub fn decode_batch(
        key: &BatchKey,
        bytes: &[u8],
        format: PayloadFormat,
    ) -> Result<OtlpPayload, BatchDecodeError> {
        let key_str = key.to_key();
        let corrupted = |reason: String| BatchDecodeError::Corrupted {
            key: key_str.clone(),
            reason,
        };

        let inflated;
        let serialized = if key.compressed {
            if bytes.len() < GZIP_MAGIC.len() || bytes[..2] != GZIP_MAGIC {
                return Err(corrupted("missing gzip header".to_string()));
            }
            let mut out = Vec::with_capacity(bytes.len() * 4);
            if let Err(e) = GzDecoder::new(bytes).read_to_end(&mut out) {
                return Err(if e.kind() == ErrorKind::UnexpectedEof {
                    corrupted(format!("truncated gzip stream: {}", e))
                } else {
                    BatchDecodeError::Decompression {
                        key: key_str.clone(),
                        reason: e.to_string(),
                    }
                });
            }
            inflated = out;
            &inflated[..]
        } else {
            bytes
        };

        OtlpCodec::new(format)
            .decode(key.signal_type, serialized)
            .map_err(|e| corrupted(e.to_string()))
    }
}

/// Failure while turning a payload into stored bytes
#[derive(Error, Debug)]
pub enum BatchEncodeError {
    /// Codec failure
    #[error(transparent)]
    Serialization(#[from] OtlpCodecError),

    /// Gzip failure
    #[error("gzip failed: {0}")]
    Compression(#[source] std::io::Error),
}

impl BatchEncodeError {
    fn with_session(self, session_id: &str) -> OtlpCaptureError {
        let session_id = Some(session_id.to_string());
        match self {
            BatchEncodeError::Serialization(e) => OtlpCaptureError::SerializationFailure {
                session_id,
                cause: e.to_string(),
            },
            BatchEncodeError::Compression(e) => OtlpCaptureError::CompressionFailure {
                session_id,
                cause: e.to_string(),
            },
        }
    }
}

/// Serialize a payload and gzip it when a level is given
pub fn encode_batch(
    payload: &OtlpPayload,
    format: PayloadFormat,
    compression_level: Option<u32>,
) -> Result<Vec<u8>, BatchEncodeError> {
    let serialized = OtlpCodec::new(format).encode(payload)?;
    let Some(level) = compression_level else {
        return Ok(serialized);
    };

    let mut encoder = GzEncoder::new(
        Vec::with_capacity(serialized.len() / 2),
        Compression::new(level.min(9)),
    );
    encoder
        .write_all(&serialized)
        .map_err(BatchEncodeError::Compression)?;
    encoder.finish().map_err(BatchEncodeError::Compression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otlp::SignalType;
    use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
    use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};

    fn logs_payload() -> OtlpPayload {
        OtlpPayload::Logs(ExportLogsServiceRequest {
            resource_logs: vec![ResourceLogs {
                scope_logs: vec![ScopeLogs {
                    log_records: vec![LogRecord {
                        time_unix_nano: 1_700_000_000_000_000_000,
                        severity_text: "WARN".to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        })
    }

    fn key(compressed: bool) -> BatchKey {
        BatchKey::new("cap-1", SignalType::Logs, Utc::now(), compressed)
    }

    #[test]
    fn test_gzip_round_trip() {
        let payload = logs_payload();
        let bytes = encode_batch(&payload, PayloadFormat::Protobuf, Some(6)).unwrap();
        assert_eq!(&bytes[..2], &GZIP_MAGIC);
        let decoded = BatchEncoder::decode_batch(&key(true), &bytes, PayloadFormat::Protobuf);
        assert_eq!(decoded.unwrap(), payload);
    }

    #[test]
    fn test_uncompressed_json_round_trip() {
        let payload = logs_payload();
        let bytes = encode_batch(&payload, PayloadFormat::Json, None).unwrap();
        let decoded = BatchEncoder::decode_batch(&key(false), &bytes, PayloadFormat::Json);
        assert_eq!(decoded.unwrap(), payload);
    }

    #[test]
    fn test_bad_header_is_corrupted() {
        let mut bytes = encode_batch(&logs_payload(), PayloadFormat::Protobuf, Some(6)).unwrap();
        bytes[0] = 0;
        bytes[1] = 0;
        let err = BatchEncoder::decode_batch(&key(true), &bytes, PayloadFormat::Protobuf);
        assert!(matches!(err, Err(BatchDecodeError::Corrupted { .. })));

        let err = BatchEncoder::decode_batch(&key(true), &[0x1f], PayloadFormat::Protobuf);
        assert!(matches!(err, Err(BatchDecodeError::Corrupted { .. })));
    }

    #[test]
    fn test_truncated_stream_is_corrupted() {
        let bytes = encode_batch(&logs_payload(), PayloadFormat::Protobuf, Some(6)).unwrap();
        let truncated = &bytes[..bytes.len() - 6];
        let err = BatchEncoder::decode_batch(&key(true), truncated, PayloadFormat::Protobuf);
        assert!(matches!(err, Err(BatchDecodeError::Corrupted { .. })));
    }

    #[test]
    fn test_checksum_mismatch_is_decompression_failure() {
        let mut bytes = encode_batch(&logs_payload(), PayloadFormat::Protobuf, Some(6)).unwrap();
        let crc_at = bytes.len() - 8;
        bytes[crc_at] ^= 0xff;
        let err = BatchEncoder::decode_batch(&key(true), &bytes, PayloadFormat::Protobuf);
        assert!(matches!(err, Err(BatchDecodeError::Decompression { .. })));
    }
}
