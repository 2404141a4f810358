//! OTLP payload codec
//!
//! Serializes export requests as protobuf (via `prost`) or OTLP/JSON (via the
//! serde support in `opentelemetry-proto`). Decoding failures are reported as
//! [`OtlpCodecError::Corrupt`] so callers can tell bad data from other errors.

use crate::error::OtlpCodecError;
use crate::otlp::{OtlpPayload, PayloadFormat, SignalType};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use prost::Message;

/// Codec for one payload format
#[derive(Debug, Clone, Copy, Default)]
pub struct OtlpCodec {
    format: PayloadFormat,
}

impl OtlpCodec {
    /// Create a codec for the given format
    pub fn new(format: PayloadFormat) -> Self {
        Self { format }
    }

    /// Format this codec reads and writes
    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// Serialize a payload
    pub fn encode(&self, payload: &OtlpPayload) -> Result<Vec<u8>, OtlpCodecError> {
        match self.format {
            PayloadFormat::Protobuf => Ok(match payload {
                OtlpPayload::Traces(req) => req.encode_to_vec(),
                OtlpPayload::Metrics(req) => req.encode_to_vec(),
                OtlpPayload::Logs(req) => req.encode_to_vec(),
            }),
            PayloadFormat::Json => {
                let encoded = match payload {
                    OtlpPayload::Traces(req) => serde_json::to_vec(req),
                    OtlpPayload::Metrics(req) => serde_json::to_vec(req),
                    OtlpPayload::Logs(req) => serde_json::to_vec(req),
                };
                encoded.map_err(|e| OtlpCodecError::Encode {
                    signal_type: payload.signal_type(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Deserialize a payload of the given signal type
    pub fn decode(
        &self,
        signal_type: SignalType,
        bytes: &[u8],
    ) -> Result<OtlpPayload, OtlpCodecError> {
        let corrupt = |reason: String| OtlpCodecError::Corrupt {
            signal_type,
            reason,
        };

        match self.format {
            PayloadFormat::Protobuf => match signal_type {
                SignalType::Traces => ExportTraceServiceRequest::decode(bytes)
                    .map(OtlpPayload::Traces)
                    .map_err(|e| corrupt(e.to_string())),
                SignalType::Metrics => ExportMetricsServiceRequest::decode(bytes)
                    .map(OtlpPayload::Metrics)
                    .map_err(|e| corrupt(e.to_string())),
                SignalType::Logs => ExportLogsServiceRequest::decode(bytes)
                    .map(OtlpPayload::Logs)
                    .map_err(|e| corrupt(e.to_string())),
            },
            PayloadFormat::Json => match signal_type {
                SignalType::Traces => serde_json::from_slice::<ExportTraceServiceRequest>(bytes)
                    .map(OtlpPayload::Traces)
                    .map_err(|e| corrupt(e.to_string())),
                SignalType::Metrics => {
                    serde_json::from_slice::<ExportMetricsServiceRequest>(bytes)
                        .map(OtlpPayload::Metrics)
                        .map_err(|e| corrupt(e.to_string()))
                }
                SignalType::Logs => serde_json::from_slice::<ExportLogsServiceRequest>(bytes)
                    .map(OtlpPayload::Logs)
                    .map_err(|e| corrupt(e.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};

    fn trace_payload() -> OtlpPayload {
        OtlpPayload::Traces(ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                scope_spans: vec![ScopeSpans {
                    spans: vec![Span {
                        trace_id: vec![7; 16],
                        span_id: vec![3; 8],
                        name: "GET /checkout".to_string(),
                        start_time_unix_nano: 1_700_000_000_000_000_000,
                        end_time_unix_nano: 1_700_000_000_500_000_000,
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        })
    }

    #[test]
    fn test_protobuf_round_trip() {
        let codec = OtlpCodec::new(PayloadFormat::Protobuf);
        let payload = trace_payload();
        let bytes = codec.encode(&payload).unwrap();
        let decoded = codec.decode(SignalType::Traces, &bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_json_round_trip() {
        let codec = OtlpCodec::new(PayloadFormat::Json);
        let payload = trace_payload();
        let bytes = codec.encode(&payload).unwrap();
        let decoded = codec.decode(SignalType::Traces, &bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_garbage_is_reported_as_corrupt() {
        let codec = OtlpCodec::new(PayloadFormat::Protobuf);
        let err = codec
            .decode(SignalType::Metrics, &[0xff, 0xff, 0xff, 0xff, 0x0f])
            .unwrap_err();
        assert!(matches!(err, OtlpCodecError::Corrupt { .. }));

        let json = OtlpCodec::new(PayloadFormat::Json);
        let err = json.decode(SignalType::Logs, b"{not json").unwrap_err();
        assert!(matches!(err, OtlpCodecError::Corrupt { .. }));
    }
}
