//! Storage key layout
//!
//! Batch objects live at
//! `sessions/{session_id}/raw/{yyyy-MM-dd}/{HH}/{signal}-{unix_millis}-{uuid}.otlp[.gz]`.
//! The date/hour partition and the millisecond stamp both come from the
//! capture wall-clock time, so keys within a session are append-only.

use crate::error::OtlpStorageError;
use crate::otlp::SignalType;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Prefix for all capture session data
pub const SESSIONS_PREFIX: &str = "sessions/";

/// Prefix for replay session records
pub const REPLAYS_PREFIX: &str = "replays/";

/// File name of a session metadata record
pub const METADATA_FILE: &str = "metadata.json";
const COMPRESSED_SUFFIX: &str = ".otlp.gz";
const PLAIN_SUFFIX: &str = ".otlp";
const MAX_SESSION_ID_LEN: usize = 128;

/// Key of a session's metadata record
pub fn metadata_key(session_id: &str) -> String {
    format!("{}{}/{}", SESSIONS_PREFIX, session_id, METADATA_FILE)
}

/// Whether a key names a session metadata record
pub fn is_metadata_key(key: &str) -> bool {
    key.starts_with(SESSIONS_PREFIX) && key.ends_with(&format!("/{}", METADATA_FILE))
}

/// Prefix under which a session's batch objects are stored
pub fn raw_prefix(session_id: &str) -> String {
    format!("{}{}/raw/", SESSIONS_PREFIX, session_id)
}

/// Key of a replay session record
pub fn replay_key(replay_id: &str) -> String {
    format!("{}{}.json", REPLAYS_PREFIX, replay_id)
}

/// Check that a session id can be embedded in a storage key
pub fn validate_session_id(session_id: &str) -> Result<(), String> {
    if session_id.is_empty() {
        return Err("session id cannot be empty".to_string());
    }
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(format!(
            "session id is too long ({} characters, max {})",
            session_id.len(),
            MAX_SESSION_ID_LEN
        ));
    }
    if session_id == "." || session_id == ".." {
        return Err("session id cannot be '.' or '..'".to_string());
    }
    if let Some(c) = session_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!("session id contains invalid character '{}'", c));
    }
    Ok(())
}

/// Parsed key of one stored batch object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchKey {
    /// Owning capture session
    pub session_id: String,
    /// Signal type of the batch
    pub signal_type: SignalType,
    /// Capture wall-clock time, millisecond precision
    pub captured_at: DateTime<Utc>,
    /// Random suffix separating batches captured in the same millisecond
    pub batch_id: Uuid,
    /// Whether the blob is gzip-compressed
    pub compressed: bool,
}

impl BatchKey {
    /// New key for a batch captured at `captured_at`
    pub fn new(
        session_id: &str,
        signal_type: SignalType,
        captured_at: DateTime<Utc>,
        compressed: bool,
    ) -> Self {
        let millis = captured_at.timestamp_millis();
        Self {
            session_id: session_id.to_string(),
            signal_type,
            captured_at: DateTime::from_timestamp_millis(millis).unwrap_or(captured_at),
            batch_id: Uuid::new_v4(),
            compressed,
        }
    }

    /// `yyyy-MM-dd/HH` partition of the capture time
    pub fn partition(&self) -> String {
        self.captured_at.format("%Y-%m-%d/%H").to_string()
    }

    /// Full object store key
    pub fn to_key(&self) -> String {
        format!(
            "{}{}/{}-{}-{}{}",
            raw_prefix(&self.session_id),
            self.partition(),
            self.signal_type,
            self.captured_at.timestamp_millis(),
            self.batch_id,
            if self.compressed {
                COMPRESSED_SUFFIX
            } else {
                PLAIN_SUFFIX
            }
        )
    }

    /// Parse an object store key back into its parts
    pub fn parse(key: &str) -> Result<Self, OtlpStorageError> {
        let invalid = |reason: &str| OtlpStorageError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        let rest = key
            .strip_prefix(SESSIONS_PREFIX)
            .ok_or_else(|| invalid("missing sessions/ prefix"))?;
        let parts: Vec<&str> = rest.split('/').collect();
        let [session_id, "raw", date, hour, file] = parts.as_slice() else {
            return Err(invalid("expected {session}/raw/{date}/{hour}/{file}"));
        };

        let (stem, compressed) = if let Some(stem) = file.strip_suffix(COMPRESSED_SUFFIX) {
            (stem, true)
        } else if let Some(stem) = file.strip_suffix(PLAIN_SUFFIX) {
            (stem, false)
        } else {
            return Err(invalid("unknown file suffix"));
        };

        let mut fields = stem.splitn(3, '-');
        let signal_type: SignalType = fields
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|e: String| invalid(&e))?;
        let millis: i64 = fields
            .next()
            .and_then(|m| m.parse().ok())
            .ok_or_else(|| invalid("bad capture timestamp"))?;
        let batch_id = fields
            .next()
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| invalid("bad batch id"))?;
        let captured_at = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| invalid("capture timestamp out of range"))?;

        let parsed = Self {
            session_id: session_id.to_string(),
            signal_type,
            captured_at,
            batch_id,
            compressed,
        };
        if parsed.partition() != format!("{}/{}", date, hour) {
            return Err(invalid("partition does not match capture timestamp"));
        }
        Ok(parsed)
    }
}
