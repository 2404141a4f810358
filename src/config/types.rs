//! Configuration type definitions
//!
//! Defines all configuration structures for the capture/replay engine.

use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::capture::RetentionPolicy;
use crate::error::OtlpConfigError;

const SECONDS_PER_DAY: u64 = 86_400;

/// Where stored batches and session records live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Files below `storage_dir`
    #[default]
    Filesystem,
    /// Process memory; lost on exit
    Memory,
}

/// Protocol used to deliver replayed batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestProtocol {
    /// OTLP/HTTP with protobuf bodies
    #[default]
    HttpProtobuf,
    /// OTLP/gRPC
    Grpc,
}

/// Main configuration structure for the capture/replay engine
///
/// # Configuration Sources
///
/// Configuration can be loaded from:
/// - YAML files
/// - Environment variables (with `OTLP_*` prefix)
/// - Programmatic API (using `ConfigBuilder`)
///
/// # Default Values
///
/// - `storage_backend`: `filesystem`
/// - `storage_dir`: `./capture_data`
/// - `compression_level`: `6`
/// - `checkpoint_interval_secs`: `5`
/// - `retention`: enabled, hourly sweep, 7 days for every signal type
/// - `receiver`: disabled, `0.0.0.0:4317`
/// - `ingest`: none (replays need a sink supplied programmatically)
///
/// # Example
///
/// ```no_run
/// use otlp_capture_replay::ConfigBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConfigBuilder::new()
///     .storage_dir("./recordings")
///     .compression_level(9)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Storage backend for batches and session records (default: filesystem)
    #[serde(default)]
    pub storage_backend: StorageBackend,

    /// Root directory of the filesystem backend (default: ./capture_data)
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Gzip level for compressed batches, 0-9 (default: 6)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// How often live capture counters are persisted in seconds (default: 5)
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,

    /// Retention enforcement
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Replay delivery settings
    #[serde(default)]
    pub replay: ReplayConfig,

    /// OTLP/gRPC capture receiver
    #[serde(default)]
    pub receiver: ReceiverConfig,

    /// Downstream endpoint replays are delivered to
    #[serde(default)]
    pub ingest: Option<IngestConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::default(),
            storage_dir: default_storage_dir(),
            compression_level: default_compression_level(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            retention: RetentionConfig::default(),
            replay: ReplayConfig::default(),
            receiver: ReceiverConfig::default(),
            ingest: None,
        }
    }
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), OtlpConfigError> {
        if self.storage_backend == StorageBackend::Filesystem {
            let path_str = self.storage_dir.to_string_lossy();
            if path_str.is_empty() {
                return Err(OtlpConfigError::InvalidStorageDir(
                    "Storage directory cannot be empty".to_string(),
                ));
            }
            if path_str.len() > 4096 {
                return Err(OtlpConfigError::InvalidStorageDir(format!(
                    "Storage directory path is too long ({} characters, max 4096)",
                    path_str.len()
                )));
            }
            if path_str.contains('\0') {
                return Err(OtlpConfigError::InvalidStorageDir(
                    "Storage directory path cannot contain null bytes".to_string(),
                ));
            }
        }

        if self.compression_level > 9 {
            return Err(OtlpConfigError::ValidationFailed(format!(
                "Compression level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }

        if self.checkpoint_interval_secs == 0 {
            return Err(OtlpConfigError::InvalidInterval(
                "Checkpoint interval must be greater than 0".to_string(),
            ));
        }
        if self.checkpoint_interval_secs > 3600 {
            return Err(OtlpConfigError::InvalidInterval(
                "Checkpoint interval must be less than 3600 seconds (1 hour)".to_string(),
            ));
        }

        self.retention.validate()?;
        self.replay.validate()?;
        self.receiver.validate()?;

        if let Some(ref ingest) = self.ingest {
            ingest.validate()?;
        }

        Ok(())
    }

    /// Checkpoint interval as a duration
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }
}

/// Retention enforcement settings
///
/// A `null` max age keeps that signal type forever.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Whether the periodic retention sweep runs (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sweep interval in seconds, 60-86400 (default: 3600)
    #[serde(default = "default_retention_interval_secs")]
    pub interval_secs: u64,

    /// Maximum trace batch age in seconds (default: 7 days)
    #[serde(default = "default_max_age_secs")]
    pub trace_max_age_secs: Option<u64>,

    /// Maximum metric batch age in seconds (default: 7 days)
    #[serde(default = "default_max_age_secs")]
    pub metric_max_age_secs: Option<u64>,

    /// Maximum log batch age in seconds (default: 7 days)
    #[serde(default = "default_max_age_secs")]
    pub log_max_age_secs: Option<u64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_retention_interval_secs(),
            trace_max_age_secs: default_max_age_secs(),
            metric_max_age_secs: default_max_age_secs(),
            log_max_age_secs: default_max_age_secs(),
        }
    }
}

impl RetentionConfig {
    /// Validate retention settings
    pub fn validate(&self) -> Result<(), OtlpConfigError> {
        if self.interval_secs < 60 {
            return Err(OtlpConfigError::InvalidInterval(
                "Retention interval must be at least 60 seconds".to_string(),
            ));
        }
        if self.interval_secs > SECONDS_PER_DAY {
            return Err(OtlpConfigError::InvalidInterval(
                "Retention interval must be less than 86400 seconds (1 day)".to_string(),
            ));
        }
        for (name, age) in [
            ("trace_max_age_secs", self.trace_max_age_secs),
            ("metric_max_age_secs", self.metric_max_age_secs),
            ("log_max_age_secs", self.log_max_age_secs),
        ] {
            if age == Some(0) {
                return Err(OtlpConfigError::InvalidInterval(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Sweep interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Policy applied by the periodic sweep
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            traces: self.trace_max_age_secs.map(Duration::from_secs),
            metrics: self.metric_max_age_secs.map(Duration::from_secs),
            logs: self.log_max_age_secs.map(Duration::from_secs),
        }
    }
}

/// Replay delivery settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    /// Upper bound on one sink call in seconds, 1-300 (default: 10)
    #[serde(default = "default_ingest_timeout_secs")]
    pub ingest_timeout_secs: u64,

    /// Attempts per batch for transient failures, 1-10 (default: 3)
    #[serde(default = "default_max_ingest_attempts")]
    pub max_ingest_attempts: u32,

    /// Base delay between attempts in milliseconds; grows linearly (default: 500)
    #[serde(default = "default_retry_backoff_millis")]
    pub retry_backoff_millis: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            ingest_timeout_secs: default_ingest_timeout_secs(),
            max_ingest_attempts: default_max_ingest_attempts(),
            retry_backoff_millis: default_retry_backoff_millis(),
        }
    }
}

impl ReplayConfig {
    /// Validate replay settings
    pub fn validate(&self) -> Result<(), OtlpConfigError> {
        if self.ingest_timeout_secs == 0 || self.ingest_timeout_secs > 300 {
            return Err(OtlpConfigError::InvalidInterval(
                "Ingest timeout must be between 1 and 300 seconds".to_string(),
            ));
        }
        if self.max_ingest_attempts == 0 || self.max_ingest_attempts > 10 {
            return Err(OtlpConfigError::ValidationFailed(
                "max_ingest_attempts must be between 1 and 10".to_string(),
            ));
        }
        Ok(())
    }

    /// Sink call timeout
    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_secs(self.ingest_timeout_secs)
    }

    /// Base retry delay
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_millis)
    }
}

/// OTLP/gRPC capture receiver settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverConfig {
    /// Whether the service binary runs the receiver (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Listen address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Listen port (default: 4317, standard OTLP port)
    #[serde(default = "default_receiver_port")]
    pub port: u16,

    /// Session the service binary records into while running
    #[serde(default)]
    pub capture_session_id: Option<String>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            port: default_receiver_port(),
            capture_session_id: None,
        }
    }
}

impl ReceiverConfig {
    /// Validate receiver settings
    pub fn validate(&self) -> Result<(), OtlpConfigError> {
        if self.port == 0 {
            return Err(OtlpConfigError::ValidationFailed(
                "Receiver port must be between 1 and 65535".to_string(),
            ));
        }
        self.socket_addr()?;
        if let Some(ref id) = self.capture_session_id {
            crate::storage::keys::validate_session_id(id).map_err(|e| {
                OtlpConfigError::ValidationFailed(format!("capture_session_id: {}", e))
            })?;
        }
        Ok(())
    }

    /// Address the receiver binds to
    pub fn socket_addr(&self) -> Result<SocketAddr, OtlpConfigError> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| {
                OtlpConfigError::ValidationFailed(format!(
                    "Invalid receiver address {}:{}: {}",
                    self.bind_address, self.port, e
                ))
            })
    }
}

/// Downstream endpoint that replays are delivered to
///
/// # Example
///
/// ```no_run
/// use otlp_capture_replay::config::{IngestConfig, IngestProtocol};
///
/// let ingest = IngestConfig {
///     enabled: true,
///     endpoint_url: Some("http://collector.example.com:4318".to_string()),
///     protocol: IngestProtocol::HttpProtobuf,
///     authentication: None,
/// };
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestConfig {
    /// Whether replay delivery is enabled (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Endpoint base URL (required if enabled)
    pub endpoint_url: Option<String>,

    /// Delivery protocol (default: http_protobuf)
    #[serde(default)]
    pub protocol: IngestProtocol,

    /// Authentication configuration (optional)
    #[serde(default)]
    pub authentication: Option<AuthConfig>,
}

impl IngestConfig {
    /// Validate ingest configuration
    pub fn validate(&self) -> Result<(), OtlpConfigError> {
        if self.enabled {
            let Some(ref endpoint) = self.endpoint_url else {
                return Err(OtlpConfigError::MissingRequiredField(
                    "endpoint_url is required when ingest is enabled".to_string(),
                ));
            };
            if endpoint.is_empty() {
                return Err(OtlpConfigError::InvalidUrl(
                    "Endpoint URL cannot be empty when ingest is enabled".to_string(),
                ));
            }
            let parsed = url::Url::parse(endpoint)
                .map_err(|e| OtlpConfigError::InvalidUrl(format!("{}: {}", endpoint, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(OtlpConfigError::InvalidUrl(
                    "Endpoint URL must use http:// or https:// scheme".to_string(),
                ));
            }
        }

        if let Some(ref auth) = self.authentication {
            auth.validate()?;
        }
        Ok(())
    }
}

/// Authentication for the ingest endpoint
///
/// # Supported Authentication Types
///
/// - **`api_key`**: required `key`, optional `header_name` (default: `X-API-Key`)
/// - **`bearer_token`**: required `token`
/// - **`basic`**: required `username`, `password`
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Type of authentication (e.g., "api_key", "bearer_token", "basic")
    pub auth_type: String,

    /// Authentication parameters, kept as secrets
    pub credentials: HashMap<String, SecretString>,
}

impl AuthConfig {
    /// Validate authentication configuration
    pub fn validate(&self) -> Result<(), OtlpConfigError> {
        let required: &[&str] = match self.auth_type.as_str() {
            "" => {
                return Err(OtlpConfigError::ValidationFailed(
                    "Authentication type cannot be empty".to_string(),
                ));
            }
            "api_key" => &["key"],
            "bearer_token" => &["token"],
            "basic" => &["username", "password"],
            other => {
                return Err(OtlpConfigError::ValidationFailed(format!(
                    "Unsupported authentication type: {}",
                    other
                )));
            }
        };

        for field in required {
            if !self.credentials.contains_key(*field) {
                return Err(OtlpConfigError::MissingRequiredField(format!(
                    "{} required for {} authentication",
                    field, self.auth_type
                )));
            }
        }
        Ok(())
    }
}

/// Builder for creating configurations programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set storage backend
    pub fn storage_backend(mut self, backend: StorageBackend) -> Self {
        self.config.storage_backend = backend;
        self
    }

    /// Set storage directory
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    /// Set gzip level
    pub fn compression_level(mut self, level: u32) -> Self {
        self.config.compression_level = level;
        self
    }

    /// Set checkpoint interval in seconds
    pub fn checkpoint_interval_secs(mut self, secs: u64) -> Self {
        self.config.checkpoint_interval_secs = secs;
        self
    }

    /// Set retention configuration
    pub fn retention(mut self, retention: RetentionConfig) -> Self {
        self.config.retention = retention;
        self
    }

    /// Enable or disable the periodic retention sweep
    pub fn retention_enabled(mut self, enabled: bool) -> Self {
        self.config.retention.enabled = enabled;
        self
    }

    /// Set replay delivery configuration
    pub fn replay(mut self, replay: ReplayConfig) -> Self {
        self.config.replay = replay;
        self
    }

    /// Set sink call timeout in seconds
    pub fn ingest_timeout_secs(mut self, secs: u64) -> Self {
        self.config.replay.ingest_timeout_secs = secs;
        self
    }

    /// Set attempts per batch
    pub fn max_ingest_attempts(mut self, attempts: u32) -> Self {
        self.config.replay.max_ingest_attempts = attempts;
        self
    }

    /// Set receiver configuration
    pub fn receiver(mut self, receiver: ReceiverConfig) -> Self {
        self.config.receiver = receiver;
        self
    }

    /// Set ingest endpoint configuration
    pub fn ingest(mut self, ingest: Option<IngestConfig>) -> Self {
        self.config.ingest = ingest;
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<Config, OtlpConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// Default value functions
fn default_storage_dir() -> PathBuf {
    PathBuf::from("./capture_data")
}

fn default_compression_level() -> u32 {
    6
}

fn default_checkpoint_interval_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_retention_interval_secs() -> u64 {
    3600
}

fn default_max_age_secs() -> Option<u64> {
    Some(7 * SECONDS_PER_DAY)
}

fn default_ingest_timeout_secs() -> u64 {
    10
}

fn default_max_ingest_attempts() -> u32 {
    3
}

fn default_retry_backoff_millis() -> u64 {
    500
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_receiver_port() -> u16 {
    4317
}
