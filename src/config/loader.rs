//! Configuration loader
//!
//! Loads configuration from YAML files, environment variables, or programmatic API.
//! Priority: provided config > environment variables > defaults

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::types::{Config, IngestConfig, IngestProtocol, StorageBackend};
use crate::error::OtlpConfigError;
use tracing::{debug, info, warn};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from YAML file
    pub fn from_yaml(path: impl AsRef<std::path::Path>) -> Result<Config, OtlpConfigError> {
        let path = path.as_ref();
        info!(
            config_path = %path.display(),
            "Loading configuration from YAML file"
        );

        let content = std::fs::read_to_string(path).map_err(|e| {
            warn!(
                config_path = %path.display(),
                error = %e,
                "Failed to read configuration file"
            );
            OtlpConfigError::ValidationFailed(format!("Failed to read config file: {}", e))
        })?;

        debug!(
            config_path = %path.display(),
            file_size_bytes = content.len(),
            "Read configuration file"
        );

        let mut config: Config = serde_yaml::from_str(&content).map_err(|e| {
            warn!(
                config_path = %path.display(),
                error = %e,
                "Failed to parse YAML configuration"
            );
            OtlpConfigError::ValidationFailed(format!("Failed to parse YAML: {}", e))
        })?;

        Self::apply_env_overrides(&mut config);
        Self::validated(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Config, OtlpConfigError> {
        info!("Loading configuration from environment variables");
        let mut config = Config::default();
        Self::apply_env_overrides(&mut config);
        Self::validated(config)
    }

    /// Load configuration with priority: provided config > environment variables > defaults
    pub fn load(provided: Option<Config>) -> Result<Config, OtlpConfigError> {
        if provided.is_some() {
            info!("Loading configuration with provided config and environment variable overrides");
        } else {
            info!("Loading configuration with defaults and environment variable overrides");
        }

        let mut config = provided.unwrap_or_default();
        Self::apply_env_overrides(&mut config);
        Self::validated(config)
    }

    fn validated(config: Config) -> Result<Config, OtlpConfigError> {
        config.validate().map_err(|e| {
            warn!(error = %e, "Configuration validation failed");
            e
        })?;

        info!(
            storage_backend = ?config.storage_backend,
            storage_dir = %config.storage_dir.display(),
            compression_level = config.compression_level,
            retention_enabled = config.retention.enabled,
            receiver_enabled = config.receiver.enabled,
            ingest_enabled = config.ingest.as_ref().is_some_and(|i| i.enabled),
            "Configuration loaded and validated successfully"
        );
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(config: &mut Config) {
        if let Some(dir) = parse_env::<String>("OTLP_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }

        if let Some(backend) = env_value("OTLP_STORAGE_BACKEND") {
            match backend.to_lowercase().as_str() {
                "filesystem" | "fs" => config.storage_backend = StorageBackend::Filesystem,
                "memory" => config.storage_backend = StorageBackend::Memory,
                other => warn!(
                    env_var = "OTLP_STORAGE_BACKEND",
                    value = %other,
                    "Unknown storage backend, ignoring"
                ),
            }
        }

        if let Some(level) = parse_env("OTLP_COMPRESSION_LEVEL") {
            config.compression_level = level;
        }
        if let Some(secs) = parse_env("OTLP_CHECKPOINT_INTERVAL_SECS") {
            config.checkpoint_interval_secs = secs;
        }

        if let Some(enabled) = parse_env("OTLP_RETENTION_ENABLED") {
            config.retention.enabled = enabled;
        }
        if let Some(secs) = parse_env("OTLP_RETENTION_INTERVAL_SECS") {
            config.retention.interval_secs = secs;
        }
        if let Some(secs) = parse_env("OTLP_TRACE_RETENTION_SECS") {
            config.retention.trace_max_age_secs = Some(secs);
        }
        if let Some(secs) = parse_env("OTLP_METRIC_RETENTION_SECS") {
            config.retention.metric_max_age_secs = Some(secs);
        }
        if let Some(secs) = parse_env("OTLP_LOG_RETENTION_SECS") {
            config.retention.log_max_age_secs = Some(secs);
        }

        if let Some(secs) = parse_env("OTLP_INGEST_TIMEOUT_SECS") {
            config.replay.ingest_timeout_secs = secs;
        }
        if let Some(attempts) = parse_env("OTLP_INGEST_MAX_ATTEMPTS") {
            config.replay.max_ingest_attempts = attempts;
        }

        if let Some(enabled) = parse_env("OTLP_RECEIVER_ENABLED") {
            config.receiver.enabled = enabled;
        }
        if let Some(port) = parse_env("OTLP_RECEIVER_PORT") {
            config.receiver.port = port;
        }
        if let Some(id) = parse_env::<String>("OTLP_CAPTURE_SESSION_ID") {
            config.receiver.capture_session_id = Some(id);
        }

        // OTLP_INGEST_ENABLED gates the remaining ingest overrides
        if let Some(true) = parse_env::<bool>("OTLP_INGEST_ENABLED") {
            let mut ingest = config.ingest.take().unwrap_or_else(IngestConfig::default);
            ingest.enabled = true;

            if let Some(url) = parse_env::<String>("OTLP_INGEST_ENDPOINT_URL") {
                ingest.endpoint_url = Some(url);
            }

            if let Some(protocol) = env_value("OTLP_INGEST_PROTOCOL") {
                ingest.protocol = match protocol.to_lowercase().as_str() {
                    "http" | "http_protobuf" | "http/protobuf" => IngestProtocol::HttpProtobuf,
                    "grpc" => IngestProtocol::Grpc,
                    other => {
                        warn!(
                            env_var = "OTLP_INGEST_PROTOCOL",
                            value = %other,
                            "Unknown ingest protocol, using default"
                        );
                        IngestProtocol::default()
                    }
                };
            }

            config.ingest = Some(ingest);
        }
    }
}

fn env_value(name: &'static str) -> Option<String> {
    env::var(name).ok()
}

/// Read and parse an environment variable, logging values that do not parse
fn parse_env<T>(name: &'static str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = env_value(name)?;
    match raw.parse::<T>() {
        Ok(value) => {
            debug!(
                env_var = name,
                value = %raw,
                "Applying environment variable override"
            );
            Some(value)
        }
        Err(e) => {
            warn!(
                env_var = name,
                value = %raw,
                error = %e,
                "Failed to parse environment variable, using default"
            );
            None
        }
    }
}
