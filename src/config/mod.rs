//! Configuration module
//!
//! Provides configuration management for the capture/replay engine including
//! loading from YAML files, environment variables, and programmatic API.

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{
    AuthConfig, Config, ConfigBuilder, IngestConfig, IngestProtocol, ReceiverConfig,
    ReplayConfig, RetentionConfig, StorageBackend,
};
