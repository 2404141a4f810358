//! Unit tests for configuration validation

use otlp_capture_replay::config::{
    AuthConfig, ConfigBuilder, IngestConfig, IngestProtocol, ReceiverConfig, RetentionConfig,
    StorageBackend,
};
use otlp_capture_replay::error::OtlpConfigError;
use secrecy::SecretString;
use std::collections::HashMap;
use std::time::Duration;

fn ingest(endpoint: Option<&str>) -> IngestConfig {
    IngestConfig {
        enabled: true,
        endpoint_url: endpoint.map(str::to_string),
        protocol: IngestProtocol::HttpProtobuf,
        authentication: None,
    }
}

#[test]
fn test_defaults_pass_validation() {
    let config = ConfigBuilder::new().build().unwrap();

    assert_eq!(config.storage_backend, StorageBackend::Filesystem);
    assert_eq!(config.storage_dir.to_str(), Some("./capture_data"));
    assert_eq!(config.compression_level, 6);
    assert_eq!(config.checkpoint_interval(), Duration::from_secs(5));
    assert!(config.retention.enabled);
    assert_eq!(config.retention.interval(), Duration::from_secs(3600));
    assert_eq!(
        config.retention.policy().traces,
        Some(Duration::from_secs(7 * 24 * 3600))
    );
    assert_eq!(config.replay.ingest_timeout(), Duration::from_secs(10));
    assert_eq!(config.replay.max_ingest_attempts, 3);
    assert!(!config.receiver.enabled);
    assert_eq!(config.receiver.port, 4317);
    assert!(config.ingest.is_none());
}

#[test]
fn test_empty_storage_dir_fails_validation() {
    let config = ConfigBuilder::new().storage_dir("").build();

    match config.unwrap_err() {
        OtlpConfigError::InvalidStorageDir(_) => {}
        other => panic!("Expected InvalidStorageDir error, got {:?}", other),
    }
}

#[test]
fn test_empty_storage_dir_is_fine_in_memory() {
    let config = ConfigBuilder::new()
        .storage_backend(StorageBackend::Memory)
        .storage_dir("")
        .build();
    assert!(config.is_ok());
}

#[test]
fn test_compression_level_out_of_range_fails_validation() {
    assert!(ConfigBuilder::new().compression_level(9).build().is_ok());
    match ConfigBuilder::new().compression_level(10).build().unwrap_err() {
        OtlpConfigError::ValidationFailed(_) => {}
        other => panic!("Expected ValidationFailed error, got {:?}", other),
    }
}

#[test]
fn test_checkpoint_interval_bounds() {
    for secs in [0, 3601] {
        match ConfigBuilder::new()
            .checkpoint_interval_secs(secs)
            .build()
            .unwrap_err()
        {
            OtlpConfigError::InvalidInterval(_) => {}
            other => panic!("Expected InvalidInterval error, got {:?}", other),
        }
    }
}

#[test]
fn test_retention_interval_bounds() {
    for interval_secs in [59, 86401] {
        let retention = RetentionConfig {
            interval_secs,
            ..RetentionConfig::default()
        };
        assert!(matches!(
            ConfigBuilder::new().retention(retention).build(),
            Err(OtlpConfigError::InvalidInterval(_))
        ));
    }
}

#[test]
fn test_zero_retention_age_fails_validation() {
    let retention = RetentionConfig {
        log_max_age_secs: Some(0),
        ..RetentionConfig::default()
    };
    assert!(matches!(
        ConfigBuilder::new().retention(retention).build(),
        Err(OtlpConfigError::InvalidInterval(_))
    ));

    // Absent means keep forever
    let retention = RetentionConfig {
        log_max_age_secs: None,
        ..RetentionConfig::default()
    };
    let config = ConfigBuilder::new().retention(retention).build().unwrap();
    assert_eq!(config.retention.policy().logs, None);
}

#[test]
fn test_replay_delivery_bounds() {
    assert!(matches!(
        ConfigBuilder::new().ingest_timeout_secs(0).build(),
        Err(OtlpConfigError::InvalidInterval(_))
    ));
    assert!(matches!(
        ConfigBuilder::new().ingest_timeout_secs(301).build(),
        Err(OtlpConfigError::InvalidInterval(_))
    ));
    assert!(matches!(
        ConfigBuilder::new().max_ingest_attempts(0).build(),
        Err(OtlpConfigError::ValidationFailed(_))
    ));
    assert!(matches!(
        ConfigBuilder::new().max_ingest_attempts(11).build(),
        Err(OtlpConfigError::ValidationFailed(_))
    ));
}

#[test]
fn test_receiver_validation() {
    let receiver = ReceiverConfig {
        port: 0,
        ..ReceiverConfig::default()
    };
    assert!(ConfigBuilder::new().receiver(receiver).build().is_err());

    let receiver = ReceiverConfig {
        bind_address: "not an address".to_string(),
        ..ReceiverConfig::default()
    };
    assert!(ConfigBuilder::new().receiver(receiver).build().is_err());

    let receiver = ReceiverConfig {
        capture_session_id: Some("bad/id".to_string()),
        ..ReceiverConfig::default()
    };
    assert!(ConfigBuilder::new().receiver(receiver).build().is_err());

    let config = ConfigBuilder::new()
        .receiver(ReceiverConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 14317,
            ..ReceiverConfig::default()
        })
        .build()
        .unwrap();
    assert_eq!(
        config.receiver.socket_addr().unwrap().to_string(),
        "127.0.0.1:14317"
    );
}

#[test]
fn test_ingest_endpoint_validation() {
    assert!(matches!(
        ConfigBuilder::new().ingest(Some(ingest(None))).build(),
        Err(OtlpConfigError::MissingRequiredField(_))
    ));
    assert!(matches!(
        ConfigBuilder::new().ingest(Some(ingest(Some("")))).build(),
        Err(OtlpConfigError::InvalidUrl(_))
    ));
    assert!(matches!(
        ConfigBuilder::new()
            .ingest(Some(ingest(Some("ftp://collector:21"))))
            .build(),
        Err(OtlpConfigError::InvalidUrl(_))
    ));
    assert!(matches!(
        ConfigBuilder::new()
            .ingest(Some(ingest(Some("not a url"))))
            .build(),
        Err(OtlpConfigError::InvalidUrl(_))
    ));
    assert!(
        ConfigBuilder::new()
            .ingest(Some(ingest(Some("https://collector.example.com:4318"))))
            .build()
            .is_ok()
    );

    // Disabled ingest needs no endpoint
    let disabled = IngestConfig::default();
    assert!(ConfigBuilder::new().ingest(Some(disabled)).build().is_ok());
}

#[test]
fn test_auth_requires_credentials_for_its_type() {
    let auth = |auth_type: &str, keys: &[&str]| AuthConfig {
        auth_type: auth_type.to_string(),
        credentials: keys
            .iter()
            .map(|k| (k.to_string(), SecretString::new("secret".to_string())))
            .collect::<HashMap<_, _>>(),
    };

    assert!(auth("api_key", &["key"]).validate().is_ok());
    assert!(auth("bearer_token", &["token"]).validate().is_ok());
    assert!(auth("basic", &["username", "password"]).validate().is_ok());

    assert!(matches!(
        auth("api_key", &["token"]).validate(),
        Err(OtlpConfigError::MissingRequiredField(_))
    ));
    assert!(matches!(
        auth("basic", &["username"]).validate(),
        Err(OtlpConfigError::MissingRequiredField(_))
    ));
    assert!(matches!(
        auth("oauth", &[]).validate(),
        Err(OtlpConfigError::ValidationFailed(_))
    ));
    assert!(matches!(
        auth("", &[]).validate(),
        Err(OtlpConfigError::ValidationFailed(_))
    ));
}
