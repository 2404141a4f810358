//! Standalone OTLP capture service
//!
//! Runs the OTLP/gRPC capture receiver over the configured storage and,
//! when `receiver.capture_session_id` is set, records everything it receives
//! into that session until Ctrl-C.
//!
//! Usage: `otlp-replay-service [config.yaml]`. Without a file the
//! configuration comes from defaults and `OTLP_*` environment variables.

use anyhow::Context;
use otlp_capture_replay::{
    CaptureOptions, CaptureReplayEngine, ConfigLoader, OtlpCaptureError, OtlpError,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ConfigLoader::from_yaml(&path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => ConfigLoader::load(None).context("failed to load configuration")?,
    };

    let engine = CaptureReplayEngine::new(config.clone())
        .await
        .context("failed to start engine")?;

    let recording = match config.receiver.capture_session_id.clone() {
        Some(session_id) => Some(open_recording(&engine, session_id).await?),
        None => None,
    };

    if config.receiver.enabled {
        let addr = engine
            .start_receiver()
            .await
            .context("failed to start capture receiver")?;
        info!(address = %addr, "Listening for OTLP messages");
    } else {
        warn!("Capture receiver disabled; set receiver.enabled to record live traffic");
    }

    info!("OTLP capture service started");

    // Keep the service running
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");

    if let Some(session_id) = recording {
        match engine.stop_capture(&session_id).await {
            Ok(session) => info!(
                session_id = %session.session_id,
                traces = session.captured_traces,
                metrics = session.captured_metrics,
                logs = session.captured_logs,
                total_size_bytes = session.total_size_bytes,
                "Recording stopped"
            ),
            Err(e) => error!(session_id = %session_id, error = %e, "Failed to stop recording"),
        }
    }

    engine.shutdown().await?;

    Ok(())
}

/// Start the recording session, or resume it if a previous run left it active
async fn open_recording(
    engine: &CaptureReplayEngine,
    session_id: String,
) -> anyhow::Result<String> {
    match engine.start_capture(CaptureOptions::new(session_id.clone())).await {
        Ok(session) => {
            info!(session_id = %session.session_id, "Recording into new capture session");
            Ok(session.session_id)
        }
        Err(OtlpError::Capture(OtlpCaptureError::SessionAlreadyActive(_))) => {
            let session = engine.get_capture_status(&session_id).await?;
            info!(
                session_id = %session_id,
                status = %session.status,
                "Resuming capture session"
            );
            Ok(session_id)
        }
        Err(OtlpError::Capture(OtlpCaptureError::SessionAlreadyExists(_))) => {
            let session = engine.get_capture_status(&session_id).await?;
            anyhow::bail!(
                "capture session {} already exists with status {}",
                session_id,
                session.status
            )
        }
        Err(e) => Err(e).context("failed to start capture session"),
    }
}
