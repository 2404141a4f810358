//! Mock sink module
//!
//! Provides a mock ingestion sink for testing replays through the trait
//! interface and over OTLP/gRPC.

pub mod sink;

pub use sink::{MockIngestSink, ReceivedBatch};
