//! Public API module

pub mod public;

pub use public::CaptureReplayEngine;
