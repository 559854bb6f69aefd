//! # duetto-core
//!
//! Real-time karaoke accompaniment engine.
//!
//! ## Architecture
//!
//! ```text
//! mic ──► Pipeline::process (audio thread, wait-free)
//!           ├── Calibrator (one-shot peak measurement)
//!           ├── VAD ring ──► VadFrontend   ┐
//!           ├── pitch ring ► PitchFrontend ┼─► confidence ─► ConfidenceGate
//!           ├── TrackSlot backing ┐        ┘                      │
//!           ├── TrackSlot guide ──┼─► Mixer (timbre·envelope·reverb·crowd)
//!           └── MetricsCell ◄─────┘            │
//!                                              ▼
//! KaraokeEngine (control thread) ──────► stereo out
//!   atomic ControlState cells · SPSC track hand-off · broadcast events
//! ```
//!
//! The audio callback never allocates, blocks, or surfaces errors; the
//! control plane talks to it exclusively through atomic cells and SPSC
//! rings. Analysis runs at the 16 kHz model rate interleaved with playback
//! and mixing at the device rate.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod calibration;
pub mod config;
pub mod control;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod events;
pub mod media;
pub mod metrics;
pub mod pitch;
pub mod telemetry;
pub mod vad;

// Convenience re-exports for downstream crates
pub use calibration::{CalibrationResult, Calibrator};
pub use config::RuntimeConfig;
pub use control::{TrackSlotId, TransportState};
pub use dsp::{ConfidenceGate, ManualMode};
pub use engine::{KaraokeEngine, Pipeline, PipelineContext};
pub use error::DuettoError;
pub use events::EngineEvent;
pub use metrics::MetricsSnapshot;
pub use pitch::PitchFrontend;
pub use vad::VadFrontend;

#[cfg(feature = "onnx")]
pub use pitch::NeuralPitch;

#[cfg(feature = "onnx")]
pub use vad::NeuralVad;
