//! Voice-activity frontends.
//!
//! The `VadFrontend` trait is the extensibility point: the pipeline consumes
//! one 10 ms frame at the model rate and receives a speech probability.
//! `HeuristicVad` (always available) and `NeuralVad` (`onnx` feature) are
//! interchangeable; [`build_frontend`] picks the best one that loads.

pub mod heuristic;

#[cfg(feature = "onnx")]
pub mod neural;

pub use heuristic::HeuristicVad;

#[cfg(feature = "onnx")]
pub use neural::NeuralVad;

use std::path::Path;

use crate::error::Result;

/// Samples per VAD frame at the model rate (10 ms @ 16 kHz).
pub const FRAME_SAMPLES: usize = 160;

/// Trait for all voice-activity frontends.
///
/// Implementors may be stateful (RNN hidden states, adaptive noise floors).
pub trait VadFrontend: Send + 'static {
    /// Score one frame of model-rate samples, returning a speech probability
    /// in [0, 1].
    ///
    /// # Errors
    /// Backends return an error on inference failure or an unexpected frame
    /// length. The pipeline collapses any error to a score of 0 and keeps
    /// running.
    fn process_frame(&mut self, frame: &[f32]) -> Result<f32>;

    /// Reset internal state (hidden states, noise floor, smoothing).
    fn reset(&mut self);

    /// Inform the backend of the model sample rate fed to `process_frame`.
    fn set_sample_rate(&mut self, _sample_rate_hz: i64) {}
}

/// Build the best available VAD frontend for `model_path`.
///
/// With the `onnx` feature the neural backend is tried first; any load
/// failure logs a warning and falls back to the heuristic, so the caller
/// always receives a usable frontend.
pub fn build_frontend(model_path: &Path, model_sample_rate_hz: i64) -> Box<dyn VadFrontend> {
    #[cfg(feature = "onnx")]
    {
        match NeuralVad::new(model_path, model_sample_rate_hz) {
            Ok(vad) => {
                tracing::info!(path = %model_path.display(), "using neural VAD frontend");
                return Box::new(vad);
            }
            Err(e) => {
                tracing::warn!(
                    path = %model_path.display(),
                    error = %e,
                    "neural VAD load failed, falling back to heuristic"
                );
            }
        }
    }
    #[cfg(not(feature = "onnx"))]
    {
        let _ = (model_path, model_sample_rate_hz);
    }

    Box::new(HeuristicVad::default())
}
