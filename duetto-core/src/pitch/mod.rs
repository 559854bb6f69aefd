//! Voiced-confidence (pitch) frontends.
//!
//! One 64 ms hop at the model rate in, one voiced-confidence score out.
//! `HeuristicPitch` uses short-term autocorrelation; `NeuralPitch` (`onnx`
//! feature) wraps a CREPE-style probability model.

pub mod heuristic;

#[cfg(feature = "onnx")]
pub mod neural;

pub use heuristic::HeuristicPitch;

#[cfg(feature = "onnx")]
pub use neural::NeuralPitch;

use std::path::Path;

use crate::error::Result;

/// Samples per pitch hop at the model rate (64 ms @ 16 kHz).
pub const HOP_SAMPLES: usize = 1024;

/// Trait for all voiced-confidence frontends.
pub trait PitchFrontend: Send + 'static {
    /// Score one hop of model-rate samples, returning a voiced confidence in
    /// [0, 1].
    ///
    /// # Errors
    /// Backends return an error on inference failure or an unexpected hop
    /// length; the pipeline collapses errors to a score of 0.
    fn process_hop(&mut self, hop: &[f32]) -> Result<f32>;

    /// Reset smoothing / model state.
    fn reset(&mut self);
}

/// Build the best available pitch frontend for `model_path`.
///
/// Neural first when the `onnx` feature is on; heuristic otherwise or on any
/// load failure, so a usable frontend is always returned.
pub fn build_frontend(model_path: &Path) -> Box<dyn PitchFrontend> {
    #[cfg(feature = "onnx")]
    {
        match NeuralPitch::new(model_path) {
            Ok(pitch) => {
                tracing::info!(path = %model_path.display(), "using neural pitch frontend");
                return Box::new(pitch);
            }
            Err(e) => {
                tracing::warn!(
                    path = %model_path.display(),
                    error = %e,
                    "neural pitch load failed, falling back to heuristic"
                );
            }
        }
    }
    #[cfg(not(feature = "onnx"))]
    {
        let _ = model_path;
    }

    Box::new(HeuristicPitch::default())
}
