//! Neural pitch confidence over ONNX Runtime (CREPE-tiny style export).
//!
//! ## Model I/O
//!
//! | Name            | Shape       | DType | Direction |
//! |-----------------|-------------|-------|-----------|
//! | `audio`         | `[1, 1024]` | f32   | in        |
//! | `probabilities` | `[360]`     | f32   | out       |
//!
//! The voiced confidence is the maximum of the 360 pitch-bin probabilities.

use std::path::Path;

use ndarray::Array2;
use ort::session::builder::SessionBuilder;
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::info;

use super::{PitchFrontend, HOP_SAMPLES};
use crate::error::{DuettoError, Result};

const INPUT_NAME: &str = "audio";
const OUTPUT_NAME: &str = "probabilities";

/// ONNX-backed voiced-confidence frontend.
pub struct NeuralPitch {
    session: Session,
}

impl NeuralPitch {
    /// Load the pitch graph from `path`.
    ///
    /// # Errors
    /// `DuettoError::ModelLoadFailed` when the file is missing or the session
    /// cannot be built.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DuettoError::ModelLoadFailed(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let session = SessionBuilder::new()
            .map_err(|e| DuettoError::ModelLoadFailed(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| DuettoError::ModelLoadFailed(e.to_string()))?;

        info!(path = %path.display(), "neural pitch session ready");

        Ok(Self { session })
    }
}

impl PitchFrontend for NeuralPitch {
    fn process_hop(&mut self, hop: &[f32]) -> Result<f32> {
        if hop.len() != HOP_SAMPLES {
            return Err(DuettoError::FrameSizeMismatch {
                expected: HOP_SAMPLES,
                got: hop.len(),
            });
        }

        let input_arr = Array2::<f32>::from_shape_vec((1, HOP_SAMPLES), hop.to_vec())
            .map_err(|e| DuettoError::Inference(e.to_string()))?;
        let input_val =
            Value::from_array(input_arr).map_err(|e: ort::Error| DuettoError::Inference(e.to_string()))?;

        let inputs: Vec<(String, SessionInputValue<'_>)> =
            vec![(INPUT_NAME.to_string(), input_val.into())];

        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| DuettoError::Inference(e.to_string()))?;

        let prob_output = outputs.get(OUTPUT_NAME).unwrap_or(&outputs[0]);
        let (_, probabilities) = prob_output
            .try_extract_tensor::<f32>()
            .map_err(|e| DuettoError::Inference(e.to_string()))?;

        let confidence = probabilities
            .iter()
            .copied()
            .fold(0.0f32, f32::max);

        Ok(confidence.clamp(0.0, 1.0))
    }

    fn reset(&mut self) {}
}
