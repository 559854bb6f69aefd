//! Neural VAD over ONNX Runtime.
//!
//! ## Model I/O
//!
//! | Name     | Shape       | DType | Direction |
//! |----------|-------------|-------|-----------|
//! | `input`  | `[1, 160]`  | f32   | in        |
//! | `state`  | `[2,1,128]` | f32   | in/out    |
//! | `sr`     | `[1]`       | i64   | in        |
//! | `output` | `[1]`       | f32   | out       |
//! | `stateN` | `[2,1,128]` | f32   | out       |
//!
//! The frontend owns the recurrent `state`, writes it back after every frame
//! and zeroes it on `reset`.

use std::path::Path;

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::info;

use super::{VadFrontend, FRAME_SAMPLES};
use crate::error::{DuettoError, Result};

const INPUT_NAME: &str = "input";
const STATE_NAME: &str = "state";
const SAMPLE_RATE_NAME: &str = "sr";
const OUTPUT_NAME: &str = "output";
const STATE_OUTPUT_NAME: &str = "stateN";

const STATE_CHANNELS: usize = 2;
const STATE_HIDDEN: usize = 128;
const STATE_LEN: usize = STATE_CHANNELS * STATE_HIDDEN;

/// ONNX-backed voice-activity frontend.
pub struct NeuralVad {
    session: Session,
    state: Vec<f32>,
    sample_rate_hz: i64,
}

impl NeuralVad {
    /// Load the VAD graph from `path`.
    ///
    /// # Errors
    /// `DuettoError::ModelLoadFailed` when the file is missing or the session
    /// cannot be built; callers are expected to fall back to the heuristic.
    pub fn new(path: impl AsRef<Path>, sample_rate_hz: i64) -> Result<Self> {
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

        info!(path = %path.display(), sample_rate_hz, "neural VAD session ready");

        Ok(Self {
            session,
            state: vec![0.0; STATE_LEN],
            sample_rate_hz,
        })
    }
}

impl VadFrontend for NeuralVad {
    fn process_frame(&mut self, frame: &[f32]) -> Result<f32> {
        if frame.len() != FRAME_SAMPLES {
            return Err(DuettoError::FrameSizeMismatch {
                expected: FRAME_SAMPLES,
                got: frame.len(),
            });
        }

        let input_arr = Array2::<f32>::from_shape_vec((1, FRAME_SAMPLES), frame.to_vec())
            .map_err(|e| DuettoError::Inference(e.to_string()))?;
        let state_arr = Array3::<f32>::from_shape_vec(
            (STATE_CHANNELS, 1, STATE_HIDDEN),
            self.state.clone(),
        )
        .map_err(|e| DuettoError::Inference(e.to_string()))?;
        let sr_arr = Array1::<i64>::from_elem(1, self.sample_rate_hz);

        let input_val =
            Value::from_array(input_arr).map_err(|e: ort::Error| DuettoError::Inference(e.to_string()))?;
        let state_val =
            Value::from_array(state_arr).map_err(|e: ort::Error| DuettoError::Inference(e.to_string()))?;
        let sr_val =
            Value::from_array(sr_arr).map_err(|e: ort::Error| DuettoError::Inference(e.to_string()))?;

        let inputs: Vec<(String, SessionInputValue<'_>)> = vec![
            (INPUT_NAME.to_string(), input_val.into()),
            (STATE_NAME.to_string(), state_val.into()),
            (SAMPLE_RATE_NAME.to_string(), sr_val.into()),
        ];

        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| DuettoError::Inference(e.to_string()))?;

        let probability = {
            let prob_output = outputs.get(OUTPUT_NAME).unwrap_or(&outputs[0]);
            let (_, prob_data) = prob_output
                .try_extract_tensor::<f32>()
                .map_err(|e| DuettoError::Inference(e.to_string()))?;
            prob_data.first().copied().unwrap_or(0.0)
        };

        if let Some(state_out) = outputs.get(STATE_OUTPUT_NAME) {
            let (_, state_data) = state_out
                .try_extract_tensor::<f32>()
                .map_err(|e| DuettoError::Inference(e.to_string()))?;
            if state_data.len() == STATE_LEN {
                self.state.copy_from_slice(state_data);
            }
        }

        Ok(probability.clamp(0.0, 1.0))
    }

    fn reset(&mut self) {
        self.state.iter_mut().for_each(|v| *v = 0.0);
    }

    fn set_sample_rate(&mut self, sample_rate_hz: i64) {
        self.sample_rate_hz = sample_rate_hz;
    }
}
