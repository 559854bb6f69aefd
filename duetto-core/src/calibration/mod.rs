//! One-shot microphone calibration.
//!
//! Runs inline on the audio thread: a pure O(1)-per-sample reducer tracking
//! the peak |sample| over a fixed measurement window. The resulting vocal
//! peak anchors the "strength" metric; the noise floor is reported at a fixed
//! −80 dB reference.

use serde::{Deserialize, Serialize};

const EPSILON: f32 = 1.0e-6;
const REFERENCE_NOISE_FLOOR_DB: f32 = -80.0;

/// Default measurement window in seconds.
pub const DEFAULT_DURATION_SECONDS: f32 = 10.0;

/// Outcome of a completed (or aborted) calibration pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationResult {
    pub noise_floor_db: f32,
    pub vocal_peak_db: f32,
    /// False when no samples were observed at all.
    pub is_valid: bool,
}

/// Measures the performer's peak level over a fixed window.
#[derive(Debug, Clone)]
pub struct Calibrator {
    sample_rate: f64,
    target_duration_seconds: f32,
    processed_samples: usize,
    max_amplitude: f32,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            target_duration_seconds: DEFAULT_DURATION_SECONDS,
            processed_samples: 0,
            max_amplitude: 0.0,
        }
    }
}

impl Calibrator {
    /// Begin a new measurement window. Any previous progress is discarded.
    pub fn start(&mut self, sample_rate: f64, duration_seconds: f32) {
        self.sample_rate = sample_rate;
        self.target_duration_seconds = duration_seconds;
        self.processed_samples = 0;
        self.max_amplitude = 0.0;
    }

    /// Fold one block of mic samples into the measurement. No-op once
    /// complete.
    pub fn process_block(&mut self, samples: &[f32]) {
        if self.is_complete() {
            return;
        }

        for &sample in samples {
            let amplitude = sample.abs();
            if amplitude > self.max_amplitude {
                self.max_amplitude = amplitude;
            }
        }
        self.processed_samples += samples.len();
    }

    pub fn is_complete(&self) -> bool {
        let samples_needed = self.sample_rate * f64::from(self.target_duration_seconds);
        self.processed_samples >= samples_needed as usize
    }

    pub fn result(&self) -> CalibrationResult {
        let amplitude = self.max_amplitude.max(EPSILON);
        CalibrationResult {
            noise_floor_db: REFERENCE_NOISE_FLOOR_DB,
            vocal_peak_db: 20.0 * amplitude.log10(),
            is_valid: self.processed_samples > 0,
        }
    }

    /// Peak amplitude observed so far, linear.
    pub fn peak_amplitude(&self) -> f32 {
        self.max_amplitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_after_configured_duration() {
        let mut cal = Calibrator::default();
        cal.start(1_000.0, 1.0);
        assert!(!cal.is_complete());

        cal.process_block(&vec![0.1; 999]);
        assert!(!cal.is_complete());

        cal.process_block(&[0.1]);
        assert!(cal.is_complete());
    }

    #[test]
    fn tracks_peak_amplitude_in_db() {
        let mut cal = Calibrator::default();
        cal.start(100.0, 1.0);
        cal.process_block(&[0.01, -0.5, 0.2]);
        cal.process_block(&vec![0.0; 200]);

        let result = cal.result();
        assert!(result.is_valid);
        // 20·log10(0.5) ≈ −6.02 dB
        assert!((result.vocal_peak_db - (-6.0206)).abs() < 1e-3);
        assert_eq!(result.noise_floor_db, -80.0);
    }

    #[test]
    fn ignores_samples_after_completion() {
        let mut cal = Calibrator::default();
        cal.start(10.0, 1.0);
        cal.process_block(&vec![0.1; 10]);
        assert!(cal.is_complete());

        cal.process_block(&[0.9]);
        assert!((cal.peak_amplitude() - 0.1).abs() < 1e-7);
    }

    #[test]
    fn result_invalid_before_any_samples() {
        let mut cal = Calibrator::default();
        cal.start(48_000.0, 10.0);
        assert!(!cal.result().is_valid);
    }

    #[test]
    fn restart_discards_previous_peak() {
        let mut cal = Calibrator::default();
        cal.start(10.0, 1.0);
        cal.process_block(&[0.8; 10]);
        cal.start(10.0, 1.0);
        assert_eq!(cal.peak_amplitude(), 0.0);
        assert!(!cal.is_complete());
    }
}
