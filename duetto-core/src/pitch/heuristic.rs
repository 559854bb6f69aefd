//! Autocorrelation pitch confidence.
//!
//! Scans lags covering the 80–500 Hz singing range and reports the best
//! normalised autocorrelation peak, smoothed across hops. Strongly periodic
//! input scores near 1; noise decorrelates and scores low; silence decays
//! the previous confidence instead of snapping to 0.

use super::PitchFrontend;
use crate::error::Result;

const MODEL_SAMPLE_RATE: f32 = 16_000.0;
const MIN_FREQUENCY: f32 = 80.0;
const MAX_FREQUENCY: f32 = 500.0;
const SMOOTHING: f32 = 0.4;
const SILENCE_SUM_SQUARES: f32 = 1.0e-8;

/// Short-term autocorrelation voiced-confidence frontend. Allocation-free.
#[derive(Debug, Clone, Default)]
pub struct HeuristicPitch {
    smoothed_confidence: f32,
}

impl HeuristicPitch {
    fn autocorrelation(hop: &[f32], lag: usize) -> f32 {
        let limit = hop.len() - lag;
        let mut correlation = 0.0;
        for i in 0..limit {
            correlation += hop[i] * hop[i + lag];
        }
        correlation / limit as f32
    }
}

impl PitchFrontend for HeuristicPitch {
    fn process_hop(&mut self, hop: &[f32]) -> Result<f32> {
        if hop.is_empty() {
            return Ok(0.0);
        }

        let sum_squares: f32 = hop.iter().map(|s| s * s).sum();
        if sum_squares <= SILENCE_SUM_SQUARES {
            self.smoothed_confidence *= 0.5;
            return Ok(self.smoothed_confidence);
        }

        let mean_square = sum_squares / hop.len() as f32;
        let min_lag = (MODEL_SAMPLE_RATE / MAX_FREQUENCY).floor() as usize;
        let max_lag = ((MODEL_SAMPLE_RATE / MIN_FREQUENCY).ceil() as usize).min(hop.len() - 1);

        let mut best_correlation = 0.0f32;
        for lag in min_lag..=max_lag {
            let normalised = Self::autocorrelation(hop, lag) / (mean_square + 1.0e-8);
            best_correlation = best_correlation.max(normalised);
        }

        let confidence = best_correlation.clamp(0.0, 1.0);
        self.smoothed_confidence =
            SMOOTHING * confidence + (1.0 - SMOOTHING) * self.smoothed_confidence;
        Ok(self.smoothed_confidence)
    }

    fn reset(&mut self) {
        self.smoothed_confidence = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::HOP_SAMPLES;

    fn sine_hop(freq: f32, amplitude: f32, phase0: usize) -> Vec<f32> {
        (0..HOP_SAMPLES)
            .map(|i| {
                let t = (phase0 + i) as f32 / MODEL_SAMPLE_RATE;
                amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    #[test]
    fn silence_decays_confidence() {
        let mut pitch = HeuristicPitch::default();
        // Build up some confidence first.
        for i in 0..4 {
            pitch.process_hop(&sine_hop(220.0, 0.4, i * HOP_SAMPLES)).unwrap();
        }
        let before = pitch.process_hop(&sine_hop(220.0, 0.4, 0)).unwrap();
        let silence = vec![0.0f32; HOP_SAMPLES];
        let after = pitch.process_hop(&silence).unwrap();
        assert!((after - before * 0.5).abs() < 1e-6, "before={before} after={after}");
    }

    #[test]
    fn tonal_input_crosses_half_within_two_hops() {
        // Scenario: 200 Hz sine at 0.3 amplitude; confidence above 0.5 within
        // 100 ms of onset (two 64 ms hops).
        let mut pitch = HeuristicPitch::default();
        let first = pitch.process_hop(&sine_hop(200.0, 0.3, 0)).unwrap();
        let second = pitch.process_hop(&sine_hop(200.0, 0.3, HOP_SAMPLES)).unwrap();
        assert!(
            first > 0.5 || second > 0.5,
            "first={first} second={second}"
        );
    }

    #[test]
    fn noise_scores_lower_than_tone() {
        let mut tone_pitch = HeuristicPitch::default();
        let mut noise_pitch = HeuristicPitch::default();

        // Deterministic pseudo-noise (LCG) to avoid a rand dependency.
        let mut state = 0x1234_5678u32;
        let noise: Vec<f32> = (0..HOP_SAMPLES)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 16) as f32 / 32_768.0 - 1.0
            })
            .map(|s| s * 0.3)
            .collect();

        let mut tone_score = 0.0;
        let mut noise_score = 0.0;
        for i in 0..5 {
            tone_score = tone_pitch
                .process_hop(&sine_hop(180.0, 0.3, i * HOP_SAMPLES))
                .unwrap();
            noise_score = noise_pitch.process_hop(&noise).unwrap();
        }
        assert!(
            tone_score > noise_score,
            "tone={tone_score} noise={noise_score}"
        );
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        let mut pitch = HeuristicPitch::default();
        for i in 0..20 {
            let score = pitch.process_hop(&sine_hop(440.0, 0.9, i * HOP_SAMPLES)).unwrap();
            assert!((0.0..=1.0).contains(&score), "score={score}");
        }
    }
}
