//! Heuristic VAD: adaptive noise floor + logistic SNR scoring.
//!
//! ## Algorithm (per 10 ms frame)
//!
//! 1. Frame energy E = mean(s²).
//! 2. Adapt the noise floor: fast (α = 0.02) while E looks like noise
//!    (E ≤ 1.5·floor), slow (α = 0.002) while it looks like speech, so the
//!    floor tracks the room but does not climb into sustained singing.
//! 3. Logistic term from SNR in dB; level term from absolute RMS in dB.
//!    The frame probability is the max of the two, then one-pole smoothed.

use super::VadFrontend;
use crate::error::Result;

const MIN_FLOOR: f32 = 1.0e-7;
const NOISE_ADAPT_FAST: f32 = 0.02;
const NOISE_ADAPT_SLOW: f32 = 0.002;
const SMOOTHING: f32 = 0.45;
const LOGISTIC_SLOPE: f32 = 0.9;
const LOGISTIC_OFFSET_DB: f32 = -1.5;
const LEVEL_FLOOR_DB: f32 = -80.0;
const LEVEL_CEIL_DB: f32 = -30.0;

/// Energy/SNR-based voice-activity frontend. Allocation-free.
#[derive(Debug, Clone)]
pub struct HeuristicVad {
    noise_floor: f32,
    smoothed_probability: f32,
}

impl Default for HeuristicVad {
    fn default() -> Self {
        Self {
            noise_floor: 1.0e-4,
            smoothed_probability: 0.0,
        }
    }
}

impl HeuristicVad {
    fn frame_energy(frame: &[f32]) -> f32 {
        let sum_squares: f32 = frame.iter().map(|s| s * s).sum();
        sum_squares / frame.len() as f32
    }
}

impl VadFrontend for HeuristicVad {
    fn process_frame(&mut self, frame: &[f32]) -> Result<f32> {
        if frame.is_empty() {
            return Ok(0.0);
        }

        let energy = Self::frame_energy(frame);

        let likely_noise = energy <= self.noise_floor * 1.5;
        let adapt = if likely_noise {
            NOISE_ADAPT_FAST
        } else {
            NOISE_ADAPT_SLOW
        };
        self.noise_floor = MIN_FLOOR.max((1.0 - adapt) * self.noise_floor + adapt * energy);

        let snr = energy / self.noise_floor.max(MIN_FLOOR);
        let snr_db = 10.0 * snr.max(1.0e-6).log10();
        let logistic_prob = 1.0 / (1.0 + (-LOGISTIC_SLOPE * (snr_db - LOGISTIC_OFFSET_DB)).exp());

        let rms_db = 20.0 * energy.sqrt().max(1.0e-6).log10();
        let level_prob = ((rms_db - LEVEL_FLOOR_DB) / (LEVEL_CEIL_DB - LEVEL_FLOOR_DB)).clamp(0.0, 1.0);

        let probability = logistic_prob.max(level_prob);

        self.smoothed_probability =
            SMOOTHING * probability + (1.0 - SMOOTHING) * self.smoothed_probability;
        Ok(self.smoothed_probability.clamp(0.0, 1.0))
    }

    fn reset(&mut self) {
        self.noise_floor = 1.0e-4;
        self.smoothed_probability = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::FRAME_SAMPLES;

    fn sine_frame(freq: f32, amplitude: f32, sample_rate: f32, phase0: usize) -> Vec<f32> {
        (0..FRAME_SAMPLES)
            .map(|i| {
                let t = (phase0 + i) as f32 / sample_rate;
                amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    #[test]
    fn empty_frame_scores_zero() {
        let mut vad = HeuristicVad::default();
        assert_eq!(vad.process_frame(&[]).unwrap(), 0.0);
    }

    #[test]
    fn sustained_silence_scores_low() {
        let mut vad = HeuristicVad::default();
        let silence = vec![0.0f32; FRAME_SAMPLES];
        let mut score = 1.0;
        for _ in 0..50 {
            score = vad.process_frame(&silence).unwrap();
        }
        assert!(score < 0.2, "score={score}");
    }

    #[test]
    fn voice_onset_after_noise_rises_quickly() {
        let mut vad = HeuristicVad::default();

        // Settle the noise floor on low-level noise (~N(0, 0.001) stand-in).
        let noise: Vec<f32> = (0..FRAME_SAMPLES)
            .map(|i| if i % 2 == 0 { 0.001 } else { -0.001 })
            .collect();
        for _ in 0..100 {
            vad.process_frame(&noise).unwrap();
        }

        // 200 Hz sine at 0.3 amplitude; must clear 0.7 within 200 ms
        // (20 frames).
        let mut score = 0.0;
        let mut frames_to_cross = None;
        for frame_idx in 0..20 {
            let frame = sine_frame(200.0, 0.3, 16_000.0, frame_idx * FRAME_SAMPLES);
            score = vad.process_frame(&frame).unwrap();
            if score > 0.7 && frames_to_cross.is_none() {
                frames_to_cross = Some(frame_idx);
            }
        }
        assert!(
            frames_to_cross.is_some(),
            "score never crossed 0.7 within 200 ms, final={score}"
        );
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let mut vad = HeuristicVad::default();
        let loud = vec![0.99f32; FRAME_SAMPLES];
        for _ in 0..200 {
            let score = vad.process_frame(&loud).unwrap();
            assert!((0.0..=1.0).contains(&score), "score={score}");
        }
    }

    #[test]
    fn reset_clears_smoothed_state() {
        let mut vad = HeuristicVad::default();
        let loud = vec![0.5f32; FRAME_SAMPLES];
        for _ in 0..20 {
            vad.process_frame(&loud).unwrap();
        }
        vad.reset();
        let silence = vec![0.0f32; FRAME_SAMPLES];
        let score = vad.process_frame(&silence).unwrap();
        assert!(score < 0.1, "score after reset={score}");
    }
}
