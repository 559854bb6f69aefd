//! Runtime configuration: typed defaults plus a JSON loader with `extends`
//! chaining.
//!
//! ## File format
//!
//! ```json
//! {
//!   "extends": "base.json",
//!   "sampleRateHz": 48000,
//!   "bufferSamples": 128,
//!   "gate": { "duckDb": -24 },
//!   "media": { "instrumentPath": "backing.flac", "loop": true }
//! }
//! ```
//!
//! `extends` is resolved relative to the referencing file and applied before
//! the file's own keys, so overrides always win. Unknown keys are ignored,
//! missing keys keep their defaults, and cyclic `extends` chains are rejected.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{DuettoError, Result};

/// Confidence-gate tuning. Mirrors the `gate` config block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateParams {
    /// Reserved for a future look-ahead buffer; parsed but unused.
    pub look_ahead_ms: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub hold_ms: f32,
    pub threshold_on: f32,
    pub threshold_off: f32,
    pub frames_on: u32,
    pub frames_off: u32,
    /// Attenuation applied to the guide bus when the gate is closed, in dB.
    /// Must be negative.
    pub duck_db: f32,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            look_ahead_ms: 10.0,
            attack_ms: 20.0,
            release_ms: 180.0,
            hold_ms: 150.0,
            threshold_on: 0.7,
            threshold_off: 0.4,
            frames_on: 3,
            frames_off: 6,
            duck_db: -18.0,
        }
    }
}

/// Weights for fusing the analysis scores into one confidence scalar.
/// Nominally sums to 1; the fused value is clamped to [0, 1] regardless.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfidenceWeights {
    pub vad: f32,
    pub pitch: f32,
    /// Weight of the externally supplied phrase-position confidence.
    pub phrase_aware: f32,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            vad: 0.6,
            pitch: 0.4,
            phrase_aware: 0.0,
        }
    }
}

/// Paths and sample rate of the neural analysis models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelParams {
    pub vad: PathBuf,
    pub pitch: PathBuf,
    pub model_sample_rate_hz: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            vad: PathBuf::from("models/vad.onnx"),
            pitch: PathBuf::from("models/crepe_tiny.onnx"),
            model_sample_rate_hz: 16_000.0,
        }
    }
}

/// Media file references and bus gains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaParams {
    /// Backing (instrumental) track; empty means nothing to load.
    pub instrument_path: String,
    /// Guide (lead vocal) track; empty means nothing to load.
    pub guide_path: String,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub instrument_gain_db: f32,
    pub guide_gain_db: f32,
    pub mic_monitor_gain_db: f32,
}

impl Default for MediaParams {
    fn default() -> Self {
        Self {
            instrument_path: String::new(),
            guide_path: String::new(),
            looping: true,
            instrument_gain_db: 0.0,
            guide_gain_db: 0.0,
            mic_monitor_gain_db: -6.0,
        }
    }
}

/// Environmental processing: reverb tail, timbre match, guide envelope,
/// crowd cancellation, speaker-bleed compensation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentParams {
    /// Wet/dry mix of the reverb tail on the guide bus, [0, 1].
    pub reverb_mix: f32,
    /// RT60-style decay time of the reverb tail in seconds.
    pub reverb_tail_seconds: f32,
    /// How strongly the guide's spectral tilt follows the mic's, [0, 1].
    pub timbre_match_strength: f32,
    pub envelope_hold_ms: f32,
    pub envelope_release_ms: f32,
    /// Multiplier on the envelope release coefficient while confidence is
    /// falling but still above the gate's off threshold.
    pub envelope_release_mod: f32,
    pub crowd_cancel_adapt_rate: f32,
    pub crowd_cancel_recovery_rate: f32,
    /// Absolute mic level above which the crowd estimate stops adapting.
    pub crowd_cancel_clamp: f32,
    /// Fraction of the previous output mid subtracted from the mic sample to
    /// compensate for speaker bleed into the microphone.
    pub playback_leak_compensation: f32,
    /// Amplitude treated as the ambient floor when computing the "strength"
    /// metric against the calibrated vocal peak.
    pub noise_floor_amplitude: f32,
}

impl Default for EnvironmentParams {
    fn default() -> Self {
        Self {
            reverb_mix: 0.2,
            reverb_tail_seconds: 1.8,
            timbre_match_strength: 0.25,
            envelope_hold_ms: 120.0,
            envelope_release_ms: 240.0,
            envelope_release_mod: 1.5,
            crowd_cancel_adapt_rate: 0.02,
            crowd_cancel_recovery_rate: 0.05,
            crowd_cancel_clamp: 0.25,
            playback_leak_compensation: 0.0,
            noise_floor_amplitude: 0.13,
        }
    }
}

/// Immutable engine configuration snapshot.
///
/// The pipeline value-copies this at configure time and never reads the
/// caller's instance afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub sample_rate_hz: f64,
    pub buffer_samples: usize,
    pub models: ModelParams,
    pub confidence_weights: ConfidenceWeights,
    pub gate: GateParams,
    pub media: MediaParams,
    pub environment: EnvironmentParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 48_000.0,
            buffer_samples: 128,
            models: ModelParams::default(),
            confidence_weights: ConfidenceWeights::default(),
            gate: GateParams::default(),
            media: MediaParams::default(),
            environment: EnvironmentParams::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load a configuration file, resolving any `extends` chain first.
    ///
    /// # Errors
    /// `DuettoError::ConfigInvalid` on malformed JSON, a cyclic `extends`
    /// chain, or values that fail [`RuntimeConfig::validate`]. Missing files
    /// surface as `DuettoError::Io`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut visited = Vec::new();
        let value = load_value(path, &mut visited)?;

        let mut config: RuntimeConfig = serde_json::from_value(value)
            .map_err(|e| DuettoError::ConfigInvalid(format!("{}: {e}", path.display())))?;
        config.normalize();
        config.validate()?;

        debug!(
            path = %path.display(),
            sample_rate = config.sample_rate_hz,
            buffer = config.buffer_samples,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Clamp soft-bounded fields into their working ranges, warning when a
    /// value had to be adjusted.
    pub fn normalize(&mut self) {
        let env = &mut self.environment;
        clamp_field("environment.reverbMix", &mut env.reverb_mix, 0.0, 1.0);
        clamp_field(
            "environment.timbreMatchStrength",
            &mut env.timbre_match_strength,
            0.0,
            1.0,
        );
        clamp_field(
            "environment.playbackLeakCompensation",
            &mut env.playback_leak_compensation,
            0.0,
            1.0,
        );
        clamp_field(
            "confidenceWeights.vad",
            &mut self.confidence_weights.vad,
            0.0,
            1.0,
        );
        clamp_field(
            "confidenceWeights.pitch",
            &mut self.confidence_weights.pitch,
            0.0,
            1.0,
        );
        clamp_field(
            "confidenceWeights.phraseAware",
            &mut self.confidence_weights.phrase_aware,
            0.0,
            1.0,
        );
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_samples == 0 {
            return Err(DuettoError::ConfigInvalid(
                "bufferSamples must be positive".into(),
            ));
        }
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(DuettoError::ConfigInvalid(format!(
                "sampleRateHz must be positive, got {}",
                self.sample_rate_hz
            )));
        }
        let fm = self.models.model_sample_rate_hz;
        if !(fm.is_finite() && fm > 0.0 && fm <= self.sample_rate_hz) {
            return Err(DuettoError::ConfigInvalid(format!(
                "modelSampleRateHz must be in (0, {}], got {fm}",
                self.sample_rate_hz
            )));
        }
        if self.gate.threshold_on < self.gate.threshold_off {
            return Err(DuettoError::ConfigInvalid(format!(
                "gate.thresholdOn ({}) must be >= gate.thresholdOff ({})",
                self.gate.threshold_on, self.gate.threshold_off
            )));
        }
        if self.gate.duck_db >= 0.0 {
            return Err(DuettoError::ConfigInvalid(format!(
                "gate.duckDb must be negative, got {}",
                self.gate.duck_db
            )));
        }
        if self.environment.reverb_tail_seconds <= 0.0 {
            return Err(DuettoError::ConfigInvalid(format!(
                "environment.reverbTailSeconds must be positive, got {}",
                self.environment.reverb_tail_seconds
            )));
        }
        Ok(())
    }

    /// Ratio of device samples per model sample, rounded to the nearest
    /// integer (3 at 48 kHz / 16 kHz).
    pub fn downsample_factor(&self) -> usize {
        (self.sample_rate_hz / self.models.model_sample_rate_hz).round() as usize
    }
}

fn clamp_field(name: &str, value: &mut f32, lo: f32, hi: f32) {
    if *value < lo || *value > hi {
        let clamped = value.clamp(lo, hi);
        warn!(field = name, from = *value, to = clamped, "config value clamped");
        *value = clamped;
    }
}

/// Read one file as JSON and fold in its `extends` base, recursively.
fn load_value(path: &Path, visited: &mut Vec<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if visited.contains(&canonical) {
        return Err(DuettoError::ConfigInvalid(format!(
            "cyclic extends chain at {}",
            path.display()
        )));
    }
    visited.push(canonical);

    let raw = fs::read_to_string(path)?;
    let mut overlay: Value = serde_json::from_str(&raw)
        .map_err(|e| DuettoError::ConfigInvalid(format!("{}: {e}", path.display())))?;

    let extends = overlay
        .as_object_mut()
        .and_then(|map| map.remove("extends"))
        .and_then(|v| v.as_str().map(String::from));

    match extends {
        Some(base_ref) => {
            let base_path = path
                .parent()
                .map(|dir| dir.join(&base_ref))
                .unwrap_or_else(|| PathBuf::from(&base_ref));
            let base = load_value(&base_path, visited)?;
            Ok(merge(base, overlay))
        }
        None => Ok(overlay),
    }
}

/// Deep-merge two JSON values; `overlay` keys win, objects merge recursively.
fn merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}
