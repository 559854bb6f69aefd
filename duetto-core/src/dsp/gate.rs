//! Hysteretic confidence gate driving the guide-vocal gain.
//!
//! ## State machine (one `update` per device block)
//!
//! 1. Manual override: AlwaysOn targets 0 dB, AlwaysOff targets `duck_db`.
//! 2. Hysteresis: `frames_on` consecutive blocks at or above `threshold_on`
//!    open the gate and arm the hold timer; `frames_off` consecutive blocks
//!    at or below `threshold_off` close it, but only once the hold timer has
//!    expired. Mid-band confidence clears only the "on" streak — a growing
//!    "off" judgement survives hovering confidence.
//! 3. One-pole exponential glide toward the target: the attack coefficient
//!    applies while the gain is above target (guide coming down), the
//!    release coefficient while below (guide fading back in).

use serde::{Deserialize, Serialize};

use crate::config::GateParams;

const ZERO_DB: f32 = 0.0;

/// Manual gate override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManualMode {
    /// Confidence-driven operation.
    #[default]
    Auto,
    /// Guide always audible (gate held open).
    AlwaysOn,
    /// Guide always ducked (gate held closed).
    AlwaysOff,
}

impl ManualMode {
    pub fn as_u8(self) -> u8 {
        match self {
            ManualMode::Auto => 0,
            ManualMode::AlwaysOn => 1,
            ManualMode::AlwaysOff => 2,
        }
    }

    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ManualMode::AlwaysOn,
            2 => ManualMode::AlwaysOff,
            _ => ManualMode::Auto,
        }
    }
}

/// Produces the guide bus gain, in dB, once per device block.
#[derive(Debug, Clone)]
pub struct ConfidenceGate {
    params: GateParams,
    sample_rate: f64,
    block_size: usize,
    gain_db: f32,
    target_db: f32,
    hold_timer_ms: f32,
    consecutive_on: u32,
    consecutive_off: u32,
    manual_mode: ManualMode,
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        let params = GateParams::default();
        Self {
            sample_rate: 48_000.0,
            block_size: 128,
            gain_db: params.duck_db,
            target_db: params.duck_db,
            hold_timer_ms: 0.0,
            consecutive_on: 0,
            consecutive_off: 0,
            manual_mode: ManualMode::Auto,
            params,
        }
    }
}

impl ConfidenceGate {
    /// Reconfigure for a new sample rate / block size. Resets the gate to its
    /// closed (ducked) state; the manual mode survives.
    pub fn configure(&mut self, sample_rate: f64, block_size: usize, params: GateParams) {
        self.sample_rate = sample_rate;
        self.block_size = block_size.max(1);
        self.params = params;
        self.reset();
    }

    /// Return to the closed state without touching the configuration.
    pub fn reset(&mut self) {
        self.gain_db = self.params.duck_db;
        self.target_db = self.params.duck_db;
        self.hold_timer_ms = 0.0;
        self.consecutive_on = 0;
        self.consecutive_off = 0;
    }

    pub fn set_manual_mode(&mut self, mode: ManualMode) {
        self.manual_mode = mode;
    }

    pub fn manual_mode(&self) -> ManualMode {
        self.manual_mode
    }

    /// Replace the on/off thresholds without resetting gate state.
    pub fn set_thresholds(&mut self, threshold_on: f32, threshold_off: f32) {
        self.params.threshold_on = threshold_on;
        self.params.threshold_off = threshold_off;
    }

    pub fn current_gain_db(&self) -> f32 {
        self.gain_db
    }

    /// True once the smoothed gain has effectively reached 0 dB.
    pub fn is_open(&self) -> bool {
        self.target_db == ZERO_DB
    }

    /// Advance the gate by one device block and return the new gain in dB.
    ///
    /// `vad` and `pitch` are carried for future gate policies; the current
    /// policy keys purely off the fused confidence.
    pub fn update(&mut self, confidence: f32, _vad: f32, _pitch: f32) -> f32 {
        match self.manual_mode {
            ManualMode::AlwaysOn => {
                self.target_db = ZERO_DB;
            }
            ManualMode::AlwaysOff => {
                self.target_db = self.params.duck_db;
            }
            ManualMode::Auto => {
                if confidence >= self.params.threshold_on {
                    self.consecutive_on += 1;
                    self.consecutive_off = 0;
                } else if confidence <= self.params.threshold_off {
                    self.consecutive_off += 1;
                    self.consecutive_on = 0;
                } else {
                    // Mid-band: only the "on" streak breaks.
                    self.consecutive_on = 0;
                }

                if self.consecutive_on >= self.params.frames_on {
                    self.target_db = ZERO_DB;
                    self.hold_timer_ms = self.params.hold_ms;
                } else if self.consecutive_off >= self.params.frames_off && self.hold_timer_ms <= 0.0
                {
                    self.target_db = self.params.duck_db;
                }
            }
        }

        let elapsed_ms = (self.block_size as f64 / self.sample_rate * 1000.0) as f32;
        if self.hold_timer_ms > 0.0 {
            self.hold_timer_ms = (self.hold_timer_ms - elapsed_ms).max(0.0);
        }

        let attack_coef = (-elapsed_ms / self.params.attack_ms.max(1.0)).exp();
        let release_coef = (-elapsed_ms / self.params.release_ms.max(1.0)).exp();

        if self.gain_db > self.target_db {
            self.gain_db = self.target_db + (self.gain_db - self.target_db) * attack_coef;
        } else {
            self.gain_db = self.target_db + (self.gain_db - self.target_db) * release_coef;
        }

        self.gain_db = self.gain_db.clamp(self.params.duck_db, ZERO_DB);
        self.gain_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 48_000.0;
    const BLOCK: usize = 128;

    fn gate() -> ConfidenceGate {
        let mut g = ConfidenceGate::default();
        g.configure(FS, BLOCK, GateParams::default());
        g
    }

    fn block_ms() -> f32 {
        (BLOCK as f64 / FS * 1000.0) as f32
    }

    #[test]
    fn starts_closed_at_duck() {
        let g = gate();
        assert_eq!(g.current_gain_db(), GateParams::default().duck_db);
    }

    #[test]
    fn opens_on_third_confident_block_then_rises() {
        // Scenario: confidence 0.0 for 10 blocks then 1.0 continuously with
        // frames_on = 3; the third confident block flips the target to 0 dB,
        // and the smoothed gain must not cross −6 dB before ~attack_ms/2.
        let mut g = gate();
        for _ in 0..10 {
            g.update(0.0, 0.0, 0.0);
        }
        assert!(!g.is_open());

        g.update(1.0, 1.0, 1.0);
        assert!(!g.is_open(), "open after 1 confident block");
        g.update(1.0, 1.0, 1.0);
        assert!(!g.is_open(), "open after 2 confident blocks");
        g.update(1.0, 1.0, 1.0);
        assert!(g.is_open(), "not open after 3 confident blocks");

        // Count blocks until the glide crosses −6 dB (target already 0).
        let mut blocks_to_cross = 0;
        while g.current_gain_db() < -6.0 {
            g.update(1.0, 1.0, 1.0);
            blocks_to_cross += 1;
            assert!(blocks_to_cross < 1_000, "never crossed −6 dB");
        }
        let elapsed_ms = blocks_to_cross as f32 * block_ms();
        assert!(
            elapsed_ms >= 10.0,
            "−6 dB crossed after only {elapsed_ms} ms"
        );
    }

    #[test]
    fn hold_prevents_close_then_release_reaches_duck() {
        // Scenario: open the gate, then feed confidence 0.0. The gain must
        // stay at 0 dB for at least hold_ms, then descend and effectively
        // reach duck_db within ~5·release_ms.
        let params = GateParams::default();
        let mut g = gate();
        for _ in 0..20 {
            g.update(1.0, 1.0, 1.0);
        }
        assert!(g.current_gain_db() > -0.5);

        let hold_blocks = (params.hold_ms / block_ms()).floor() as usize;
        for i in 0..hold_blocks {
            g.update(0.0, 0.0, 0.0);
            assert!(
                g.current_gain_db() > -0.5,
                "gain fell to {} during hold (block {i})",
                g.current_gain_db()
            );
        }

        let release_budget = (5.0 * params.release_ms / block_ms()).ceil() as usize + hold_blocks;
        let mut reached = false;
        for _ in 0..release_budget {
            g.update(0.0, 0.0, 0.0);
            if g.current_gain_db() <= params.duck_db + 0.2 {
                reached = true;
                break;
            }
        }
        assert!(reached, "gain never reached duck, at {}", g.current_gain_db());
    }

    #[test]
    fn mid_band_confidence_preserves_off_streak() {
        let params = GateParams::default();
        let mut g = gate();
        for _ in 0..20 {
            g.update(1.0, 1.0, 1.0);
        }
        // Drain the hold timer with mid-band confidence.
        let drain = (params.hold_ms / block_ms()).ceil() as usize + 1;
        for _ in 0..drain {
            g.update(0.5, 0.0, 0.0);
        }

        // Alternate low / mid-band: the off streak must keep growing through
        // mid-band blocks and eventually close the gate.
        let mut closed = false;
        for i in 0..(params.frames_off as usize * 4) {
            let confidence = if i % 2 == 0 { 0.1 } else { 0.5 };
            g.update(confidence, 0.0, 0.0);
            if !g.is_open() {
                closed = true;
                break;
            }
        }
        assert!(closed, "mid-band blocks cancelled the off judgement");
    }

    #[test]
    fn gain_always_within_duck_and_zero() {
        let mut g = gate();
        let mut confidence = 0.0f32;
        for i in 0..2_000 {
            // Deterministic sweep crossing both thresholds repeatedly.
            confidence = (confidence + 0.137 + (i % 7) as f32 * 0.031).fract();
            let gain = g.update(confidence, confidence, confidence);
            assert!(
                (GateParams::default().duck_db..=0.0).contains(&gain),
                "gain {gain} out of range at iteration {i}"
            );
        }
    }

    #[test]
    fn always_on_overrides_low_confidence() {
        let mut g = gate();
        g.set_manual_mode(ManualMode::AlwaysOn);
        let mut gain = g.current_gain_db();
        for _ in 0..500 {
            gain = g.update(0.0, 0.0, 0.0);
        }
        assert!(gain > -0.1, "gain={gain}");
    }

    #[test]
    fn always_off_overrides_high_confidence() {
        let mut g = gate();
        g.set_manual_mode(ManualMode::AlwaysOff);
        for _ in 0..500 {
            g.update(1.0, 1.0, 1.0);
        }
        assert!(g.current_gain_db() <= GateParams::default().duck_db + 0.1);
    }

    #[test]
    fn manual_mode_survives_configure() {
        let mut g = gate();
        g.set_manual_mode(ManualMode::AlwaysOff);
        g.configure(FS, 256, GateParams::default());
        assert_eq!(g.manual_mode(), ManualMode::AlwaysOff);
    }
}
