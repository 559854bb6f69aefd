//! Per-sample mixer and effects chain for the output bus.
//!
//! ## Signal flow (per sample)
//!
//! ```text
//! backing ──· instrument gain ──────────────────────────────┐
//! guide ──· guide gain ─ timbre match ─ envelope (gate) ─┬──┤
//!                                                        │  │
//!                                              FDN reverb┘  ├─→ out L/R
//! mic ─ leak comp ─ crowd cancel ─· monitor gain ───────────┘
//! ```
//!
//! The gate's block-level gain reaches the guide through the envelope
//! shaper: rises are instantaneous, falls are held for `envelope_hold_ms`
//! and then released along a per-sample one-pole. Everything here is
//! allocation-free after construction and reset on transport stop.

use super::reverb::ReverbTail;

/// Block-level parameter snapshot applied before the mix pass.
#[derive(Debug, Clone, Copy)]
pub struct MixParams {
    pub instrument_gain: f32,
    pub guide_gain: f32,
    /// Linear gate gain for this block (the envelope's target).
    pub gate_gain: f32,
    /// False forces the guide contribution to exactly zero (manual
    /// AlwaysOff or guide mute).
    pub guide_audible: bool,
    pub mic_monitor_gain: f32,
    pub reverb_mix: f32,
    pub timbre_strength: f32,
    pub playback_leak_compensation: f32,
    pub crowd_adapt_rate: f32,
    pub crowd_recovery_rate: f32,
    pub crowd_clamp: f32,
    pub envelope_hold_ms: f32,
    pub envelope_release_ms: f32,
    pub envelope_release_mod: f32,
    /// True while the fused confidence is falling but still above the gate's
    /// off threshold; stretches the envelope release.
    pub confidence_falling_soft: bool,
}

impl Default for MixParams {
    fn default() -> Self {
        Self {
            instrument_gain: 1.0,
            guide_gain: 1.0,
            gate_gain: 0.0,
            guide_audible: true,
            mic_monitor_gain: 0.5,
            reverb_mix: 0.2,
            timbre_strength: 0.25,
            playback_leak_compensation: 0.0,
            crowd_adapt_rate: 0.02,
            crowd_recovery_rate: 0.05,
            crowd_clamp: 0.25,
            envelope_hold_ms: 120.0,
            envelope_release_ms: 240.0,
            envelope_release_mod: 1.5,
            confidence_falling_soft: false,
        }
    }
}

/// One mixed output sample plus the raw mic contribution for any extra
/// output channels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MixedSample {
    pub left: f32,
    pub right: f32,
    pub mic_contribution: f32,
}

/// Leaky adaptive estimate of sustained ambient (crowd) level, subtracted
/// from the mic path while preserving transients.
#[derive(Debug, Clone, Copy, Default)]
struct CrowdCanceller {
    estimate: f32,
}

impl CrowdCanceller {
    #[inline]
    fn process(&mut self, mic: f32, adapt: f32, recover: f32, clamp: f32) -> f32 {
        let magnitude = mic.abs();
        if magnitude < clamp {
            self.estimate += adapt * (magnitude - self.estimate);
        } else {
            self.estimate *= 1.0 - recover;
        }
        // f32::signum maps +0.0 to 1.0; silence must stay silent.
        let sign = if mic > 0.0 {
            1.0
        } else if mic < 0.0 {
            -1.0
        } else {
            0.0
        };
        mic - self.estimate * sign
    }

    fn reset(&mut self) {
        self.estimate = 0.0;
    }
}

/// Tracks a spectral-centroid proxy of the mic over ~100 ms and tilts the
/// guide with a matching one-pole low-pass, blended by strength.
#[derive(Debug, Clone, Copy)]
struct TimbreMatcher {
    level_env: f32,
    diff_env: f32,
    prev_mic: f32,
    guide_state: [f32; 2],
    env_coef: f32,
}

impl TimbreMatcher {
    fn new(sample_rate: f64) -> Self {
        // ~100 ms integration window for the centroid proxy.
        let env_coef = (-1000.0 / (100.0 * sample_rate)) as f32;
        Self {
            level_env: 0.0,
            diff_env: 0.0,
            prev_mic: 0.0,
            guide_state: [0.0; 2],
            env_coef: env_coef.exp(),
        }
    }

    /// Observe one mic sample.
    #[inline]
    fn observe(&mut self, mic: f32) {
        let level = mic.abs();
        let diff = (mic - self.prev_mic).abs();
        self.prev_mic = mic;
        self.level_env = self.env_coef * self.level_env + (1.0 - self.env_coef) * level;
        self.diff_env = self.env_coef * self.diff_env + (1.0 - self.env_coef) * diff;
    }

    /// Filter one guide sample on `channel`, blended by `strength`.
    #[inline]
    fn shape(&mut self, channel: usize, guide: f32, strength: f32) -> f32 {
        if strength <= 0.0 {
            return guide;
        }
        // Brighter mic (high diff/level ratio) opens the guide filter; a
        // darker mic closes it down.
        let brightness = (self.diff_env / (self.level_env + 1.0e-6)).clamp(0.05, 1.0);
        let state = &mut self.guide_state[channel];
        *state += brightness * (guide - *state);
        guide + strength * (*state - guide)
    }

    fn reset(&mut self) {
        self.level_env = 0.0;
        self.diff_env = 0.0;
        self.prev_mic = 0.0;
        self.guide_state = [0.0; 2];
    }
}

/// Applies the gate gain to the guide bus with hold + modulated release.
#[derive(Debug, Clone, Copy)]
struct EnvelopeShaper {
    level: f32,
    hold_remaining_ms: f32,
    sample_ms: f32,
}

impl EnvelopeShaper {
    fn new(sample_rate: f64) -> Self {
        Self {
            level: 0.0,
            hold_remaining_ms: 0.0,
            sample_ms: (1000.0 / sample_rate) as f32,
        }
    }

    #[inline]
    fn step(&mut self, target: f32, hold_ms: f32, release_ms: f32, release_mod: f32, soft: bool) -> f32 {
        if target >= self.level {
            // Gate opening: follow immediately and arm the hold.
            self.level = target;
            self.hold_remaining_ms = hold_ms;
        } else if self.hold_remaining_ms > 0.0 {
            self.hold_remaining_ms -= self.sample_ms;
        } else {
            let mut coef = (-self.sample_ms / release_ms.max(1.0)).exp();
            if soft {
                coef = (coef * release_mod).min(1.0);
            }
            self.level = target + (self.level - target) * coef;
        }
        self.level
    }

    fn reset(&mut self) {
        self.level = 0.0;
        self.hold_remaining_ms = 0.0;
    }
}

/// The per-sample mix engine for the output bus.
#[derive(Debug, Clone)]
pub struct Mixer {
    params: MixParams,
    crowd: CrowdCanceller,
    timbre: TimbreMatcher,
    envelope: EnvelopeShaper,
    reverb: ReverbTail,
    last_out_mid: f32,
}

impl Mixer {
    pub fn new(sample_rate: f64, reverb_tail_seconds: f32) -> Self {
        Self {
            params: MixParams::default(),
            crowd: CrowdCanceller::default(),
            timbre: TimbreMatcher::new(sample_rate),
            envelope: EnvelopeShaper::new(sample_rate),
            reverb: ReverbTail::new(sample_rate, reverb_tail_seconds),
            last_out_mid: 0.0,
        }
    }

    /// Install this block's parameter snapshot. Called once per callback.
    pub fn set_params(&mut self, params: MixParams) {
        self.params = params;
    }

    /// Retune the reverb decay. Allocation-free.
    pub fn set_reverb_tail_seconds(&mut self, tail_seconds: f32) {
        self.reverb.set_tail_seconds(tail_seconds);
    }

    /// Mix one sample of backing, guide and mic into a stereo pair.
    #[inline]
    pub fn process_sample(
        &mut self,
        backing_l: f32,
        backing_r: f32,
        guide_l: f32,
        guide_r: f32,
        mic: f32,
    ) -> MixedSample {
        let p = self.params;

        let backing_l = backing_l * p.instrument_gain;
        let backing_r = backing_r * p.instrument_gain;

        // Mic path: compensate speaker bleed, then strip sustained ambient
        // level while keeping transients.
        let mic = mic - p.playback_leak_compensation * self.last_out_mid;
        self.timbre.observe(mic);
        let mic = self
            .crowd
            .process(mic, p.crowd_adapt_rate, p.crowd_recovery_rate, p.crowd_clamp);

        // Guide path: config gain, timbre tilt, then the gate envelope.
        let envelope = self.envelope.step(
            p.gate_gain,
            p.envelope_hold_ms,
            p.envelope_release_ms,
            p.envelope_release_mod,
            p.confidence_falling_soft,
        );
        let (guide_l, guide_r) = if p.guide_audible {
            let l = self.timbre.shape(0, guide_l * p.guide_gain, p.timbre_strength);
            let r = self.timbre.shape(1, guide_r * p.guide_gain, p.timbre_strength);
            (l * envelope, r * envelope)
        } else {
            (0.0, 0.0)
        };

        let (wet_l, wet_r) = self.reverb.process((guide_l + guide_r) * 0.5);

        let mic_contribution = mic * p.mic_monitor_gain;
        let left = backing_l + guide_l + wet_l * p.reverb_mix + mic_contribution;
        let right = backing_r + guide_r + wet_r * p.reverb_mix + mic_contribution;

        self.last_out_mid = (left + right) * 0.5;

        MixedSample {
            left,
            right,
            mic_contribution,
        }
    }

    /// Clear all effect state (transport stop).
    pub fn reset(&mut self) {
        self.crowd.reset();
        self.timbre.reset();
        self.envelope.reset();
        self.reverb.reset();
        self.last_out_mid = 0.0;
    }
}
