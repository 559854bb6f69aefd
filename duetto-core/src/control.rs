//! Lock-free state sharing between the control thread and the audio thread.
//!
//! ## Protocol
//!
//! - Every UI-tunable scalar lives in an atomic cell. The control thread
//!   writes at any time; the audio thread takes one [`ControlState::snapshot`]
//!   at the top of each `process` call, so changes land at block boundaries
//!   and never mid-block.
//! - Track buffers are published through a single-writer single-reader
//!   `ringbuf` hand-off. The audio thread swaps the `Arc` in and pushes the
//!   displaced buffer onto a retire ring, so deallocation happens on the
//!   control thread.
//!
//! Nothing in this module blocks or allocates on the audio-thread side.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use ringbuf::{traits::Split, HeapRb};
use serde::{Deserialize, Serialize};

pub use ringbuf::traits::{Consumer, Producer};

use crate::config::RuntimeConfig;
use crate::dsp::ManualMode;
use crate::media::TrackBuffer;

/// An `f32` stored in an `AtomicU32` through its bit pattern.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Transport state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    #[default]
    Stopped,
    Paused,
    Playing,
}

impl TransportState {
    pub fn as_u8(self) -> u8 {
        match self {
            TransportState::Stopped => 0,
            TransportState::Paused => 1,
            TransportState::Playing => 2,
        }
    }

    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TransportState::Paused,
            2 => TransportState::Playing,
            _ => TransportState::Stopped,
        }
    }
}

/// Which media slot a message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSlotId {
    Backing,
    Guide,
}

/// A buffer published from the control thread to the audio thread. An empty
/// buffer clears the slot.
#[derive(Debug, Clone)]
pub struct TrackUpdate {
    pub slot: TrackSlotId,
    pub buffer: Arc<TrackBuffer>,
}

pub type TrackUpdateProducer = ringbuf::HeapProd<TrackUpdate>;
pub type TrackUpdateConsumer = ringbuf::HeapCons<TrackUpdate>;
pub type RetiredProducer = ringbuf::HeapProd<Arc<TrackBuffer>>;
pub type RetiredConsumer = ringbuf::HeapCons<Arc<TrackBuffer>>;

/// Capacity of the hand-off rings. Track loads are rare; 8 in-flight updates
/// is far more than a UI can produce between blocks.
pub const TRACK_RING_CAPACITY: usize = 8;

/// Create the publish and retire rings for one pipeline.
pub fn create_track_rings() -> (
    (TrackUpdateProducer, TrackUpdateConsumer),
    (RetiredProducer, RetiredConsumer),
) {
    (
        HeapRb::<TrackUpdate>::new(TRACK_RING_CAPACITY).split(),
        HeapRb::<Arc<TrackBuffer>>::new(TRACK_RING_CAPACITY).split(),
    )
}

/// Block-boundary view of every tunable parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlSnapshot {
    pub transport: TransportState,
    pub manual_mode: ManualMode,
    pub guide_mute: bool,
    pub looping: bool,
    pub instrument_gain_db: f32,
    pub guide_gain_db: f32,
    pub mic_monitor_gain_db: f32,
    pub noise_floor_amplitude: f32,
    pub phrase_confidence: f32,
    pub reverb_mix: f32,
    pub reverb_tail_seconds: f32,
    pub timbre_strength: f32,
    pub envelope_hold_ms: f32,
    pub envelope_release_ms: f32,
    pub envelope_release_mod: f32,
    pub crowd_adapt_rate: f32,
    pub crowd_recovery_rate: f32,
    pub crowd_clamp: f32,
    pub playback_leak_compensation: f32,
    pub gate_threshold_on: f32,
    pub gate_threshold_off: f32,
}

/// The atomic cells themselves. One instance is shared between the engine
/// (writer) and the pipeline (block-top reader).
#[derive(Debug)]
pub struct ControlState {
    transport: AtomicU8,
    manual_mode: AtomicU8,
    guide_mute: AtomicBool,
    looping: AtomicBool,
    calibration_restart: AtomicBool,
    /// Bumped on every stop so the pipeline performs its reset even when no
    /// callback ran while the transport cell read `Stopped`.
    stop_epoch: AtomicU64,
    instrument_gain_db: AtomicF32,
    guide_gain_db: AtomicF32,
    mic_monitor_gain_db: AtomicF32,
    noise_floor_amplitude: AtomicF32,
    phrase_confidence: AtomicF32,
    reverb_mix: AtomicF32,
    reverb_tail_seconds: AtomicF32,
    timbre_strength: AtomicF32,
    envelope_hold_ms: AtomicF32,
    envelope_release_ms: AtomicF32,
    envelope_release_mod: AtomicF32,
    crowd_adapt_rate: AtomicF32,
    crowd_recovery_rate: AtomicF32,
    crowd_clamp: AtomicF32,
    playback_leak_compensation: AtomicF32,
    /// threshold_on in the high 32 bits, threshold_off in the low 32, so the
    /// pair always changes together.
    gate_thresholds: AtomicU64,
}

fn pack_thresholds(on: f32, off: f32) -> u64 {
    (u64::from(on.to_bits()) << 32) | u64::from(off.to_bits())
}

fn unpack_thresholds(packed: u64) -> (f32, f32) {
    (
        f32::from_bits((packed >> 32) as u32),
        f32::from_bits(packed as u32),
    )
}

impl ControlState {
    /// Seed every cell from a configuration snapshot.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let env = &config.environment;
        Self {
            transport: AtomicU8::new(TransportState::Stopped.as_u8()),
            manual_mode: AtomicU8::new(ManualMode::Auto.as_u8()),
            guide_mute: AtomicBool::new(false),
            looping: AtomicBool::new(config.media.looping),
            calibration_restart: AtomicBool::new(false),
            stop_epoch: AtomicU64::new(0),
            instrument_gain_db: AtomicF32::new(config.media.instrument_gain_db),
            guide_gain_db: AtomicF32::new(config.media.guide_gain_db),
            mic_monitor_gain_db: AtomicF32::new(config.media.mic_monitor_gain_db),
            noise_floor_amplitude: AtomicF32::new(env.noise_floor_amplitude),
            phrase_confidence: AtomicF32::new(0.0),
            reverb_mix: AtomicF32::new(env.reverb_mix),
            reverb_tail_seconds: AtomicF32::new(env.reverb_tail_seconds),
            timbre_strength: AtomicF32::new(env.timbre_match_strength),
            envelope_hold_ms: AtomicF32::new(env.envelope_hold_ms),
            envelope_release_ms: AtomicF32::new(env.envelope_release_ms),
            envelope_release_mod: AtomicF32::new(env.envelope_release_mod),
            crowd_adapt_rate: AtomicF32::new(env.crowd_cancel_adapt_rate),
            crowd_recovery_rate: AtomicF32::new(env.crowd_cancel_recovery_rate),
            crowd_clamp: AtomicF32::new(env.crowd_cancel_clamp),
            playback_leak_compensation: AtomicF32::new(env.playback_leak_compensation),
            gate_thresholds: AtomicU64::new(pack_thresholds(
                config.gate.threshold_on,
                config.gate.threshold_off,
            )),
        }
    }

    /// One coherent block-boundary view. Called by the audio thread.
    pub fn snapshot(&self) -> ControlSnapshot {
        let (gate_threshold_on, gate_threshold_off) =
            unpack_thresholds(self.gate_thresholds.load(Ordering::Relaxed));
        ControlSnapshot {
            transport: TransportState::from_u8(self.transport.load(Ordering::Relaxed)),
            manual_mode: ManualMode::from_u8(self.manual_mode.load(Ordering::Relaxed)),
            guide_mute: self.guide_mute.load(Ordering::Relaxed),
            looping: self.looping.load(Ordering::Relaxed),
            instrument_gain_db: self.instrument_gain_db.load(),
            guide_gain_db: self.guide_gain_db.load(),
            mic_monitor_gain_db: self.mic_monitor_gain_db.load(),
            noise_floor_amplitude: self.noise_floor_amplitude.load(),
            phrase_confidence: self.phrase_confidence.load(),
            reverb_mix: self.reverb_mix.load(),
            reverb_tail_seconds: self.reverb_tail_seconds.load(),
            timbre_strength: self.timbre_strength.load(),
            envelope_hold_ms: self.envelope_hold_ms.load(),
            envelope_release_ms: self.envelope_release_ms.load(),
            envelope_release_mod: self.envelope_release_mod.load(),
            crowd_adapt_rate: self.crowd_adapt_rate.load(),
            crowd_recovery_rate: self.crowd_recovery_rate.load(),
            crowd_clamp: self.crowd_clamp.load(),
            playback_leak_compensation: self.playback_leak_compensation.load(),
            gate_threshold_on,
            gate_threshold_off,
        }
    }

    // ── Control-thread writers ───────────────────────────────────────────

    pub fn set_transport(&self, state: TransportState) {
        self.transport.store(state.as_u8(), Ordering::Relaxed);
    }

    /// Stop the transport and mark a new stop epoch.
    pub fn signal_stop(&self) {
        self.stop_epoch.fetch_add(1, Ordering::Relaxed);
        self.set_transport(TransportState::Stopped);
    }

    pub fn stop_epoch(&self) -> u64 {
        self.stop_epoch.load(Ordering::Relaxed)
    }

    pub fn transport(&self) -> TransportState {
        TransportState::from_u8(self.transport.load(Ordering::Relaxed))
    }

    pub fn set_manual_mode(&self, mode: ManualMode) {
        self.manual_mode.store(mode.as_u8(), Ordering::Relaxed);
    }

    pub fn manual_mode(&self) -> ManualMode {
        ManualMode::from_u8(self.manual_mode.load(Ordering::Relaxed))
    }

    pub fn set_guide_mute(&self, mute: bool) {
        self.guide_mute.store(mute, Ordering::Relaxed);
    }

    pub fn guide_mute(&self) -> bool {
        self.guide_mute.load(Ordering::Relaxed)
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Relaxed);
    }

    pub fn set_instrument_gain_db(&self, db: f32) {
        self.instrument_gain_db.store(db);
    }

    pub fn set_guide_gain_db(&self, db: f32) {
        self.guide_gain_db.store(db);
    }

    pub fn set_mic_monitor_gain_db(&self, db: f32) {
        self.mic_monitor_gain_db.store(db);
    }

    pub fn set_noise_floor_amplitude(&self, amplitude: f32) {
        self.noise_floor_amplitude.store(amplitude);
    }

    pub fn noise_floor_amplitude(&self) -> f32 {
        self.noise_floor_amplitude.load()
    }

    pub fn set_phrase_confidence(&self, confidence: f32) {
        self.phrase_confidence.store(confidence.clamp(0.0, 1.0));
    }

    pub fn set_reverb(&self, mix: f32, tail_seconds: f32) {
        self.reverb_mix.store(mix.clamp(0.0, 1.0));
        self.reverb_tail_seconds.store(tail_seconds.max(0.05));
    }

    pub fn set_timbre_strength(&self, strength: f32) {
        self.timbre_strength.store(strength.clamp(0.0, 1.0));
    }

    pub fn set_envelope(&self, hold_ms: f32, release_ms: f32, release_mod: f32) {
        self.envelope_hold_ms.store(hold_ms.max(0.0));
        self.envelope_release_ms.store(release_ms.max(0.0));
        self.envelope_release_mod.store(release_mod.max(0.0));
    }

    pub fn set_crowd_cancel(&self, adapt_rate: f32, recovery_rate: f32, clamp: f32) {
        self.crowd_adapt_rate.store(adapt_rate.clamp(0.0, 1.0));
        self.crowd_recovery_rate.store(recovery_rate.clamp(0.0, 1.0));
        self.crowd_clamp.store(clamp.max(0.0));
    }

    pub fn set_playback_leak_compensation(&self, leak: f32) {
        self.playback_leak_compensation.store(leak.clamp(0.0, 1.0));
    }

    pub fn set_gate_thresholds(&self, threshold_on: f32, threshold_off: f32) {
        self.gate_thresholds
            .store(pack_thresholds(threshold_on, threshold_off), Ordering::Relaxed);
    }

    pub fn request_calibration_restart(&self) {
        self.calibration_restart.store(true, Ordering::Relaxed);
    }

    /// Audio-thread side: consume a pending calibration-restart request.
    pub fn take_calibration_restart(&self) -> bool {
        self.calibration_restart.swap(false, Ordering::Relaxed)
    }
}
