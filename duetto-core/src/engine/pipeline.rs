//! The per-callback audio pipeline.
//!
//! ## Stages (per `process` call)
//!
//! ```text
//! 1. Drain pending track updates (SPSC ring, retired Arcs returned)
//! 2. Snapshot the atomic control cells — parameters land at block edges
//! 3. Apply transport transitions (stop resets cursors / rings / effects)
//! 4. Analysis pass over the mic block:
//!      calibrator (until complete) · VAD ring (10 ms frames) · pitch ring
//!      (64 ms hops), each downsampled to the model rate by block averaging
//! 5. Fuse confidence, run the gate once for this block
//! 6. Mix pass (only while Playing): media reads → effects chain → output,
//!    synchronized cursor advance per sample
//! 7. Publish the metrics snapshot
//! ```
//!
//! The whole call is wait-free: no allocation, no locks, no I/O. Frontend
//! errors collapse to a score of 0 and processing continues.

use std::sync::Arc;

use crate::calibration::Calibrator;
use crate::config::RuntimeConfig;
use crate::control::{
    Consumer, ControlSnapshot, ControlState, Producer, RetiredProducer, TrackSlotId,
    TrackUpdateConsumer, TransportState,
};
use crate::dsp::{db_to_linear, ConfidenceGate, ManualMode, MixParams, Mixer};
use crate::error::Result;
use crate::media::{CursorAdvance, TrackBuffer, TrackSlot};
use crate::metrics::{MetricsCell, MetricsSnapshot};
use crate::pitch::{PitchFrontend, HOP_SAMPLES};
use crate::vad::{VadFrontend, FRAME_SAMPLES};

/// Everything the pipeline needs, passed as one struct so construction sites
/// stay tidy.
pub struct PipelineContext {
    pub config: RuntimeConfig,
    pub control: Arc<ControlState>,
    pub metrics: Arc<MetricsCell>,
    pub track_updates: TrackUpdateConsumer,
    pub retired: RetiredProducer,
    pub vad: Box<dyn VadFrontend>,
    pub pitch: Box<dyn PitchFrontend>,
}

/// The pipeline core: owns the gate, calibrator, mixer, media slots,
/// analysis rings and both frontends. Sole occupant of the audio thread.
pub struct Pipeline {
    config: RuntimeConfig,
    control: Arc<ControlState>,
    metrics: Arc<MetricsCell>,
    track_updates: TrackUpdateConsumer,
    retired: RetiredProducer,

    vad: Box<dyn VadFrontend>,
    pitch: Box<dyn PitchFrontend>,
    gate: ConfidenceGate,
    calibrator: Calibrator,
    mixer: Mixer,

    backing: TrackSlot,
    guide: TrackSlot,

    // Device-rate staging rings, downsampled into the model-rate scratch
    // buffers by averaging groups of `downsample_factor` samples.
    vad_ring: Vec<f32>,
    vad_fill: usize,
    vad_frame: Vec<f32>,
    pitch_ring: Vec<f32>,
    pitch_fill: usize,
    pitch_hop: Vec<f32>,
    downsample_factor: usize,

    vad_score: f32,
    pitch_score: f32,
    confidence: f32,
    previous_confidence: f32,

    calibration_started: bool,
    end_of_track: bool,
    blocks_processed: u64,
    seen_stop_epoch: u64,
}

impl Pipeline {
    /// Build a pipeline from a validated configuration snapshot.
    ///
    /// All buffers are sized here; `process` never allocates.
    pub fn new(ctx: PipelineContext) -> Result<Self> {
        ctx.config.validate()?;

        let factor = ctx.config.downsample_factor().max(1);
        let mut gate = ConfidenceGate::default();
        gate.configure(
            ctx.config.sample_rate_hz,
            ctx.config.buffer_samples,
            ctx.config.gate,
        );

        let mixer = Mixer::new(
            ctx.config.sample_rate_hz,
            ctx.config.environment.reverb_tail_seconds,
        );

        Ok(Self {
            vad_ring: vec![0.0; FRAME_SAMPLES * factor],
            vad_fill: 0,
            vad_frame: vec![0.0; FRAME_SAMPLES],
            pitch_ring: vec![0.0; HOP_SAMPLES * factor],
            pitch_fill: 0,
            pitch_hop: vec![0.0; HOP_SAMPLES],
            downsample_factor: factor,
            gate,
            calibrator: Calibrator::default(),
            mixer,
            backing: TrackSlot::default(),
            guide: TrackSlot::default(),
            vad_score: 0.0,
            pitch_score: 0.0,
            confidence: 0.0,
            previous_confidence: 0.0,
            calibration_started: false,
            end_of_track: false,
            blocks_processed: 0,
            seen_stop_epoch: ctx.control.stop_epoch(),
            config: ctx.config,
            control: ctx.control,
            metrics: ctx.metrics,
            track_updates: ctx.track_updates,
            retired: ctx.retired,
            vad: ctx.vad,
            pitch: ctx.pitch,
        })
    }

    // ── Transport (thin wrappers over the shared control cells) ──────────

    pub fn play(&self) {
        self.control.set_transport(TransportState::Playing);
    }

    pub fn pause(&self) {
        self.control.set_transport(TransportState::Paused);
    }

    /// Stop and reset cursors, analysis rings and effect state. The reset
    /// itself runs at the top of the next `process` call.
    pub fn stop(&self) {
        self.control.signal_stop();
    }

    pub fn transport_state(&self) -> TransportState {
        self.control.transport()
    }

    pub fn is_playing(&self) -> bool {
        self.transport_state() == TransportState::Playing
    }

    // ── Quiesced-thread operations ───────────────────────────────────────

    /// Install a backing buffer directly (control path while quiesced, and
    /// the engine's rebuild-after-reconfigure path).
    pub fn install_backing(&mut self, buffer: Arc<TrackBuffer>) {
        self.backing.install(buffer);
        self.end_of_track = false;
    }

    /// Install a guide buffer directly.
    pub fn install_guide(&mut self, buffer: Arc<TrackBuffer>) {
        self.guide.install(buffer);
        self.end_of_track = false;
    }

    /// Rebuild the gate and analysis staging for a new block size while
    /// preserving transport, manual mode, mute and loaded media.
    ///
    /// Must only be called while the audio thread is quiesced.
    ///
    /// # Errors
    /// `DuettoError::ConfigInvalid` for a zero block size; the previous
    /// configuration stays in effect.
    pub fn update_buffer_size(&mut self, buffer_samples: usize) -> Result<()> {
        if buffer_samples == 0 {
            return Err(crate::error::DuettoError::ConfigInvalid(
                "bufferSamples must be positive".into(),
            ));
        }
        self.config.buffer_samples = buffer_samples;
        self.gate.configure(
            self.config.sample_rate_hz,
            buffer_samples,
            self.config.gate,
        );
        self.vad_fill = 0;
        self.pitch_fill = 0;
        Ok(())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // ── The hot path ─────────────────────────────────────────────────────

    /// Process one device callback: read `mic`, mix into `outputs`.
    ///
    /// `outputs` must be zero-initialised by the caller. Channel 0/1 receive
    /// the stereo mix; any further channels receive only the mic monitor
    /// contribution. With no output channels the call returns immediately.
    pub fn process(&mut self, mic: Option<&[f32]>, outputs: &mut [&mut [f32]]) {
        if outputs.is_empty() || outputs[0].is_empty() {
            return;
        }
        let frames = outputs[0].len();

        // 1. Track updates published by the control thread.
        self.drain_track_updates();

        // 2. Block-boundary parameter snapshot.
        let snap = self.control.snapshot();

        // 3. Stop transitions reset playback state exactly once per epoch.
        let stop_epoch = self.control.stop_epoch();
        if stop_epoch != self.seen_stop_epoch {
            self.seen_stop_epoch = stop_epoch;
            self.reset_playback_state();
        }
        if self.control.take_calibration_restart() {
            self.calibrator
                .start(self.config.sample_rate_hz, crate::calibration::DEFAULT_DURATION_SECONDS);
            self.calibration_started = true;
        }

        // 4. Analysis pass.
        let mic_block = mic.unwrap_or(&[]);
        if !self.calibration_started {
            self.calibrator.start(
                self.config.sample_rate_hz,
                crate::calibration::DEFAULT_DURATION_SECONDS,
            );
            self.calibration_started = true;
        }
        if !self.calibrator.is_complete() && !mic_block.is_empty() {
            self.calibrator.process_block(&mic_block[..mic_block.len().min(frames)]);
        }

        let mut input_sum_squares = 0.0f32;
        for i in 0..frames {
            let sample = mic_block.get(i).copied().unwrap_or(0.0);
            input_sum_squares += sample * sample;

            self.vad_ring[self.vad_fill] = sample;
            self.vad_fill += 1;
            if self.vad_fill == self.vad_ring.len() {
                self.vad_fill = 0;
                downsample_average(&self.vad_ring, self.downsample_factor, &mut self.vad_frame);
                self.vad_score = self.vad.process_frame(&self.vad_frame).unwrap_or(0.0);
            }

            self.pitch_ring[self.pitch_fill] = sample;
            self.pitch_fill += 1;
            if self.pitch_fill == self.pitch_ring.len() {
                self.pitch_fill = 0;
                downsample_average(&self.pitch_ring, self.downsample_factor, &mut self.pitch_hop);
                self.pitch_score = self.pitch.process_hop(&self.pitch_hop).unwrap_or(0.0);
            }
        }
        let input_rms = (input_sum_squares / frames as f32).sqrt();

        // 5. Confidence fusion and the gate, once per block.
        let weights = self.config.confidence_weights;
        self.previous_confidence = self.confidence;
        self.confidence = (weights.vad * self.vad_score
            + weights.pitch * self.pitch_score
            + weights.phrase_aware * snap.phrase_confidence)
            .clamp(0.0, 1.0);

        self.gate.set_manual_mode(snap.manual_mode);
        self.gate
            .set_thresholds(snap.gate_threshold_on, snap.gate_threshold_off);
        let gate_db = self
            .gate
            .update(self.confidence, self.vad_score, self.pitch_score);

        // 6. Mix pass.
        let output_rms = if snap.transport == TransportState::Playing {
            self.run_mix_pass(&snap, gate_db, mic_block, outputs)
        } else {
            0.0
        };

        // 7. Publish.
        self.blocks_processed += 1;
        let calibration_complete = self.calibrator.is_complete();
        self.metrics.publish(&MetricsSnapshot {
            input_rms,
            output_rms,
            vad: self.vad_score,
            pitch: self.pitch_score,
            confidence: self.confidence,
            strength: self.strength(input_rms, snap.noise_floor_amplitude),
            gate_db,
            vocal_peak_db: self.calibrator.result().vocal_peak_db,
            end_of_track: self.end_of_track,
            calibration_complete,
            blocks_processed: self.blocks_processed,
        });
    }

    fn run_mix_pass(
        &mut self,
        snap: &ControlSnapshot,
        gate_db: f32,
        mic_block: &[f32],
        outputs: &mut [&mut [f32]],
    ) -> f32 {
        let frames = outputs[0].len();
        let confidence_falling_soft = self.confidence < self.previous_confidence
            && self.confidence > snap.gate_threshold_off;

        self.mixer.set_reverb_tail_seconds(snap.reverb_tail_seconds);
        self.mixer.set_params(MixParams {
            instrument_gain: db_to_linear(snap.instrument_gain_db),
            guide_gain: db_to_linear(snap.guide_gain_db),
            gate_gain: db_to_linear(gate_db),
            guide_audible: !snap.guide_mute && snap.manual_mode != ManualMode::AlwaysOff,
            mic_monitor_gain: db_to_linear(snap.mic_monitor_gain_db),
            reverb_mix: snap.reverb_mix,
            timbre_strength: snap.timbre_strength,
            playback_leak_compensation: snap.playback_leak_compensation,
            crowd_adapt_rate: snap.crowd_adapt_rate,
            crowd_recovery_rate: snap.crowd_recovery_rate,
            crowd_clamp: snap.crowd_clamp,
            envelope_hold_ms: snap.envelope_hold_ms,
            envelope_release_ms: snap.envelope_release_ms,
            envelope_release_mod: snap.envelope_release_mod,
            confidence_falling_soft,
        });

        let mut output_sum_squares = 0.0f32;
        for i in 0..frames {
            let backing_l = self.backing.current_sample(0);
            let backing_r = self.backing.current_sample(1);
            let guide_l = self.guide.current_sample(0);
            let guide_r = self.guide.current_sample(1);
            let mic_sample = mic_block.get(i).copied().unwrap_or(0.0);

            let mixed = self
                .mixer
                .process_sample(backing_l, backing_r, guide_l, guide_r, mic_sample);

            outputs[0][i] += mixed.left;
            if outputs.len() > 1 {
                outputs[1][i] += mixed.right;
            }
            for extra in outputs.iter_mut().skip(2) {
                extra[i] += mixed.mic_contribution;
            }
            output_sum_squares += mixed.left * mixed.left;

            // Synchronized advance: both tracks step after the sample pair.
            let backing_len = self.backing.buffer.len();
            if backing_len > 0
                && self.backing.cursor.advance(backing_len, snap.looping) == CursorAdvance::Held
            {
                self.end_of_track = true;
            }
            let guide_len = self.guide.buffer.len();
            if guide_len > 0
                && self.guide.cursor.advance(guide_len, snap.looping) == CursorAdvance::Held
            {
                self.end_of_track = true;
            }
        }

        (output_sum_squares / frames as f32).sqrt()
    }

    fn drain_track_updates(&mut self) {
        while let Some(update) = self.track_updates.try_pop() {
            let retired = match update.slot {
                TrackSlotId::Backing => self.backing.install(update.buffer),
                TrackSlotId::Guide => self.guide.install(update.buffer),
            };
            self.end_of_track = false;
            // Return the displaced buffer so it deallocates on the control
            // thread. If the retire ring is somehow full the Arc drops here,
            // which at worst frees memory from the audio thread once.
            let _ = self.retired.try_push(retired);
        }
    }

    fn reset_playback_state(&mut self) {
        self.backing.cursor.reset();
        self.guide.cursor.reset();
        self.vad_fill = 0;
        self.pitch_fill = 0;
        self.vad_score = 0.0;
        self.pitch_score = 0.0;
        self.confidence = 0.0;
        self.previous_confidence = 0.0;
        self.vad.reset();
        self.pitch.reset();
        self.gate.reset();
        self.mixer.reset();
        self.end_of_track = false;
        self.blocks_processed = 0;
    }

    /// Mic level normalised between the noise-floor amplitude and the
    /// calibrated vocal peak.
    fn strength(&self, input_rms: f32, noise_floor_amplitude: f32) -> f32 {
        let peak = self.calibrator.peak_amplitude();
        if peak <= noise_floor_amplitude {
            return 0.0;
        }
        ((input_rms - noise_floor_amplitude) / (peak - noise_floor_amplitude)).clamp(0.0, 1.0)
    }

    /// Cursor position of the backing track (diagnostics and tests).
    pub fn backing_position(&self) -> usize {
        self.backing.cursor.position()
    }

    /// Cursor position of the guide track.
    pub fn guide_position(&self) -> usize {
        self.guide.cursor.position()
    }
}

/// Average groups of `factor` device-rate samples into model-rate samples.
#[inline]
fn downsample_average(ring: &[f32], factor: usize, out: &mut [f32]) {
    debug_assert_eq!(ring.len(), out.len() * factor);
    let scale = 1.0 / factor as f32;
    for (i, slot) in out.iter_mut().enumerate() {
        let start = i * factor;
        let mut sum = 0.0;
        for &sample in &ring[start..start + factor] {
            sum += sample;
        }
        *slot = sum * scale;
    }
}
