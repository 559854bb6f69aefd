//! `KaraokeEngine` — the control-plane facade.
//!
//! ## Threading
//!
//! The engine lives on the control thread. It owns the atomic
//! [`ControlState`], the metrics cell, the event channel and the loaded
//! track buffers. The [`Pipeline`] is built by the engine and either driven
//! in place (tests, offline rendering) or taken with
//! [`KaraokeEngine::take_pipeline`] and moved into the host's audio
//! callback. While the pipeline is running, every engine method communicates
//! exclusively through atomic cells and SPSC rings — no locks are shared
//! with the audio thread.
//!
//! `update_buffer_size` and `rebuild_pipeline` require the audio thread to
//! be quiesced (host callback removed); that ordering is the caller's
//! responsibility, as with any audio host reconfiguration.

pub mod pipeline;

pub use pipeline::{Pipeline, PipelineContext};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::calibration::CalibrationResult;
use crate::config::RuntimeConfig;
use crate::control::{
    create_track_rings, Consumer, ControlState, Producer, RetiredConsumer, TrackSlotId,
    TrackUpdate, TrackUpdateProducer, TransportState,
};
use crate::dsp::ManualMode;
use crate::error::{DuettoError, Result};
use crate::events::{EngineEvent, EVENT_CHANNEL_CAPACITY};
use crate::media::{decode, TrackBuffer};
use crate::metrics::{MetricsCell, MetricsSnapshot};
use crate::{pitch, vad};

/// A track retained on the control side so reconfiguration can republish it.
#[derive(Debug, Clone)]
struct LoadedTrack {
    path: PathBuf,
    buffer: Arc<TrackBuffer>,
}

impl LoadedTrack {
    fn duration_seconds(&self) -> f64 {
        self.buffer.duration_seconds()
    }
}

/// The public control surface over one pipeline.
pub struct KaraokeEngine {
    config: Mutex<RuntimeConfig>,
    control: Arc<ControlState>,
    metrics: Arc<MetricsCell>,
    update_tx: Mutex<TrackUpdateProducer>,
    retire_rx: Mutex<RetiredConsumer>,
    event_tx: broadcast::Sender<EngineEvent>,
    backing: Mutex<Option<LoadedTrack>>,
    guide: Mutex<Option<LoadedTrack>>,
    /// Present until a host adapter takes it; tests drive it in place.
    pipeline: Mutex<Option<Pipeline>>,
    end_of_track_emitted: AtomicBool,
    calibration_emitted: AtomicBool,
}

impl KaraokeEngine {
    /// Build an engine (and its pipeline) from a configuration snapshot.
    ///
    /// Media files referenced by the config are loaded immediately; a failed
    /// load logs and leaves the slot empty rather than failing construction.
    ///
    /// # Errors
    /// `DuettoError::ConfigInvalid` when the configuration fails validation.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let control = Arc::new(ControlState::from_config(&config));
        let metrics = Arc::new(MetricsCell::default());
        let ((update_tx, update_rx), (retire_tx, retire_rx)) = create_track_rings();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let pipeline = Pipeline::new(PipelineContext {
            config: config.clone(),
            control: Arc::clone(&control),
            metrics: Arc::clone(&metrics),
            track_updates: update_rx,
            retired: retire_tx,
            vad: vad::build_frontend(
                &config.models.vad,
                config.models.model_sample_rate_hz as i64,
            ),
            pitch: pitch::build_frontend(&config.models.pitch),
        })?;

        let engine = Self {
            control,
            metrics,
            update_tx: Mutex::new(update_tx),
            retire_rx: Mutex::new(retire_rx),
            event_tx,
            backing: Mutex::new(None),
            guide: Mutex::new(None),
            pipeline: Mutex::new(Some(pipeline)),
            end_of_track_emitted: AtomicBool::new(false),
            calibration_emitted: AtomicBool::new(false),
            config: Mutex::new(config),
        };

        let (instrument_path, guide_path) = {
            let config = engine.config.lock();
            (
                config.media.instrument_path.clone(),
                config.media.guide_path.clone(),
            )
        };
        if !instrument_path.is_empty() && !engine.load_instrument(&instrument_path) {
            warn!(path = instrument_path, "configured instrument track failed to load");
        }
        if !guide_path.is_empty() && !engine.load_guide(&guide_path) {
            warn!(path = guide_path, "configured guide track failed to load");
        }

        info!("engine ready");
        Ok(engine)
    }

    // ── Pipeline hand-over ───────────────────────────────────────────────

    /// Move the pipeline out, to be driven by a host audio callback.
    ///
    /// # Errors
    /// `DuettoError::AudioStream` when the pipeline was already taken.
    pub fn take_pipeline(&self) -> Result<Pipeline> {
        self.pipeline
            .lock()
            .take()
            .ok_or_else(|| DuettoError::AudioStream("pipeline already taken".into()))
    }

    /// Rebuild the pipeline after the previous one was dropped with its
    /// stream. Retained tracks are re-installed and the stored transport,
    /// mode and parameter cells carry over untouched.
    ///
    /// Must only be called while no audio callback is running.
    pub fn rebuild_pipeline(&self) -> Result<()> {
        let config = self.config.lock().clone();
        let ((update_tx, update_rx), (retire_tx, retire_rx)) = create_track_rings();

        let mut pipeline = Pipeline::new(PipelineContext {
            config: config.clone(),
            control: Arc::clone(&self.control),
            metrics: Arc::clone(&self.metrics),
            track_updates: update_rx,
            retired: retire_tx,
            vad: vad::build_frontend(
                &config.models.vad,
                config.models.model_sample_rate_hz as i64,
            ),
            pitch: pitch::build_frontend(&config.models.pitch),
        })?;

        if let Some(track) = self.backing.lock().as_ref() {
            pipeline.install_backing(Arc::clone(&track.buffer));
        }
        if let Some(track) = self.guide.lock().as_ref() {
            pipeline.install_guide(Arc::clone(&track.buffer));
        }

        *self.update_tx.lock() = update_tx;
        *self.retire_rx.lock() = retire_rx;
        *self.pipeline.lock() = Some(pipeline);

        debug!("pipeline rebuilt");
        Ok(())
    }

    /// Run a closure against the in-place pipeline (tests, offline use).
    ///
    /// # Panics
    /// Panics when the pipeline has been taken by a host adapter.
    pub fn with_pipeline<R>(&self, f: impl FnOnce(&mut Pipeline) -> R) -> R {
        let mut slot = self.pipeline.lock();
        let pipeline = slot.as_mut().expect("pipeline was taken by a host adapter");
        f(pipeline)
    }

    // ── Transport ────────────────────────────────────────────────────────

    pub fn play(&self) {
        self.control.set_transport(TransportState::Playing);
        self.emit(EngineEvent::Transport {
            state: TransportState::Playing,
        });
    }

    pub fn pause(&self) {
        self.control.set_transport(TransportState::Paused);
        self.emit(EngineEvent::Transport {
            state: TransportState::Paused,
        });
    }

    pub fn stop(&self) {
        self.control.signal_stop();
        self.end_of_track_emitted.store(false, Ordering::Relaxed);
        self.emit(EngineEvent::Transport {
            state: TransportState::Stopped,
        });
    }

    pub fn is_playing(&self) -> bool {
        self.control.transport() == TransportState::Playing
    }

    pub fn transport_state(&self) -> TransportState {
        self.control.transport()
    }

    // ── Media ────────────────────────────────────────────────────────────

    /// Load the backing track. Returns false (clearing the slot) on any
    /// decode failure; the other slot and the transport are untouched.
    pub fn load_instrument(&self, path: impl AsRef<Path>) -> bool {
        self.load_track(path.as_ref(), TrackSlotId::Backing)
    }

    /// Load the guide track, with the same failure semantics.
    pub fn load_guide(&self, path: impl AsRef<Path>) -> bool {
        self.load_track(path.as_ref(), TrackSlotId::Guide)
    }

    pub fn clear_instrument(&self) {
        self.clear_track(TrackSlotId::Backing);
    }

    pub fn clear_guide(&self) {
        self.clear_track(TrackSlotId::Guide);
    }

    pub fn instrument_path(&self) -> Option<PathBuf> {
        self.backing.lock().as_ref().map(|t| t.path.clone())
    }

    pub fn guide_path(&self) -> Option<PathBuf> {
        self.guide.lock().as_ref().map(|t| t.path.clone())
    }

    pub fn instrument_duration_seconds(&self) -> f64 {
        self.backing
            .lock()
            .as_ref()
            .map_or(0.0, LoadedTrack::duration_seconds)
    }

    pub fn guide_duration_seconds(&self) -> f64 {
        self.guide
            .lock()
            .as_ref()
            .map_or(0.0, LoadedTrack::duration_seconds)
    }

    fn load_track(&self, path: &Path, slot: TrackSlotId) -> bool {
        self.drain_retired();

        let target_rate = self.config.lock().sample_rate_hz;
        let loaded = decode::decode_file(path).map(|buffer| buffer.resampled_to(target_rate));

        match loaded {
            Ok(buffer) => {
                let buffer = Arc::new(buffer);
                let track = LoadedTrack {
                    path: path.to_path_buf(),
                    buffer: Arc::clone(&buffer),
                };
                let duration_seconds = track.duration_seconds();

                if !self.publish_track(slot, Arc::clone(&buffer)) {
                    return false;
                }
                match slot {
                    TrackSlotId::Backing => *self.backing.lock() = Some(track),
                    TrackSlotId::Guide => *self.guide.lock() = Some(track),
                }

                info!(
                    path = %path.display(),
                    ?slot,
                    duration_seconds,
                    "track loaded"
                );
                self.emit(EngineEvent::TrackLoaded {
                    slot,
                    path: path.display().to_string(),
                    duration_seconds,
                });
                true
            }
            Err(e) => {
                warn!(path = %path.display(), ?slot, error = %e, "track load failed");
                self.clear_track(slot);
                false
            }
        }
    }

    fn clear_track(&self, slot: TrackSlotId) {
        match slot {
            TrackSlotId::Backing => *self.backing.lock() = None,
            TrackSlotId::Guide => *self.guide.lock() = None,
        }
        self.publish_track(slot, Arc::new(TrackBuffer::empty()));
        self.emit(EngineEvent::TrackCleared { slot });
    }

    fn publish_track(&self, slot: TrackSlotId, buffer: Arc<TrackBuffer>) -> bool {
        // Install directly when the pipeline is quiesced in our slot,
        // otherwise hand off through the ring.
        let mut pipeline = self.pipeline.lock();
        if let Some(pipeline) = pipeline.as_mut() {
            match slot {
                TrackSlotId::Backing => pipeline.install_backing(buffer),
                TrackSlotId::Guide => pipeline.install_guide(buffer),
            }
            return true;
        }
        drop(pipeline);

        let update = TrackUpdate { slot, buffer };
        if self.update_tx.lock().try_push(update).is_err() {
            warn!(?slot, "track update ring full, load dropped");
            return false;
        }
        true
    }

    fn drain_retired(&self) {
        let mut retired = self.retire_rx.lock();
        while retired.try_pop().is_some() {}
    }

    // ── Parameters ───────────────────────────────────────────────────────

    pub fn set_manual_mode(&self, mode: ManualMode) {
        debug!(?mode, "manual mode");
        self.control.set_manual_mode(mode);
    }

    pub fn manual_mode(&self) -> ManualMode {
        self.control.manual_mode()
    }

    pub fn set_guide_mute(&self, mute: bool) {
        self.control.set_guide_mute(mute);
    }

    pub fn guide_muted(&self) -> bool {
        self.control.guide_mute()
    }

    pub fn set_looping(&self, looping: bool) {
        self.control.set_looping(looping);
    }

    pub fn set_instrument_gain_db(&self, db: f32) {
        self.control.set_instrument_gain_db(db);
    }

    pub fn set_guide_gain_db(&self, db: f32) {
        self.control.set_guide_gain_db(db);
    }

    pub fn set_mic_monitor_gain_db(&self, db: f32) {
        self.control.set_mic_monitor_gain_db(db);
    }

    pub fn set_noise_floor_amp(&self, amplitude: f32) {
        self.control.set_noise_floor_amplitude(amplitude);
    }

    pub fn set_phrase_confidence(&self, confidence: f32) {
        self.control.set_phrase_confidence(confidence);
    }

    pub fn set_crowd_cancel(&self, adapt_rate: f32, recovery_rate: f32, clamp: f32) {
        self.control.set_crowd_cancel(adapt_rate, recovery_rate, clamp);
    }

    pub fn set_reverb(&self, mix: f32, tail_seconds: f32) {
        self.control.set_reverb(mix, tail_seconds);
    }

    pub fn set_timbre(&self, strength: f32) {
        self.control.set_timbre_strength(strength);
    }

    pub fn set_envelope(&self, hold_ms: f32, release_ms: f32, release_mod: f32) {
        self.control.set_envelope(hold_ms, release_ms, release_mod);
    }

    pub fn set_gate_thresholds(&self, threshold_on: f32, threshold_off: f32) {
        self.control.set_gate_thresholds(threshold_on, threshold_off);
    }

    pub fn restart_calibration(&self) {
        self.calibration_emitted.store(false, Ordering::Relaxed);
        self.control.request_calibration_restart();
    }

    /// Rebuild gate and analysis staging for a new block size, preserving
    /// transport state, manual mode, mute state and loaded media.
    ///
    /// Must only be called while the audio thread is quiesced.
    ///
    /// # Errors
    /// `DuettoError::ConfigInvalid` on a zero block size (previous state is
    /// preserved), `DuettoError::AudioStream` when the pipeline is taken.
    pub fn update_buffer_size(&self, buffer_samples: usize) -> Result<()> {
        if buffer_samples == 0 {
            return Err(DuettoError::ConfigInvalid(
                "bufferSamples must be positive".into(),
            ));
        }

        let mut slot = self.pipeline.lock();
        let pipeline = slot
            .as_mut()
            .ok_or_else(|| DuettoError::AudioStream("pipeline is attached to a stream".into()))?;
        pipeline.update_buffer_size(buffer_samples)?;
        self.config.lock().buffer_samples = buffer_samples;

        info!(buffer_samples, "buffer size updated");
        self.emit(EngineEvent::BufferSizeChanged { buffer_samples });
        Ok(())
    }

    // ── Observability ────────────────────────────────────────────────────

    /// Most recent metrics snapshot (non-blocking). Also turns observed
    /// audio-thread transitions into events: end-of-track and calibration
    /// completion are emitted here, never from the audio callback.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.drain_retired();
        let snapshot = self.metrics.snapshot();

        if snapshot.end_of_track
            && !self.end_of_track_emitted.swap(true, Ordering::Relaxed)
        {
            self.emit(EngineEvent::EndOfTrack);
        }
        if snapshot.calibration_complete
            && !self.calibration_emitted.swap(true, Ordering::Relaxed)
        {
            self.emit(EngineEvent::CalibrationComplete {
                result: CalibrationResult {
                    noise_floor_db: -80.0,
                    vocal_peak_db: snapshot.vocal_peak_db,
                    is_valid: true,
                },
            });
        }

        snapshot
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn config_snapshot(&self) -> RuntimeConfig {
        self.config.lock().clone()
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn fixture_wav(name: &str, sample_rate: u32, frames: u32) -> PathBuf {
        let dir = std::env::temp_dir().join("duetto-engine-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..frames {
            let value = ((i as f32 * 0.05).sin() * 12_000.0) as i16;
            writer.write_sample(value).unwrap();
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn engine() -> KaraokeEngine {
        KaraokeEngine::new(RuntimeConfig::default()).expect("engine builds")
    }

    #[test]
    fn transport_round_trip() {
        let engine = engine();
        assert_eq!(engine.transport_state(), TransportState::Stopped);
        engine.play();
        assert!(engine.is_playing());
        engine.pause();
        assert_eq!(engine.transport_state(), TransportState::Paused);
        engine.stop();
        assert_eq!(engine.transport_state(), TransportState::Stopped);
    }

    #[test]
    fn transport_changes_are_broadcast() {
        let engine = engine();
        let mut events = engine.subscribe_events();
        engine.play();
        engine.stop();
        assert_eq!(
            events.try_recv().unwrap(),
            EngineEvent::Transport {
                state: TransportState::Playing
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            EngineEvent::Transport {
                state: TransportState::Stopped
            }
        );
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn load_instrument_resamples_and_reports_duration() {
        let engine = engine();
        let path = fixture_wav("engine_44k.wav", 44_100, 44_100);
        assert!(engine.load_instrument(&path));
        assert_eq!(engine.instrument_path().unwrap(), path);
        // 1.0 s regardless of source rate.
        assert!((engine.instrument_duration_seconds() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn failed_load_returns_false_and_leaves_other_slot_intact() {
        let engine = engine();
        let good = fixture_wav("engine_good.wav", 48_000, 4_800);
        assert!(engine.load_guide(&good));

        engine.play();
        assert!(!engine.load_instrument("/nonexistent/file.wav"));
        assert!(engine.instrument_path().is_none());
        // Guide slot and transport are untouched.
        assert!(engine.guide_path().is_some());
        assert!(engine.is_playing());
    }

    #[test]
    fn loaded_track_is_audible_through_the_pipeline() {
        let engine = engine();
        let path = fixture_wav("engine_play.wav", 48_000, 9_600);
        assert!(engine.load_instrument(&path));
        engine.set_mic_monitor_gain_db(-80.0);
        engine.play();

        let peak = engine.with_pipeline(|pipeline| {
            let mic = vec![0.0f32; 128];
            let mut left = vec![0.0f32; 128];
            let mut right = vec![0.0f32; 128];
            let mut outputs: Vec<&mut [f32]> = vec![&mut left, &mut right];
            pipeline.process(Some(&mic), &mut outputs);
            left.iter().fold(0.0f32, |m, s| m.max(s.abs()))
        });
        assert!(peak > 0.01, "backing track inaudible, peak={peak}");
    }

    #[test]
    fn update_buffer_size_zero_is_rejected_and_state_preserved() {
        let engine = engine();
        engine.play();
        let err = engine.update_buffer_size(0).unwrap_err();
        assert!(matches!(err, DuettoError::ConfigInvalid(_)));
        assert!(engine.is_playing());
        assert_eq!(engine.config_snapshot().buffer_samples, 128);
    }

    #[test]
    fn update_buffer_size_applies_and_emits() {
        let engine = engine();
        let mut events = engine.subscribe_events();
        engine.update_buffer_size(512).unwrap();
        assert_eq!(engine.config_snapshot().buffer_samples, 512);
        assert_eq!(
            events.try_recv().unwrap(),
            EngineEvent::BufferSizeChanged {
                buffer_samples: 512
            }
        );
    }

    #[test]
    fn take_pipeline_is_exclusive_until_rebuild() {
        let engine = engine();
        let pipeline = engine.take_pipeline().unwrap();
        assert!(engine.take_pipeline().is_err());
        drop(pipeline);
        engine.rebuild_pipeline().unwrap();
        assert!(engine.take_pipeline().is_ok());
    }

    #[test]
    fn rebuild_preserves_loaded_media() {
        let engine = engine();
        let path = fixture_wav("engine_rebuild.wav", 48_000, 4_800);
        assert!(engine.load_instrument(&path));

        let pipeline = engine.take_pipeline().unwrap();
        drop(pipeline);
        engine.rebuild_pipeline().unwrap();
        engine.play();

        let peak = engine.with_pipeline(|pipeline| {
            let mic = vec![0.0f32; 128];
            let mut left = vec![0.0f32; 128];
            let mut right = vec![0.0f32; 128];
            let mut outputs: Vec<&mut [f32]> = vec![&mut left, &mut right];
            pipeline.process(Some(&mic), &mut outputs);
            left.iter().fold(0.0f32, |m, s| m.max(s.abs()))
        });
        assert!(peak > 0.0, "rebuilt pipeline lost the loaded track");
    }

    #[test]
    fn end_of_track_event_fires_once() {
        let mut config = RuntimeConfig::default();
        config.media.looping = false;
        let engine = KaraokeEngine::new(config).unwrap();
        let path = fixture_wav("engine_eot.wav", 48_000, 256);
        assert!(engine.load_instrument(&path));
        engine.play();

        let mut events = engine.subscribe_events();
        engine.with_pipeline(|pipeline| {
            let mic = vec![0.0f32; 128];
            for _ in 0..4 {
                let mut left = vec![0.0f32; 128];
                let mut right = vec![0.0f32; 128];
                let mut outputs: Vec<&mut [f32]> = vec![&mut left, &mut right];
                pipeline.process(Some(&mic), &mut outputs);
            }
        });

        assert!(engine.get_metrics().end_of_track);
        assert!(engine.get_metrics().end_of_track);

        let mut end_events = 0;
        while let Ok(event) = events.try_recv() {
            if event == EngineEvent::EndOfTrack {
                end_events += 1;
            }
        }
        assert_eq!(end_events, 1);
    }
}
