//! Per-block metrics published by the audio thread.
//!
//! The pipeline writes one [`MetricsCell::publish`] per callback; any thread
//! may take a [`MetricsCell::snapshot`] without blocking. Field-level
//! atomics are sufficient here — consumers are meters and logs, not control
//! decisions, so a torn read across two blocks is acceptable by design.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::control::AtomicF32;

/// Read-only view of the engine's most recent block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// RMS of the mic input over the last block.
    pub input_rms: f32,
    /// RMS of the mixed output (left channel) over the last block.
    pub output_rms: f32,
    /// Most recent VAD probability.
    pub vad: f32,
    /// Most recent pitch confidence.
    pub pitch: f32,
    /// Fused confidence driving the gate.
    pub confidence: f32,
    /// Mic level normalised against the calibrated vocal peak.
    pub strength: f32,
    /// Current gate gain in dB.
    pub gate_db: f32,
    /// Peak vocal level measured by the calibrator so far, in dB.
    pub vocal_peak_db: f32,
    /// True once a non-looping track has reached its final sample.
    pub end_of_track: bool,
    /// True once the inline calibration pass has finished.
    pub calibration_complete: bool,
    /// Number of blocks processed since configure/stop.
    pub blocks_processed: u64,
}

/// Shared atomic cell the snapshot is published through.
#[derive(Debug, Default)]
pub struct MetricsCell {
    input_rms: AtomicF32,
    output_rms: AtomicF32,
    vad: AtomicF32,
    pitch: AtomicF32,
    confidence: AtomicF32,
    strength: AtomicF32,
    gate_db: AtomicF32,
    vocal_peak_db: AtomicF32,
    end_of_track: AtomicBool,
    calibration_complete: AtomicBool,
    blocks_processed: AtomicU64,
}

impl MetricsCell {
    /// Publish one block's metrics. Audio thread only.
    pub fn publish(&self, snapshot: &MetricsSnapshot) {
        self.input_rms.store(snapshot.input_rms);
        self.output_rms.store(snapshot.output_rms);
        self.vad.store(snapshot.vad);
        self.pitch.store(snapshot.pitch);
        self.confidence.store(snapshot.confidence);
        self.strength.store(snapshot.strength);
        self.gate_db.store(snapshot.gate_db);
        self.vocal_peak_db.store(snapshot.vocal_peak_db);
        self.end_of_track
            .store(snapshot.end_of_track, Ordering::Relaxed);
        self.calibration_complete
            .store(snapshot.calibration_complete, Ordering::Relaxed);
        self.blocks_processed
            .store(snapshot.blocks_processed, Ordering::Relaxed);
    }

    /// Non-blocking read of the most recent snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            input_rms: self.input_rms.load(),
            output_rms: self.output_rms.load(),
            vad: self.vad.load(),
            pitch: self.pitch.load(),
            confidence: self.confidence.load(),
            strength: self.strength.load(),
            gate_db: self.gate_db.load(),
            vocal_peak_db: self.vocal_peak_db.load(),
            end_of_track: self.end_of_track.load(Ordering::Relaxed),
            calibration_complete: self.calibration_complete.load(Ordering::Relaxed),
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
        }
    }
}
