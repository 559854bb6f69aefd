//! Engine events broadcast to UI / CLI subscribers.
//!
//! Events are emitted from the control plane only — the audio thread
//! publishes state through the metrics cell and the engine turns observed
//! transitions (calibration completion, end-of-track) into events when it is
//! asked for metrics. Subscribers that lag simply miss old events, which is
//! the right behaviour for UI state.

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationResult;
use crate::control::{TrackSlotId, TransportState};

/// Broadcast channel capacity. Events are tiny; 256 covers bursty loads.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything an engine can tell its subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Transport state changed through play/pause/stop.
    #[serde(rename_all = "camelCase")]
    Transport { state: TransportState },
    /// A media file finished loading into a slot.
    #[serde(rename_all = "camelCase")]
    TrackLoaded {
        slot: TrackSlotId,
        path: String,
        duration_seconds: f64,
    },
    /// A slot was cleared (explicitly or after a failed load).
    #[serde(rename_all = "camelCase")]
    TrackCleared { slot: TrackSlotId },
    /// The inline mic calibration pass finished.
    #[serde(rename_all = "camelCase")]
    CalibrationComplete { result: CalibrationResult },
    /// A non-looping track reached its final sample.
    EndOfTrack,
    /// The block size was rebuilt via `update_buffer_size`.
    #[serde(rename_all = "camelCase")]
    BufferSizeChanged { buffer_samples: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_event_serializes_tagged() {
        let event = EngineEvent::Transport {
            state: TransportState::Playing,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "transport");
        assert_eq!(json["state"], "playing");
    }

    #[test]
    fn track_loaded_round_trips() {
        let event = EngineEvent::TrackLoaded {
            slot: TrackSlotId::Guide,
            path: "songs/guide.flac".into(),
            duration_seconds: 187.5,
        };
        let json = serde_json::to_string(&event).expect("serialize");
        let parsed: EngineEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, event);
    }

    #[test]
    fn calibration_event_carries_camel_case_result() {
        let event = EngineEvent::CalibrationComplete {
            result: CalibrationResult {
                noise_floor_db: -80.0,
                vocal_peak_db: -9.5,
                is_valid: true,
            },
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["result"]["vocalPeakDb"], -9.5);
        assert_eq!(json["result"]["isValid"], true);
    }
}
