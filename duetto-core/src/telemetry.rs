//! Bounded telemetry log for tuning sessions.
//!
//! The control thread records one entry per metrics poll; the log can be
//! exported as JSON for offline analysis of gate behaviour. Never touched by
//! the audio thread.

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metrics::MetricsSnapshot;

/// Default record capacity: ~10 minutes of 50 ms polls.
pub const DEFAULT_CAPACITY: usize = 12_000;

/// One observation of the analysis state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub timestamp_ms: f64,
    pub vad: f32,
    pub pitch: f32,
    pub confidence: f32,
    pub gain_db: f32,
}

/// Ring of recent telemetry records; oldest entries fall off when full.
#[derive(Debug, Clone)]
pub struct TelemetryLog {
    records: VecDeque<TelemetryRecord>,
    capacity: usize,
}

impl Default for TelemetryLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl TelemetryLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Append one observation taken from a metrics snapshot.
    pub fn record(&mut self, timestamp_ms: f64, metrics: &MetricsSnapshot) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(TelemetryRecord {
            timestamp_ms,
            vad: metrics.vad,
            pitch: metrics.pitch,
            confidence: metrics.confidence,
            gain_db: metrics.gate_db,
        });
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.records.iter()
    }

    /// Serialize the log as a JSON array.
    pub fn to_json(&self) -> Result<String> {
        let records: Vec<&TelemetryRecord> = self.records.iter().collect();
        serde_json::to_string_pretty(&records)
            .map_err(|e| crate::error::DuettoError::Other(e.into()))
    }

    /// Write the log to `path` as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(confidence: f32) -> MetricsSnapshot {
        MetricsSnapshot {
            confidence,
            vad: confidence,
            pitch: confidence,
            gate_db: -6.0,
            ..MetricsSnapshot::default()
        }
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut log = TelemetryLog::with_capacity(3);
        for i in 0..5 {
            log.record(f64::from(i), &snapshot(0.1 * f64::from(i) as f32));
        }
        assert_eq!(log.len(), 3);
        let first = log.records().next().unwrap();
        assert_eq!(first.timestamp_ms, 2.0);
    }

    #[test]
    fn to_json_is_an_array_of_camel_case_records() {
        let mut log = TelemetryLog::with_capacity(8);
        log.record(12.5, &snapshot(0.7));
        let json: serde_json::Value = serde_json::from_str(&log.to_json().unwrap()).unwrap();
        assert_eq!(json[0]["timestampMs"], 12.5);
        assert_eq!(json[0]["gainDb"], -6.0);
    }

    #[test]
    fn reset_empties_the_log() {
        let mut log = TelemetryLog::default();
        log.record(0.0, &snapshot(0.5));
        log.reset();
        assert!(log.is_empty());
    }
}
