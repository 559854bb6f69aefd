//! Media buffers and playback cursors for the backing and guide tracks.
//!
//! Tracks are decoded on the control thread, resampled to the device rate at
//! load time, and published to the audio thread as immutable
//! [`TrackBuffer`]s. The audio thread only ever reads samples and advances
//! cursors — no allocation, no locking.

pub mod decode;
pub mod resample;

use std::sync::Arc;

use crate::error::{DuettoError, Result};

/// Rates closer than this are treated as equal and skip resampling.
const RATE_EPSILON: f64 = 1.0e-3;

/// An immutable, planar, rate-tagged PCM buffer (1 or 2 channels).
#[derive(Debug, Clone, Default)]
pub struct TrackBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: f64,
}

impl TrackBuffer {
    /// Wrap decoded planar PCM.
    ///
    /// # Errors
    /// `DuettoError::DecodeFailed` when the channel list is empty, has more
    /// than two channels, or the channels disagree on length.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: f64) -> Result<Self> {
        if channels.is_empty() || channels.len() > 2 {
            return Err(DuettoError::DecodeFailed(format!(
                "expected 1 or 2 channels, got {}",
                channels.len()
            )));
        }
        let len = channels[0].len();
        if channels.iter().any(|ch| ch.len() != len) {
            return Err(DuettoError::DecodeFailed(
                "channel lengths disagree".into(),
            ));
        }
        if len == 0 {
            return Err(DuettoError::DecodeFailed("track has no samples".into()));
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// The "no track loaded" state.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() || self.channels[0].is_empty()
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.len() as f64 / self.sample_rate
        } else {
            0.0
        }
    }

    /// Read one sample. A mono buffer answers every channel; an empty buffer
    /// answers 0.
    #[inline]
    pub fn sample(&self, channel: usize, index: usize) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let channel = channel.min(self.channels.len() - 1);
        self.channels[channel].get(index).copied().unwrap_or(0.0)
    }

    /// Return this buffer converted to `target_rate`, resampling each channel
    /// independently with the 4-point Lagrange interpolator. Buffers already
    /// at the target rate are passed through untouched.
    pub fn resampled_to(self, target_rate: f64) -> Self {
        if self.is_empty() || (self.sample_rate - target_rate).abs() < RATE_EPSILON {
            return Self {
                sample_rate: target_rate.max(self.sample_rate),
                ..self
            };
        }

        let ratio = self.sample_rate / target_rate;
        let channels = self
            .channels
            .iter()
            .map(|ch| resample::lagrange_resample(ch, ratio))
            .collect();

        Self {
            channels,
            sample_rate: target_rate,
        }
    }
}

/// What a cursor advance did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorAdvance {
    /// Moved to the next sample.
    Advanced,
    /// Passed the end and wrapped to 0 (loop enabled).
    Wrapped,
    /// Reached the last sample and is holding there (loop disabled).
    Held,
}

/// Playback position into one [`TrackBuffer`].
///
/// Invariant: `0 <= position < track_len` whenever the track is non-empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaCursor {
    position: usize,
}

impl MediaCursor {
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Step one sample forward over a track of `track_len` samples.
    #[inline]
    pub fn advance(&mut self, track_len: usize, looping: bool) -> CursorAdvance {
        if track_len == 0 {
            self.position = 0;
            return CursorAdvance::Held;
        }

        if self.position + 1 < track_len {
            self.position += 1;
            CursorAdvance::Advanced
        } else if looping {
            self.position = 0;
            CursorAdvance::Wrapped
        } else {
            self.position = track_len - 1;
            CursorAdvance::Held
        }
    }

    /// Re-clamp after the underlying track changed (e.g. a shorter buffer was
    /// published mid-performance).
    pub fn clamp_to(&mut self, track_len: usize) {
        if track_len == 0 {
            self.position = 0;
        } else if self.position >= track_len {
            self.position = track_len - 1;
        }
    }
}

/// A track slot owned by the pipeline: buffer + cursor.
#[derive(Debug, Clone, Default)]
pub struct TrackSlot {
    pub buffer: Arc<TrackBuffer>,
    pub cursor: MediaCursor,
}

impl TrackSlot {
    /// Swap in a new buffer, clamping the cursor into range.
    pub fn install(&mut self, buffer: Arc<TrackBuffer>) -> Arc<TrackBuffer> {
        let retired = std::mem::replace(&mut self.buffer, buffer);
        self.cursor.clamp_to(self.buffer.len());
        retired
    }

    #[inline]
    pub fn current_sample(&self, channel: usize) -> f32 {
        self.buffer.sample(channel, self.cursor.position())
    }
}
