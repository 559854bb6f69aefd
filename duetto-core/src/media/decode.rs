//! Media file decoding via symphonia.
//!
//! Accepts whatever the enabled symphonia codecs can read (WAV, FLAC, MP3,
//! OGG/Vorbis), producing planar f32 at the file's native rate. Rate
//! conversion to the device rate happens afterwards in [`super::resample`].
//! Decoding runs on the control thread only.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use super::TrackBuffer;
use crate::error::{DuettoError, Result};

/// Decode `path` fully into a planar [`TrackBuffer`] at the file's rate.
///
/// Files with more than two channels keep channels 0/1 and drop the rest
/// with a warning.
///
/// # Errors
/// `DuettoError::FileNotFound` when the path does not exist,
/// `DuettoError::DecodeFailed` for unreadable or sample-less files.
pub fn decode_file(path: impl AsRef<Path>) -> Result<TrackBuffer> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DuettoError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path)?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DuettoError::DecodeFailed(format!("{}: {e}", path.display())))?;

    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DuettoError::DecodeFailed(format!("{}: no audio track", path.display())))?;
    let track_id = track.id;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DuettoError::DecodeFailed(format!("{}: unknown sample rate", path.display())))?;
    let source_channels = track
        .codec_params
        .channels
        .map(|ch| ch.count())
        .unwrap_or(1)
        .max(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DuettoError::DecodeFailed(format!("{}: {e}", path.display())))?;

    let kept_channels = source_channels.min(2);
    if source_channels > 2 {
        warn!(
            path = %path.display(),
            channels = source_channels,
            "more than 2 channels, keeping the first two"
        );
    }

    let mut planar: Vec<Vec<f32>> = vec![Vec::new(); kept_channels];
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(DuettoError::DecodeFailed(format!(
                    "{}: {e}",
                    path.display()
                )))
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Recoverable per the symphonia contract: skip the bad packet.
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(path = %path.display(), error = e, "skipping undecodable packet");
                continue;
            }
            Err(e) => {
                return Err(DuettoError::DecodeFailed(format!(
                    "{}: {e}",
                    path.display()
                )))
            }
        };

        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec())
        });
        buf.copy_interleaved_ref(decoded);

        let interleaved = buf.samples();
        let frames = interleaved.len() / source_channels;
        for frame in 0..frames {
            for ch in 0..kept_channels {
                planar[ch].push(interleaved[frame * source_channels + ch]);
            }
        }
    }

    let total = planar.first().map_or(0, Vec::len);
    if total == 0 {
        return Err(DuettoError::DecodeFailed(format!(
            "{}: decoded no samples",
            path.display()
        )));
    }

    debug!(
        path = %path.display(),
        sample_rate,
        channels = kept_channels,
        samples = total,
        "media file decoded"
    );

    TrackBuffer::new(planar, f64::from(sample_rate))
}
