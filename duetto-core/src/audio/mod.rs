//! Duplex audio host integration via cpal.
//!
//! # Design constraints
//!
//! Both cpal callbacks run on OS audio threads at elevated priority. They
//! **must not** block on a mutex, perform I/O, or take locks shared with the
//! control thread. The input callback pushes mic samples into an SPSC ring;
//! the output callback pops one block and drives [`Pipeline::process`]
//! against preallocated planar scratch.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). A `DuplexStream` must therefore be created and dropped on the
//! same OS thread. The pipeline moves *into* the output callback; dropping
//! the `DuplexStream` drops the pipeline with it, after which
//! `KaraokeEngine::rebuild_pipeline` builds a fresh one.

pub mod device;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

#[cfg(feature = "audio-cpal")]
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapRb,
};

use crate::engine::Pipeline;
use crate::error::{DuettoError, Result};

#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Mic hand-off capacity between the input and output callbacks: one second
/// at 48 kHz absorbs scheduling jitter without audible latency build-up (the
/// output side drains to the freshest block every callback).
#[cfg(feature = "audio-cpal")]
const MIC_RING_CAPACITY: usize = 48_000;

/// Scratch capacity in frames; callbacks larger than this would reallocate.
#[cfg(feature = "audio-cpal")]
const MAX_CALLBACK_FRAMES: usize = 8_192;

/// Handle to a running input+output stream pair.
///
/// **Not `Send`** — see the module docs. Keep it alive for as long as audio
/// should flow; drop it to release both devices.
pub struct DuplexStream {
    #[cfg(feature = "audio-cpal")]
    _input: Option<Stream>,
    #[cfg(feature = "audio-cpal")]
    _output: Stream,
    /// Sample rate the devices were opened at.
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl DuplexStream {
    /// Open the default input and output devices at the pipeline's
    /// configured sample rate and start audio flowing.
    ///
    /// A missing input device degrades to output-only operation (the
    /// pipeline sees silence on the mic); a missing output device is fatal.
    ///
    /// # Errors
    /// `DuettoError::AudioDevice` / `DuettoError::AudioStream` on device or
    /// stream failures.
    pub fn open(pipeline: Pipeline, preferred_input: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let sample_rate = pipeline.config().sample_rate_hz as u32;

        let output_device = host
            .default_output_device()
            .ok_or_else(|| DuettoError::AudioDevice("no default output device".into()))?;
        info!(
            device = output_device.name().unwrap_or_default().as_str(),
            sample_rate, "opening output device"
        );

        let (mic_tx, mic_rx) = HeapRb::<f32>::new(MIC_RING_CAPACITY).split();

        let input = match Self::open_input(&host, preferred_input, sample_rate, mic_tx) {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(error = %e, "no usable input device, running without a microphone");
                None
            }
        };

        let output = Self::open_output(&output_device, sample_rate, pipeline, mic_rx)?;

        output
            .play()
            .map_err(|e| DuettoError::AudioStream(e.to_string()))?;
        if let Some(ref input) = input {
            input
                .play()
                .map_err(|e| DuettoError::AudioStream(e.to_string()))?;
        }

        Ok(Self {
            _input: input,
            _output: output,
            sample_rate,
        })
    }

    fn open_input(
        host: &cpal::Host,
        preferred: Option<&str>,
        sample_rate: u32,
        mut mic_tx: ringbuf::HeapProd<f32>,
    ) -> Result<Stream> {
        let device = device::resolve_input_device(host, preferred)?;
        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| DuettoError::AudioDevice(e.to_string()))?;
        let channels = supported.channels();
        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let ch = channels as usize;

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    // Channel 0 carries the microphone.
                    for frame in data.chunks(ch) {
                        let _ = mic_tx.try_push(frame[0]);
                    }
                },
                |err| error!("input stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    for frame in data.chunks(ch) {
                        let _ = mic_tx.try_push(f32::from(frame[0]) / 32_768.0);
                    }
                },
                |err| error!("input stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(DuettoError::AudioStream(format!(
                    "unsupported input sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| DuettoError::AudioStream(e.to_string()))?;

        Ok(stream)
    }

    fn open_output(
        device: &cpal::Device,
        sample_rate: u32,
        mut pipeline: Pipeline,
        mut mic_rx: ringbuf::HeapCons<f32>,
    ) -> Result<Stream> {
        let supported = device
            .default_output_config()
            .map_err(|e| DuettoError::AudioDevice(e.to_string()))?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(DuettoError::AudioStream(format!(
                "unsupported output sample format: {:?}",
                supported.sample_format()
            )));
        }

        let channels = supported.channels().max(1) as usize;
        let config = StreamConfig {
            channels: channels as u16,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let mut mic_block: Vec<f32> = Vec::with_capacity(MAX_CALLBACK_FRAMES);
        let mut planar: Vec<f32> = Vec::with_capacity(MAX_CALLBACK_FRAMES * channels);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    let frames = data.len() / channels;
                    if frames == 0 {
                        return;
                    }

                    mic_block.resize(frames, 0.0);
                    let got = mic_rx.pop_slice(&mut mic_block);
                    mic_block[got..].iter_mut().for_each(|s| *s = 0.0);

                    planar.resize(frames * channels, 0.0);
                    planar.iter_mut().for_each(|s| *s = 0.0);
                    let mut outputs: Vec<&mut [f32]> = planar.chunks_mut(frames).collect();

                    pipeline.process(Some(&mic_block), &mut outputs);

                    for (ch, channel_data) in outputs.iter().enumerate() {
                        for frame in 0..frames {
                            data[frame * channels + ch] = channel_data[frame];
                        }
                    }
                },
                |err| error!("output stream error: {err}"),
                None,
            )
            .map_err(|e| DuettoError::AudioStream(e.to_string()))?;

        Ok(stream)
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl DuplexStream {
    pub fn open(_pipeline: Pipeline, _preferred_input: Option<&str>) -> Result<Self> {
        Err(DuettoError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
