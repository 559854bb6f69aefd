//! duetto — command-line control surface for the karaoke engine.
//!
//! Loads a JSON configuration (with `extends` chaining), wires the engine to
//! the default audio devices when built with `audio-cpal`, and drives the
//! transport through an interactive command loop.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use duetto_core::audio::device;
use duetto_core::config::RuntimeConfig;
use duetto_core::KaraokeEngine;

#[derive(Debug, Parser)]
#[command(name = "duetto", version, about = "Real-time karaoke accompaniment engine")]
struct Args {
    /// JSON configuration file (supports `extends`).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backing (instrumental) track; overrides the config's media block.
    #[arg(long)]
    instrument: Option<PathBuf>,

    /// Guide (lead vocal) track; overrides the config's media block.
    #[arg(long)]
    guide: Option<PathBuf>,

    /// Preferred input device name (see --list-devices).
    #[arg(long)]
    input_device: Option<String>,

    /// List audio devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Start playback immediately.
    #[arg(long)]
    autoplay: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        println!("Input devices:");
        for dev in device::list_input_devices() {
            println!("  {}{}", dev.name, if dev.is_default { " (default)" } else { "" });
        }
        println!("Output devices:");
        for dev in device::list_output_devices() {
            println!("  {}{}", dev.name, if dev.is_default { " (default)" } else { "" });
        }
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    let engine = KaraokeEngine::new(config).context("building engine")?;

    if let Some(path) = &args.instrument {
        if !engine.load_instrument(path) {
            anyhow::bail!("failed to load instrument track {}", path.display());
        }
    }
    if let Some(path) = &args.guide {
        if !engine.load_guide(path) {
            anyhow::bail!("failed to load guide track {}", path.display());
        }
    }

    // With a real audio host the pipeline moves into the device callbacks;
    // without one the engine still works for offline/control use.
    #[cfg(feature = "audio-cpal")]
    let _stream = {
        use duetto_core::audio::DuplexStream;
        let pipeline = engine.take_pipeline().context("taking pipeline")?;
        let stream = DuplexStream::open(pipeline, args.input_device.as_deref())
            .context("opening audio devices")?;
        info!(sample_rate = stream.sample_rate, "audio running");
        stream
    };

    if args.autoplay {
        engine.play();
    }

    commands::run(&engine)
}
