//! Offline hot-path benchmark: drives `Pipeline::process` with synthetic
//! media and mic input and reports per-block latency percentiles against the
//! real-time deadline.
//!
//! ```sh
//! cargo run --release --bin blockbench -- --blocks 20000 --buffer 128
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use duetto_core::config::RuntimeConfig;
use duetto_core::control::{create_track_rings, ControlState};
use duetto_core::engine::{Pipeline, PipelineContext};
use duetto_core::media::TrackBuffer;
use duetto_core::metrics::MetricsCell;
use duetto_core::pitch::HeuristicPitch;
use duetto_core::vad::HeuristicVad;

#[derive(Debug)]
struct Args {
    blocks: usize,
    buffer_samples: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    blocks: usize,
    buffer_samples: usize,
    sample_rate_hz: f64,
    deadline_us: f64,
    p50_us: f64,
    p95_us: f64,
    p99_us: f64,
    max_us: f64,
    deadline_misses: usize,
}

fn parse_args() -> Result<Args, String> {
    let mut blocks = 20_000usize;
    let mut buffer_samples = 128usize;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--blocks" => {
                blocks = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or("--blocks needs a positive integer")?;
            }
            "--buffer" => {
                buffer_samples = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or("--buffer needs a positive integer")?;
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(Args {
        blocks,
        buffer_samples,
    })
}

fn synthetic_track(len: usize, seed: f32) -> Arc<TrackBuffer> {
    let make = |phase: f32| -> Vec<f32> {
        (0..len)
            .map(|i| (i as f32 * seed + phase).sin() * 0.6)
            .collect()
    };
    Arc::new(TrackBuffer::new(vec![make(0.0), make(0.5)], 48_000.0).expect("valid track"))
}

fn percentile(sorted_us: &[f64], p: f64) -> f64 {
    if sorted_us.is_empty() {
        return 0.0;
    }
    let index = ((sorted_us.len() - 1) as f64 * p).round() as usize;
    sorted_us[index]
}

fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("blockbench: {e}");
            std::process::exit(2);
        }
    };

    let mut config = RuntimeConfig::default();
    config.buffer_samples = args.buffer_samples;

    let control = Arc::new(ControlState::from_config(&config));
    let metrics = Arc::new(MetricsCell::default());
    let ((_update_tx, update_rx), (retire_tx, _retire_rx)) = create_track_rings();

    let sample_rate = config.sample_rate_hz;
    let mut pipeline = Pipeline::new(PipelineContext {
        config,
        control,
        metrics,
        track_updates: update_rx,
        retired: retire_tx,
        vad: Box::new(HeuristicVad::default()),
        pitch: Box::new(HeuristicPitch::default()),
    })
    .expect("pipeline builds");

    pipeline.install_backing(synthetic_track(48_000 * 4, 0.011));
    pipeline.install_guide(synthetic_track(48_000 * 4, 0.017));
    pipeline.play();

    let frames = args.buffer_samples;
    let deadline_us = frames as f64 / sample_rate * 1_000_000.0;

    let mic: Vec<f32> = (0..frames)
        .map(|i| ((i as f32) * 0.029).sin() * 0.3)
        .collect();
    let mut left = vec![0.0f32; frames];
    let mut right = vec![0.0f32; frames];

    // Warm-up so first-touch effects do not skew percentiles.
    for _ in 0..100 {
        left.iter_mut().for_each(|s| *s = 0.0);
        right.iter_mut().for_each(|s| *s = 0.0);
        let mut outputs: Vec<&mut [f32]> = vec![&mut left, &mut right];
        pipeline.process(Some(&mic), &mut outputs);
    }

    let mut latencies_us = Vec::with_capacity(args.blocks);
    for _ in 0..args.blocks {
        left.iter_mut().for_each(|s| *s = 0.0);
        right.iter_mut().for_each(|s| *s = 0.0);
        let start = Instant::now();
        {
            let mut outputs: Vec<&mut [f32]> = vec![&mut left, &mut right];
            pipeline.process(Some(&mic), &mut outputs);
        }
        latencies_us.push(start.elapsed().as_secs_f64() * 1_000_000.0);
    }

    latencies_us.sort_by(|a, b| a.total_cmp(b));
    let summary = Summary {
        blocks: args.blocks,
        buffer_samples: frames,
        sample_rate_hz: sample_rate,
        deadline_us,
        p50_us: percentile(&latencies_us, 0.50),
        p95_us: percentile(&latencies_us, 0.95),
        p99_us: percentile(&latencies_us, 0.99),
        max_us: latencies_us.last().copied().unwrap_or(0.0),
        deadline_misses: latencies_us.iter().filter(|&&us| us > deadline_us).count(),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).expect("summary serializes")
    );
}
