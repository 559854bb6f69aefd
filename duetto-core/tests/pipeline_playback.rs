//! End-to-end playback behaviour of the pipeline: manual modes, mix
//! identities, determinism and loop handling.

use std::sync::Arc;

use duetto_core::config::RuntimeConfig;
use duetto_core::control::{create_track_rings, ControlState};
use duetto_core::dsp::ManualMode;
use duetto_core::engine::{Pipeline, PipelineContext};
use duetto_core::media::TrackBuffer;
use duetto_core::metrics::MetricsCell;
use duetto_core::pitch::HeuristicPitch;
use duetto_core::vad::HeuristicVad;

const BLOCK: usize = 128;

struct Rig {
    pipeline: Pipeline,
    control: Arc<ControlState>,
    metrics: Arc<MetricsCell>,
}

fn rig(config: RuntimeConfig) -> Rig {
    let control = Arc::new(ControlState::from_config(&config));
    let metrics = Arc::new(MetricsCell::default());
    let ((_update_tx, update_rx), (retire_tx, _retire_rx)) = create_track_rings();
    let pipeline = Pipeline::new(PipelineContext {
        config,
        control: Arc::clone(&control),
        metrics: Arc::clone(&metrics),
        track_updates: update_rx,
        retired: retire_tx,
        vad: Box::new(HeuristicVad::default()),
        pitch: Box::new(HeuristicPitch::default()),
    })
    .expect("pipeline builds");
    Rig {
        pipeline,
        control,
        metrics,
    }
}

fn run_block(pipeline: &mut Pipeline, mic: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let mut left = vec![0.0f32; mic.len()];
    let mut right = vec![0.0f32; mic.len()];
    {
        let mut outputs: Vec<&mut [f32]> = vec![&mut left, &mut right];
        pipeline.process(Some(mic), &mut outputs);
    }
    (left, right)
}

fn sine_block(freq: f32, amplitude: f32, sample_rate: f32, offset: usize, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = (offset + i) as f32 / sample_rate;
            amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
        })
        .collect()
}

fn stereo_ramp(len: usize) -> Arc<TrackBuffer> {
    let left: Vec<f32> = (0..len).map(|i| (i as f32 / len as f32) * 0.5).collect();
    let right = left.clone();
    Arc::new(TrackBuffer::new(vec![left, right], 48_000.0).unwrap())
}

fn loud_guide(len: usize) -> Arc<TrackBuffer> {
    let data: Vec<f32> = (0..len).map(|i| ((i as f32) * 0.13).sin() * 0.9).collect();
    Arc::new(TrackBuffer::new(vec![data.clone(), data], 48_000.0).unwrap())
}

#[test]
fn always_off_under_loud_mic_has_no_guide_component() {
    // Scenario: 1 kHz mic sine at 0.5 amplitude, manual AlwaysOff. The guide
    // must contribute exactly nothing: a run with a loud guide loaded and a
    // run with no guide at all produce identical output.
    let run = |with_guide: bool| -> Vec<f32> {
        let mut r = rig(RuntimeConfig::default());
        if with_guide {
            r.pipeline.install_guide(loud_guide(48_000));
        }
        r.control.set_manual_mode(ManualMode::AlwaysOff);
        r.pipeline.play();

        let mut collected = Vec::new();
        for block in 0..100 {
            let mic = sine_block(1_000.0, 0.5, 48_000.0, block * BLOCK, BLOCK);
            let (left, right) = run_block(&mut r.pipeline, &mic);
            for i in 0..BLOCK {
                assert_eq!(left[i], right[i], "mic contribution differs across channels");
            }
            collected.extend_from_slice(&left);
        }
        collected
    };

    let with_guide = run(true);
    let without_guide = run(false);
    assert_eq!(with_guide, without_guide);

    // The mic monitor is present: the output is not silence.
    let peak = with_guide.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.01, "mic monitor missing, peak={peak}");
}

#[test]
fn silent_mic_and_always_off_output_equals_scaled_backing() {
    let mut config = RuntimeConfig::default();
    config.media.instrument_gain_db = -6.0;
    let mut r = rig(config);
    r.pipeline.install_backing(stereo_ramp(48_000));
    r.pipeline.install_guide(loud_guide(48_000));
    r.control.set_manual_mode(ManualMode::AlwaysOff);
    r.pipeline.play();

    let gain = 10.0f32.powf(-6.0 / 20.0);
    let mic = vec![0.0f32; BLOCK];
    let mut index = 0usize;
    for _ in 0..50 {
        let (left, right) = run_block(&mut r.pipeline, &mic);
        for i in 0..BLOCK {
            let expected = (index as f32 / 48_000.0) * 0.5 * gain;
            assert!(
                (left[i] - expected).abs() < 1e-6,
                "left[{index}]={} expected={expected}",
                left[i]
            );
            assert!((right[i] - expected).abs() < 1e-6);
            index += 1;
        }
    }
}

#[test]
fn identical_runs_are_deterministic() {
    let run = || -> (Vec<f32>, Vec<f32>) {
        let mut r = rig(RuntimeConfig::default());
        r.pipeline.install_backing(stereo_ramp(10_000));
        r.pipeline.install_guide(loud_guide(10_000));
        r.pipeline.play();

        let mut left_all = Vec::new();
        let mut right_all = Vec::new();
        for block in 0..200 {
            let mic = sine_block(220.0, 0.3, 48_000.0, block * BLOCK, BLOCK);
            let (left, right) = run_block(&mut r.pipeline, &mic);
            left_all.extend_from_slice(&left);
            right_all.extend_from_slice(&right);
        }
        (left_all, right_all)
    };

    let first = run();
    let second = run();
    assert_eq!(first.0, second.0);
    assert_eq!(first.1, second.1);
}

#[test]
fn loop_wrap_has_no_dropouts() {
    // A constant-valued looping track must produce a constant output stream
    // across the wrap point.
    let mut r = rig(RuntimeConfig::default());
    let constant = Arc::new(
        TrackBuffer::new(vec![vec![0.25f32; 1_000], vec![0.25f32; 1_000]], 48_000.0).unwrap(),
    );
    r.pipeline.install_backing(constant);
    r.control.set_manual_mode(ManualMode::AlwaysOff);
    r.pipeline.play();

    let mic = vec![0.0f32; BLOCK];
    for block in 0..20 {
        let (left, _) = run_block(&mut r.pipeline, &mic);
        for (i, sample) in left.iter().enumerate() {
            assert!(
                (sample - 0.25).abs() < 1e-6,
                "dropout at block {block} sample {i}: {sample}"
            );
        }
    }
    assert_eq!(r.pipeline.backing_position(), (20 * BLOCK) % 1_000);
}

#[test]
fn pause_resumes_from_the_same_sample() {
    let mut r = rig(RuntimeConfig::default());
    r.pipeline.install_backing(stereo_ramp(48_000));
    r.control.set_manual_mode(ManualMode::AlwaysOff);
    r.pipeline.play();

    let mic = vec![0.0f32; BLOCK];
    let (before, _) = run_block(&mut r.pipeline, &mic);

    r.pipeline.pause();
    run_block(&mut r.pipeline, &mic);
    r.pipeline.play();
    let (after, _) = run_block(&mut r.pipeline, &mic);

    // The resumed block continues the ramp exactly where the first ended.
    let step = 0.5 / 48_000.0;
    assert!((after[0] - (before[BLOCK - 1] + step)).abs() < 1e-6);
}

#[test]
fn stop_then_play_restarts_from_sample_zero() {
    let mut r = rig(RuntimeConfig::default());
    r.pipeline.install_backing(stereo_ramp(48_000));
    r.control.set_manual_mode(ManualMode::AlwaysOff);
    r.pipeline.play();

    let mic = vec![0.0f32; BLOCK];
    let (first, _) = run_block(&mut r.pipeline, &mic);

    for _ in 0..10 {
        run_block(&mut r.pipeline, &mic);
    }
    r.pipeline.stop();
    r.pipeline.play();
    let (restarted, _) = run_block(&mut r.pipeline, &mic);

    assert_eq!(first, restarted);
    assert_eq!(restarted[0], 0.0);
}

#[test]
fn metrics_track_output_level() {
    let mut r = rig(RuntimeConfig::default());
    r.pipeline.install_backing(stereo_ramp(48_000));
    r.control.set_manual_mode(ManualMode::AlwaysOff);
    r.pipeline.play();

    let mic = vec![0.0f32; BLOCK];
    for _ in 0..100 {
        run_block(&mut r.pipeline, &mic);
    }
    let snap = r.metrics.snapshot();
    assert!(snap.output_rms > 0.0);
    assert_eq!(snap.blocks_processed, 100);
    assert_eq!(snap.input_rms, 0.0);
}
