//! Interactive command loop over the engine's control API.

use std::io::{self, BufRead, Write};
use std::time::Instant;

use duetto_core::dsp::ManualMode;
use duetto_core::telemetry::TelemetryLog;
use duetto_core::KaraokeEngine;

const HELP: &str = "\
commands:
  play | pause | stop          transport
  mode auto|on|off             manual gate mode
  mute on|off                  guide mute
  gain inst|guide|mic <dB>     bus gains
  reverb <mix> <tail_s>        reverb tail
  timbre <strength>            timbre match 0..1
  envelope <hold> <rel> <mod>  guide envelope (ms, ms, mod)
  crowd <adapt> <rec> <clamp>  crowd cancellation
  load inst|guide <path>       load a media file
  clear inst|guide             clear a media slot
  calibrate                    restart mic calibration
  buffer <samples>             rebuild block size (stop audio first)
  metrics                      print the latest snapshot
  telemetry save <path>        write recorded telemetry as JSON
  status                       transport + tracks
  help                         this text
  quit";

/// Read commands from stdin until EOF or `quit`.
pub fn run(engine: &KaraokeEngine) -> anyhow::Result<()> {
    let started = Instant::now();
    let mut telemetry = TelemetryLog::default();
    let stdin = io::stdin();

    println!("duetto ready — type 'help' for commands");
    print_prompt();

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            print_prompt();
            continue;
        };
        let rest: Vec<&str> = parts.collect();

        match (command, rest.as_slice()) {
            ("quit" | "exit", _) => break,
            ("help", _) => println!("{HELP}"),

            ("play", _) => engine.play(),
            ("pause", _) => engine.pause(),
            ("stop", _) => engine.stop(),

            ("mode", [mode]) => match *mode {
                "auto" => engine.set_manual_mode(ManualMode::Auto),
                "on" => engine.set_manual_mode(ManualMode::AlwaysOn),
                "off" => engine.set_manual_mode(ManualMode::AlwaysOff),
                other => println!("unknown mode '{other}' (auto|on|off)"),
            },

            ("mute", [state]) => engine.set_guide_mute(*state == "on"),

            ("gain", [bus, db]) => match (*bus, db.parse::<f32>()) {
                ("inst", Ok(db)) => engine.set_instrument_gain_db(db),
                ("guide", Ok(db)) => engine.set_guide_gain_db(db),
                ("mic", Ok(db)) => engine.set_mic_monitor_gain_db(db),
                _ => println!("usage: gain inst|guide|mic <dB>"),
            },

            ("reverb", [mix, tail]) => match (mix.parse(), tail.parse()) {
                (Ok(mix), Ok(tail)) => engine.set_reverb(mix, tail),
                _ => println!("usage: reverb <mix> <tail_s>"),
            },

            ("timbre", [strength]) => match strength.parse() {
                Ok(strength) => engine.set_timbre(strength),
                Err(_) => println!("usage: timbre <strength>"),
            },

            ("envelope", [hold, release, modifier]) => {
                match (hold.parse(), release.parse(), modifier.parse()) {
                    (Ok(h), Ok(r), Ok(m)) => engine.set_envelope(h, r, m),
                    _ => println!("usage: envelope <hold_ms> <release_ms> <mod>"),
                }
            }

            ("crowd", [adapt, recover, clamp]) => {
                match (adapt.parse(), recover.parse(), clamp.parse()) {
                    (Ok(a), Ok(r), Ok(c)) => engine.set_crowd_cancel(a, r, c),
                    _ => println!("usage: crowd <adapt> <recover> <clamp>"),
                }
            }

            ("load", [slot, path]) => match *slot {
                "inst" | "guide" => {
                    let ok = if *slot == "inst" {
                        engine.load_instrument(path)
                    } else {
                        engine.load_guide(path)
                    };
                    println!("{}", if ok { "loaded" } else { "load failed" });
                }
                other => println!("unknown slot '{other}' (inst|guide)"),
            },

            ("clear", [slot]) => match *slot {
                "inst" => engine.clear_instrument(),
                "guide" => engine.clear_guide(),
                other => println!("unknown slot '{other}' (inst|guide)"),
            },

            ("calibrate", _) => {
                engine.restart_calibration();
                println!("calibration restarted — sing for ten seconds");
            }

            ("buffer", [samples]) => match samples.parse::<usize>() {
                Ok(samples) => match engine.update_buffer_size(samples) {
                    Ok(()) => println!("buffer size now {samples}"),
                    Err(e) => println!("buffer update failed: {e}"),
                },
                Err(_) => println!("usage: buffer <samples>"),
            },

            ("metrics", _) => {
                let snapshot = engine.get_metrics();
                telemetry.record(started.elapsed().as_secs_f64() * 1000.0, &snapshot);
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }

            ("telemetry", ["save", path]) => match telemetry.save(path) {
                Ok(()) => println!("telemetry written to {path} ({} records)", telemetry.len()),
                Err(e) => println!("telemetry save failed: {e}"),
            },

            ("status", _) => {
                println!("transport: {:?}", engine.transport_state());
                println!("mode:      {:?}", engine.manual_mode());
                match engine.instrument_path() {
                    Some(path) => println!(
                        "backing:   {} ({:.1}s)",
                        path.display(),
                        engine.instrument_duration_seconds()
                    ),
                    None => println!("backing:   (none)"),
                }
                match engine.guide_path() {
                    Some(path) => println!(
                        "guide:     {} ({:.1}s){}",
                        path.display(),
                        engine.guide_duration_seconds(),
                        if engine.guide_muted() { " [muted]" } else { "" }
                    ),
                    None => println!("guide:     (none)"),
                }
            }

            (other, _) => println!("unknown command '{other}' — try 'help'"),
        }

        print_prompt();
    }

    engine.stop();
    Ok(())
}

fn print_prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}
