//! segno CLI — port listing and a headless demo performance.
//!
//! Usage:
//!   segno --list
//!   segno [--bpm N] [--seconds N]

use segno_core::{ClockPolicy, EngineConfig, MidiMsg};
use segno_engine::{Performance, Sequence};
use segno_midi::{LoopbackBackend, MidiBackend, MidirBackend};
use std::io::Write;
use std::{env, thread};
use std::time::Duration;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--list") {
        list_ports();
        return;
    }

    let bpm = flag_value(&args, "--bpm").unwrap_or(120.0);
    let seconds = flag_value(&args, "--seconds").unwrap_or(4.0);
    run_demo(bpm, seconds);
}

fn flag_value(args: &[String], flag: &str) -> Option<f64> {
    let idx = args.iter().position(|a| a == flag)?;
    let value = args.get(idx + 1).unwrap_or_else(|| {
        eprintln!("Usage: segno [--list] [--bpm N] [--seconds N]");
        std::process::exit(1);
    });
    value.parse().ok()
}

fn list_ports() {
    let backend = MidirBackend::new("segno");
    match backend.scan_outputs() {
        Ok(ports) => {
            println!("Outputs:");
            for p in &ports {
                println!("  [{}] {}", p.port, p.name);
            }
        }
        Err(e) => eprintln!("Output scan failed: {}", e),
    }
    match backend.scan_inputs() {
        Ok(ports) => {
            println!("Inputs:");
            for p in &ports {
                println!("  [{}] {}", p.port, p.name);
            }
        }
        Err(e) => eprintln!("Input scan failed: {}", e),
    }
}

/// Run a four-on-the-floor pattern on the loopback backend and report
/// what went over the wire.
fn run_demo(bpm: f64, seconds: f64) {
    let backend = LoopbackBackend::new(1, 1);
    let tap = backend.tap(0).unwrap();

    let mut config = EngineConfig::default();
    config.ports.clocks = vec![ClockPolicy::Pos];
    config.ports.inputs = vec![true];
    config.timing.bpm = bpm;
    let ppqn = config.timing.ppqn as u64;

    let mut perf = Performance::new(backend, config).unwrap_or_else(|e| {
        eprintln!("Failed to start engine: {}", e);
        std::process::exit(1);
    });

    let mut kick = Sequence::new("kick", ppqn * 4, 0, 9);
    for beat in 0..4 {
        kick.add_event(beat * ppqn, MidiMsg::NoteOn { channel: 0, note: 36, velocity: 100 });
        kick.add_event(beat * ppqn + ppqn / 2, MidiMsg::NoteOff { channel: 0, note: 36, velocity: 0 });
    }
    perf.install_sequence(0, kick);
    perf.sequence_playing_toggle(0);

    perf.launch();
    perf.start_playing();
    println!("Playing at {} BPM...", bpm);

    let steps = (seconds * 10.0) as u64;
    for _ in 0..steps {
        thread::sleep(Duration::from_millis(100));
        let tick = perf.tick_hint();
        print!(
            "\rTick: {:6} | Beat: {:3} | Messages: {:5}",
            tick,
            tick / ppqn,
            tap.len()
        );
        let _ = std::io::stdout().flush();
    }

    perf.stop_playing();
    perf.finish();

    println!();
    println!("Sent {} messages ({} clock pulses)", tap.len(), tap.count_status(0xF8));
    println!("Done.");
}
