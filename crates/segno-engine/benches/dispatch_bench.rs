use criterion::{black_box, criterion_group, criterion_main, Criterion};
use segno_core::{ClockPolicy, EngineConfig, MidiControl, MidiMsg};
use segno_engine::{Performance, Sequence};
use segno_midi::LoopbackBackend;

/// The control dispatcher runs on the input thread for every incoming
/// event; measure a matching and a non-matching scan of the full table.
fn dispatch_benchmark(c: &mut Criterion) {
    let mut config = EngineConfig::default();
    config.ports.clocks = vec![ClockPolicy::Off];
    config.ports.inputs = vec![true];
    config.controls.row_mut(5).unwrap().toggle = MidiControl {
        active: true,
        status: 0x90,
        data: 36,
        max_value: 127,
        ..Default::default()
    };
    let perf = Performance::new(LoopbackBackend::new(1, 1), config).unwrap();
    perf.install_sequence(5, Sequence::new("bench", 768, 0, 0));

    let hit = MidiMsg::NoteOn { channel: 0, note: 36, velocity: 100 };
    let miss = MidiMsg::NoteOn { channel: 0, note: 37, velocity: 100 };

    c.bench_function("control_dispatch_hit", |b| {
        b.iter(|| perf.midi_control_event(black_box(&hit)))
    });
    c.bench_function("control_dispatch_miss", |b| {
        b.iter(|| perf.midi_control_event(black_box(&miss)))
    });
}

criterion_group!(benches, dispatch_benchmark);
criterion_main!(benches);
