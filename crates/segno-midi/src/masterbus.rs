//! The multiplexing façade over the output and input registries.
//!
//! This is the single object the performance engine talks to for MIDI
//! I/O. Port-list state lives behind the master's own mutex, separate
//! from the engine's lock; the engine may call in while holding its own
//! state lock but never the other way around, which keeps the lock order
//! acyclic.

use crate::bus::{set_clock_mod, MidiBus};
use crate::busarray::{BusArray, BusEntry, InArray, InEntry};
use crate::traits::{MidiBackend, MidiError, PortInfo};
use log::warn;
use segno_core::{ClockPolicy, EngineConfig, MidiMsg, PortConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Virtual ports created in manual mode.
const MANUAL_OUT_PORTS: usize = 16;

/// Channel-filtered recording target: which pattern slot is listening to
/// incoming events, and on which channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DumpState {
    pub seq: Option<usize>,
    pub channel: Option<u8>,
}

impl DumpState {
    pub fn is_dumping(&self) -> bool {
        self.seq.is_some()
    }
}

/// The master bus, generic over the platform backend.
pub struct MasterBus<B: MidiBackend> {
    backend: Mutex<B>,
    outs: Mutex<BusArray<B::Out>>,
    ins: Mutex<InArray<B::In>>,
    dump: Mutex<DumpState>,
    running: AtomicBool,
    ports: PortConfig,
    ppqn: u32,
}

impl<B: MidiBackend> MasterBus<B> {
    pub fn new(backend: B, config: &EngineConfig) -> Self {
        set_clock_mod(config.policy.clock_mod);
        Self {
            backend: Mutex::new(backend),
            outs: Mutex::new(BusArray::new()),
            ins: Mutex::new(InArray::new()),
            dump: Mutex::new(DumpState::default()),
            running: AtomicBool::new(false),
            ports: config.ports.clone(),
            ppqn: config.timing.ppqn,
        }
    }

    /// Enumerate and open ports, then apply the decoded rc clock and
    /// input flags. A port that refuses to open is left inactive; the
    /// rest of the busses keep operating.
    pub fn init(&self) -> Result<(), MidiError> {
        let mut backend = self.backend.lock().unwrap();
        let mut outs = self.outs.lock().unwrap();
        let mut ins = self.ins.lock().unwrap();

        if self.ports.manual_ports {
            for i in 0..MANUAL_OUT_PORTS {
                let name = format!("{} out {}", backend.client_name(), i);
                let info = PortInfo::new(0, i as i32, name.clone());
                let mut bus = MidiBus::new(info, self.ppqn);
                match backend.virtual_out(&name) {
                    Ok(port) => bus.open(port),
                    Err(e) => warn!("virtual output {:?}: {}", name, e),
                }
                outs.add(BusEntry::new(bus, true));
            }
            let name = format!("{} in", backend.client_name());
            let info = PortInfo::new(0, 0, name.clone());
            let port = match backend.virtual_in(&name) {
                Ok(port) => Some(port),
                Err(e) => {
                    warn!("virtual input {:?}: {}", name, e);
                    None
                }
            };
            ins.add(InEntry::new(info, port));
        } else {
            for info in backend.scan_outputs()? {
                let mut bus = MidiBus::new(info.clone(), self.ppqn);
                match backend.open_out(&info) {
                    Ok(port) => bus.open(port),
                    Err(e) => warn!("output {:?}: {}", info.name, e),
                }
                outs.add(BusEntry::new(bus, false));
            }
            for info in backend.scan_inputs()? {
                let port = match backend.open_in(&info) {
                    Ok(port) => Some(port),
                    Err(e) => {
                        warn!("input {:?}: {}", info.name, e);
                        None
                    }
                };
                ins.add(InEntry::new(info, port));
            }
        }

        outs.initialize();
        ins.initialize();

        for bus in 0..outs.count() {
            outs.set_clock(bus, self.ports.clock_for(bus));
        }
        for bus in 0..ins.count() {
            ins.set_input(bus, self.ports.input_for(bus));
        }
        Ok(())
    }

    // --- Output path ---

    pub fn play(&self, bus: usize, msg: &MidiMsg, channel: u8) {
        self.outs.lock().unwrap().play(bus, msg, channel);
    }

    pub fn sysex(&self, msg: &MidiMsg) {
        self.outs.lock().unwrap().sysex(msg);
    }

    pub fn flush(&self) {
        self.outs.lock().unwrap().flush();
    }

    /// Emit MIDI Start on every active bus. Idempotent while running.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::AcqRel) {
            self.outs.lock().unwrap().start();
        }
    }

    /// Emit MIDI Stop on every active bus. Only the transition emits:
    /// calling stop when already stopped produces nothing.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.outs.lock().unwrap().stop();
        }
    }

    /// Resume mid-song: Song Position + Continue per clocked bus.
    pub fn continue_from(&self, tick: u64) {
        self.running.store(true, Ordering::Release);
        self.outs.lock().unwrap().continue_from(tick);
    }

    /// Per-bus session clock bring-up (Start at zero, Continue or
    /// clock-mod alignment elsewhere).
    pub fn init_clock(&self, tick: u64) {
        self.running.store(true, Ordering::Release);
        self.outs.lock().unwrap().init_clock(tick);
    }

    pub fn emit_clock(&self, tick: u64) {
        self.outs.lock().unwrap().clock(tick);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // --- Per-bus configuration ---

    pub fn set_clock(&self, bus: usize, clock: ClockPolicy) -> bool {
        self.outs.lock().unwrap().set_clock(bus, clock)
    }

    pub fn get_clock(&self, bus: usize) -> Option<ClockPolicy> {
        self.outs.lock().unwrap().get_clock(bus)
    }

    pub fn set_input(&self, bus: usize, enabled: bool) -> bool {
        self.ins.lock().unwrap().set_input(bus, enabled)
    }

    pub fn get_input(&self, bus: usize) -> Option<bool> {
        self.ins.lock().unwrap().get_input(bus)
    }

    pub fn output_count(&self) -> usize {
        self.outs.lock().unwrap().count()
    }

    pub fn input_count(&self) -> usize {
        self.ins.lock().unwrap().count()
    }

    pub fn output_name(&self, bus: usize) -> Option<String> {
        self.outs.lock().unwrap().name(bus).map(str::to_owned)
    }

    pub fn output_active(&self, bus: usize) -> bool {
        self.outs
            .lock()
            .unwrap()
            .entry(bus)
            .map(|e| e.is_active())
            .unwrap_or(false)
    }

    // --- Input path ---

    /// Block up to `timeout` for incoming data on any enabled input.
    pub fn poll_for_midi(&self, timeout: Duration) -> bool {
        self.ins.lock().unwrap().poll(timeout)
    }

    pub fn get_midi_event(&self) -> Option<MidiMsg> {
        self.ins.lock().unwrap().read()
    }

    /// Route raw input into a pattern slot's recorder, optionally
    /// filtered to one channel. `None` stops dumping.
    pub fn set_sequence_input(&self, seq: Option<usize>, channel: Option<u8>) {
        *self.dump.lock().unwrap() = DumpState { seq, channel };
    }

    pub fn dump_state(&self) -> DumpState {
        *self.dump.lock().unwrap()
    }

    // --- Hot-plug ---

    /// Deactivate every entry matching the exited hardware port.
    pub fn port_exit(&self, client: i32, port: i32) {
        self.outs.lock().unwrap().port_exit(client, port);
        self.ins.lock().unwrap().port_exit(client, port);
    }

    /// Drop a deactivated output entry so a hot-plugged device can be
    /// re-added.
    pub fn replacement_port(&self, client: i32, port: i32) -> Option<usize> {
        self.outs.lock().unwrap().replacement_port(client, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackBackend;

    fn master_with(outs: usize, ins: usize) -> (MasterBus<LoopbackBackend>, Vec<crate::OutTap>) {
        let backend = LoopbackBackend::new(outs, ins);
        let taps: Vec<_> = (0..outs).map(|i| backend.tap(i).unwrap()).collect();
        let mut config = EngineConfig::default();
        config.ports.clocks = vec![ClockPolicy::Pos; outs];
        config.ports.inputs = vec![true; ins];
        let master = MasterBus::new(backend, &config);
        master.init().unwrap();
        (master, taps)
    }

    #[test]
    fn init_opens_and_configures_ports() {
        let (master, _taps) = master_with(2, 1);
        assert_eq!(master.output_count(), 2);
        assert_eq!(master.input_count(), 1);
        assert_eq!(master.get_clock(0), Some(ClockPolicy::Pos));
        assert_eq!(master.get_input(0), Some(true));
        assert!(master.output_active(0));
    }

    #[test]
    fn play_routes_to_one_bus() {
        let (master, taps) = master_with(2, 0);
        let msg = MidiMsg::NoteOn { channel: 0, note: 64, velocity: 90 };
        master.play(1, &msg, 2);
        assert!(taps[0].is_empty());
        assert_eq!(taps[1].messages(), vec![vec![0x92, 64, 90]]);
    }

    #[test]
    fn stop_when_stopped_is_silent() {
        let (master, taps) = master_with(1, 0);
        master.start();
        master.stop();
        master.stop();
        master.stop();
        assert_eq!(taps[0].count_status(0xFC), 1);
    }

    #[test]
    fn start_when_running_is_silent() {
        let (master, taps) = master_with(1, 0);
        master.start();
        master.start();
        assert_eq!(taps[0].count_status(0xFA), 1);
    }

    #[test]
    fn input_events_flow_through() {
        let backend = LoopbackBackend::new(0, 1);
        let feeder = backend.feeder(0).unwrap();
        let mut config = EngineConfig::default();
        config.ports.inputs = vec![true];
        let master = MasterBus::new(backend, &config);
        master.init().unwrap();

        feeder.feed(MidiMsg::NoteOn { channel: 0, note: 36, velocity: 100 });
        assert!(master.poll_for_midi(Duration::from_millis(10)));
        assert_eq!(
            master.get_midi_event(),
            Some(MidiMsg::NoteOn { channel: 0, note: 36, velocity: 100 })
        );
    }

    #[test]
    fn hot_unplug_silences_bus_but_keeps_count() {
        let (master, taps) = master_with(3, 0);
        master.port_exit(0, 2);
        assert_eq!(master.output_count(), 3);
        assert!(!master.output_active(2));

        let msg = MidiMsg::NoteOn { channel: 0, note: 60, velocity: 64 };
        master.play(2, &msg, 0);
        assert!(taps[2].is_empty());

        assert_eq!(master.replacement_port(0, 2), Some(2));
        assert_eq!(master.output_count(), 2);
    }

    #[test]
    fn dump_state_round_trips() {
        let (master, _taps) = master_with(1, 0);
        assert!(!master.dump_state().is_dumping());
        master.set_sequence_input(Some(7), Some(9));
        let dump = master.dump_state();
        assert_eq!(dump.seq, Some(7));
        assert_eq!(dump.channel, Some(9));
        master.set_sequence_input(None, None);
        assert!(!master.dump_state().is_dumping());
    }

    #[test]
    fn manual_mode_creates_virtual_ports() {
        let backend = LoopbackBackend::new(0, 0);
        let mut config = EngineConfig::default();
        config.ports.manual_ports = true;
        let master = MasterBus::new(backend, &config);
        master.init().unwrap();
        assert_eq!(master.output_count(), MANUAL_OUT_PORTS);
        assert_eq!(master.input_count(), 1);
    }
}
