//! Registries of output and input bus entries.
//!
//! Bulk transport operations iterate every active entry; per-index
//! operations validate the index and the active flag first and degrade to
//! no-ops on bad input — a malformed index or dead port must never stop
//! the transport. Hot-unplug deactivates an entry in place; the slot stays
//! so bus numbering is stable until a replacement arrives.

use crate::bus::MidiBus;
use crate::traits::{PortIn, PortInfo, PortOut};
use log::{debug, info, warn};
use segno_core::{ClockPolicy, MidiMsg};
use std::time::Duration;

/// One output bus plus its registry flags.
pub struct BusEntry<P: PortOut> {
    bus: MidiBus<P>,
    active: bool,
    initialized: bool,
    is_virtual: bool,
}

impl<P: PortOut> BusEntry<P> {
    pub fn new(bus: MidiBus<P>, is_virtual: bool) -> Self {
        Self { bus, active: false, initialized: false, is_virtual }
    }

    pub fn bus(&self) -> &MidiBus<P> {
        &self.bus
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// The output-side registry.
#[derive(Default)]
pub struct BusArray<P: PortOut> {
    entries: Vec<BusEntry<P>>,
}

impl<P: PortOut> BusArray<P> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn add(&mut self, entry: BusEntry<P>) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, bus: usize) -> Option<&BusEntry<P>> {
        self.entries.get(bus)
    }

    /// Apply bring-up rules: virtual ports are always initialized; normal
    /// ports only when their open succeeded. Activation follows the open
    /// state either way.
    pub fn initialize(&mut self) {
        for entry in &mut self.entries {
            entry.initialized = entry.is_virtual || entry.bus.is_open();
            entry.active = entry.bus.is_open();
            info!(
                "output bus {:?}: initialized={} active={}",
                entry.bus.name(),
                entry.initialized,
                entry.active
            );
        }
    }

    /// A write failure means the device went away mid-performance: the
    /// entry deactivates and the rest of the array keeps running.
    fn for_active(&mut self, mut f: impl FnMut(&mut MidiBus<P>) -> Result<(), crate::MidiError>) {
        for entry in &mut self.entries {
            if !entry.active {
                continue;
            }
            if let Err(e) = f(&mut entry.bus) {
                warn!("output bus {:?} failed ({}); deactivating", entry.bus.name(), e);
                entry.active = false;
            }
        }
    }

    pub fn start(&mut self) {
        self.for_active(|bus| bus.start());
    }

    pub fn stop(&mut self) {
        self.for_active(|bus| bus.stop());
    }

    pub fn clock(&mut self, tick: u64) {
        self.for_active(|bus| bus.clock(tick));
    }

    pub fn continue_from(&mut self, tick: u64) {
        self.for_active(|bus| bus.continue_from(tick));
    }

    pub fn init_clock(&mut self, tick: u64) {
        self.for_active(|bus| bus.init_clock(tick));
    }

    pub fn sysex(&mut self, msg: &MidiMsg) {
        self.for_active(|bus| bus.sysex(msg));
    }

    pub fn flush(&mut self) {
        for entry in &mut self.entries {
            if entry.active {
                entry.bus.flush();
            }
        }
    }

    /// Play one event on one bus; silently a no-op for bad indices or
    /// inactive entries.
    pub fn play(&mut self, bus: usize, msg: &MidiMsg, channel: u8) {
        let Some(entry) = self.entries.get_mut(bus) else {
            debug!("play on nonexistent output bus {}", bus);
            return;
        };
        if !entry.active {
            return;
        }
        if let Err(e) = entry.bus.play(msg, channel) {
            warn!("output bus {:?} failed ({}); deactivating", entry.bus.name(), e);
            entry.active = false;
        }
    }

    pub fn set_clock(&mut self, bus: usize, clock: ClockPolicy) -> bool {
        match self.entries.get_mut(bus) {
            Some(entry) => {
                entry.bus.set_clock(clock);
                true
            }
            None => {
                debug!("set_clock on nonexistent output bus {}", bus);
                false
            }
        }
    }

    pub fn get_clock(&self, bus: usize) -> Option<ClockPolicy> {
        self.entries.get(bus).map(|e| e.bus.get_clock())
    }

    pub fn name(&self, bus: usize) -> Option<&str> {
        self.entries.get(bus).map(|e| e.bus.name())
    }

    /// Deactivate (do not destroy) any entry matching the unplugged
    /// hardware identifiers.
    pub fn port_exit(&mut self, client: i32, port: i32) {
        for entry in &mut self.entries {
            let info = entry.bus.info();
            if info.client == client && info.port == port {
                info!("output bus {:?} exited", entry.bus.name());
                entry.active = false;
            }
        }
    }

    /// Remove a deactivated entry matching the identifiers so a fresh one
    /// can take its place on hot-plug. Returns the vacated index.
    pub fn replacement_port(&mut self, client: i32, port: i32) -> Option<usize> {
        let idx = self.entries.iter().position(|e| {
            let info = e.bus.info();
            !e.active && info.client == client && info.port == port
        })?;
        self.entries.remove(idx);
        Some(idx)
    }
}

/// One input bus entry.
pub struct InEntry<P: PortIn> {
    info: PortInfo,
    port: Option<P>,
    active: bool,
    initialized: bool,
    enabled: bool,
}

impl<P: PortIn> InEntry<P> {
    pub fn new(info: PortInfo, port: Option<P>) -> Self {
        Self {
            info,
            port,
            active: false,
            initialized: false,
            enabled: false,
        }
    }

    pub fn info(&self) -> &PortInfo {
        &self.info
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// The input-side registry.
#[derive(Default)]
pub struct InArray<P: PortIn> {
    entries: Vec<InEntry<P>>,
}

impl<P: PortIn> InArray<P> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn add(&mut self, entry: InEntry<P>) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, bus: usize) -> Option<&InEntry<P>> {
        self.entries.get(bus)
    }

    /// Inputs are marked initialized unconditionally; whether they are
    /// read is driven by the saved enable flags, not by open success.
    pub fn initialize(&mut self) {
        for entry in &mut self.entries {
            entry.initialized = true;
            entry.active = entry.port.is_some();
            info!(
                "input bus {:?}: active={} enabled={}",
                entry.info.name, entry.active, entry.enabled
            );
        }
    }

    pub fn set_input(&mut self, bus: usize, enabled: bool) -> bool {
        match self.entries.get_mut(bus) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => {
                debug!("set_input on nonexistent input bus {}", bus);
                false
            }
        }
    }

    pub fn get_input(&self, bus: usize) -> Option<bool> {
        self.entries.get(bus).map(|e| e.enabled)
    }

    /// Block up to `timeout` for data on any enabled input.
    pub fn poll(&mut self, timeout: Duration) -> bool {
        let mut live: Vec<&mut InEntry<P>> = self
            .entries
            .iter_mut()
            .filter(|e| e.active && e.enabled && e.port.is_some())
            .collect();
        if live.is_empty() {
            std::thread::sleep(timeout);
            return false;
        }
        // Fast pass, then share the timeout across ports
        for entry in live.iter_mut() {
            if entry.port.as_mut().unwrap().poll(Duration::ZERO) {
                return true;
            }
        }
        let share = (timeout / live.len() as u32).max(Duration::from_millis(1));
        for entry in live.iter_mut() {
            if entry.port.as_mut().unwrap().poll(share) {
                return true;
            }
        }
        false
    }

    /// Next pending event from any enabled input. Disabled inputs are
    /// drained and discarded so stale traffic cannot accumulate.
    pub fn read(&mut self) -> Option<MidiMsg> {
        let mut result = None;
        for entry in &mut self.entries {
            let Some(port) = entry.port.as_mut() else {
                continue;
            };
            if !entry.active || !entry.enabled {
                while port.read().is_some() {}
                continue;
            }
            if result.is_none() {
                result = port.read();
            }
        }
        result
    }

    pub fn port_exit(&mut self, client: i32, port: i32) {
        for entry in &mut self.entries {
            if entry.info.client == client && entry.info.port == port {
                info!("input bus {:?} exited", entry.info.name);
                entry.active = false;
            }
        }
    }

    pub fn replacement_port(&mut self, client: i32, port: i32) -> Option<usize> {
        let idx = self
            .entries
            .iter()
            .position(|e| !e.active && e.info.client == client && e.info.port == port)?;
        self.entries.remove(idx);
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MidiError;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecPort {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl PortOut for RecPort {
        fn write(&mut self, bytes: &[u8]) -> Result<(), MidiError> {
            if *self.fail.lock().unwrap() {
                return Err(MidiError::Closed);
            }
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    fn array_with(n: usize) -> (BusArray<RecPort>, Vec<RecPort>) {
        let mut array = BusArray::new();
        let mut ports = Vec::new();
        for i in 0..n {
            let port = RecPort::default();
            let mut bus = MidiBus::new(PortInfo::new(10, i as i32, format!("bus {}", i)), 192);
            bus.open(port.clone());
            bus.set_clock(ClockPolicy::Pos);
            ports.push(port);
            array.add(BusEntry::new(bus, false));
        }
        array.initialize();
        (array, ports)
    }

    #[test]
    fn initialize_activates_open_ports_only() {
        let mut array: BusArray<RecPort> = BusArray::new();
        let mut open_bus = MidiBus::new(PortInfo::new(0, 0, "open"), 192);
        open_bus.open(RecPort::default());
        array.add(BusEntry::new(open_bus, false));
        array.add(BusEntry::new(MidiBus::new(PortInfo::new(0, 1, "closed"), 192), false));
        array.add(BusEntry::new(MidiBus::new(PortInfo::new(0, 2, "virt"), 192), true));
        array.initialize();

        assert!(array.entry(0).unwrap().is_active());
        assert!(array.entry(0).unwrap().is_initialized());
        assert!(!array.entry(1).unwrap().is_active());
        assert!(!array.entry(1).unwrap().is_initialized());
        // Virtual: initialized even though never opened
        assert!(array.entry(2).unwrap().is_initialized());
        assert!(!array.entry(2).unwrap().is_active());
    }

    #[test]
    fn out_of_range_operations_are_noops() {
        let (mut array, _ports) = array_with(2);
        let msg = MidiMsg::NoteOn { channel: 0, note: 60, velocity: 64 };
        array.play(99, &msg, 0);
        assert!(!array.set_clock(99, ClockPolicy::Off));
        assert_eq!(array.get_clock(99), None);
        assert_eq!(array.count(), 2);
    }

    #[test]
    fn bulk_start_reaches_every_active_bus() {
        let (mut array, ports) = array_with(3);
        array.start();
        for port in &ports {
            assert_eq!(port.sent.lock().unwrap().len(), 1);
            assert_eq!(port.sent.lock().unwrap()[0], vec![0xFA]);
        }
    }

    #[test]
    fn write_failure_deactivates_only_that_bus() {
        let (mut array, ports) = array_with(2);
        *ports[0].fail.lock().unwrap() = true;
        array.start();
        assert!(!array.entry(0).unwrap().is_active());
        assert!(array.entry(1).unwrap().is_active());
        // Subsequent bulk ops skip the dead entry
        array.stop();
        assert_eq!(ports[1].sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn port_exit_deactivates_without_removing() {
        let (mut array, ports) = array_with(3);
        array.port_exit(10, 2);
        assert_eq!(array.count(), 3);
        assert!(!array.entry(2).unwrap().is_active());

        let msg = MidiMsg::NoteOn { channel: 0, note: 60, velocity: 64 };
        array.play(2, &msg, 0);
        assert!(ports[2].sent.lock().unwrap().is_empty());
    }

    #[test]
    fn replacement_port_removes_matching_dead_entry() {
        let (mut array, _ports) = array_with(3);
        // Active entries are not eligible
        assert_eq!(array.replacement_port(10, 1), None);
        array.port_exit(10, 1);
        assert_eq!(array.replacement_port(10, 1), Some(1));
        assert_eq!(array.count(), 2);
    }

    struct ScriptIn {
        msgs: Vec<MidiMsg>,
    }

    impl PortIn for ScriptIn {
        fn poll(&mut self, _timeout: Duration) -> bool {
            !self.msgs.is_empty()
        }
        fn read(&mut self) -> Option<MidiMsg> {
            if self.msgs.is_empty() {
                None
            } else {
                Some(self.msgs.remove(0))
            }
        }
    }

    #[test]
    fn disabled_inputs_are_drained_not_delivered() {
        let mut array = InArray::new();
        array.add(InEntry::new(
            PortInfo::new(0, 0, "in"),
            Some(ScriptIn { msgs: vec![MidiMsg::Clock, MidiMsg::Start] }),
        ));
        array.initialize();

        // Not enabled yet: events are discarded
        assert_eq!(array.read(), None);
        array.set_input(0, true);
        assert_eq!(array.read(), None);
    }

    #[test]
    fn enabled_input_delivers_in_order() {
        let mut array = InArray::new();
        array.add(InEntry::new(
            PortInfo::new(0, 0, "in"),
            Some(ScriptIn { msgs: vec![MidiMsg::Start, MidiMsg::Stop] }),
        ));
        array.initialize();
        array.set_input(0, true);

        assert!(array.poll(Duration::from_millis(1)));
        assert_eq!(array.read(), Some(MidiMsg::Start));
        assert_eq!(array.read(), Some(MidiMsg::Stop));
        assert_eq!(array.read(), None);
    }

    #[test]
    fn set_input_out_of_range_is_noop() {
        let mut array: InArray<ScriptIn> = InArray::new();
        assert!(!array.set_input(5, true));
        assert_eq!(array.get_input(5), None);
    }
}
