//! Control-surface feedback: mirror internal state onto an external
//! controller's LEDs and displays.
//!
//! Hardware controllers only have buttons for one screen-set's worth of
//! slots, so sequence feedback is indexed relative to the current
//! screen-set offset and silently dropped outside the visible window.

use segno_core::{ControlOutMap, MidiMsg, SeqAction, UiAction};
use segno_midi::{MasterBus, MidiBackend};

/// Feedback sender over a `ControlOutMap`.
#[derive(Clone, Debug)]
pub struct ControlOutput {
    map: ControlOutMap,
    /// First absolute slot of the visible screen-set.
    offset: usize,
}

impl ControlOutput {
    pub fn new(map: ControlOutMap) -> Self {
        Self { map, offset: 0 }
    }

    pub fn enabled(&self) -> bool {
        self.map.enabled
    }

    pub fn screenset_size(&self) -> usize {
        self.map.screenset_size()
    }

    pub fn screenset_offset(&self) -> usize {
        self.offset
    }

    /// Follow a screen-set switch.
    pub fn set_screenset_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub fn map(&self) -> &ControlOutMap {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut ControlOutMap {
        &mut self.map
    }

    fn send<B: MidiBackend>(&self, master: &MasterBus<B>, bytes: [u8; 3], flush: bool) {
        if let Some(msg) = MidiMsg::from_bytes(&bytes) {
            master.play(self.map.bus as usize, &msg, bytes[0] & 0x0F);
            if flush {
                master.flush();
            }
        }
    }

    /// Announce a sequence state transition. `seq` is an absolute slot
    /// index; it is adjusted by the screen-set offset and dropped when the
    /// adjusted index falls outside the visible window.
    pub fn send_seq_event<B: MidiBackend>(
        &self,
        master: &MasterBus<B>,
        seq: usize,
        action: SeqAction,
        flush: bool,
    ) {
        if !self.map.enabled {
            return;
        }
        let Some(slot) = seq.checked_sub(self.offset) else {
            return;
        };
        if slot >= self.map.screenset_size() {
            return;
        }
        if let Some(event) = self.map.seq_event(slot, action) {
            if event.enabled {
                self.send(master, event.to_bytes(), flush);
            }
        }
    }

    /// Send `delete` feedback for every visible slot, clearing stale
    /// controller state when the screen-set switches.
    pub fn clear_sequences<B: MidiBackend>(&self, master: &MasterBus<B>) {
        if !self.map.enabled {
            return;
        }
        for slot in 0..self.map.screenset_size() {
            if let Some(event) = self.map.seq_event(slot, SeqAction::Delete) {
                if event.enabled {
                    self.send(master, event.to_bytes(), false);
                }
            }
        }
        master.flush();
    }

    /// Announce a transport or modifier transition.
    pub fn send_ui_event<B: MidiBackend>(&self, master: &MasterBus<B>, action: UiAction) {
        if !self.map.enabled {
            return;
        }
        let event = self.map.ui_event(action);
        if event.enabled {
            self.send(master, event.to_bytes(), true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segno_core::{ClockPolicy, EngineConfig, OutEvent};
    use segno_midi::{LoopbackBackend, OutTap};

    fn setup() -> (MasterBus<LoopbackBackend>, Vec<OutTap>, ControlOutput) {
        let backend = LoopbackBackend::new(16, 0);
        let taps: Vec<_> = (0..16).map(|i| backend.tap(i).unwrap()).collect();
        let mut config = EngineConfig::default();
        config.ports.clocks = vec![ClockPolicy::Off; 16];
        let master = MasterBus::new(backend, &config);
        master.init().unwrap();

        let mut map = ControlOutMap::new(32);
        map.enabled = true;
        for slot in 0..32 {
            map.set_seq_event(
                slot,
                SeqAction::Arm,
                OutEvent { enabled: true, channel: 0, status: 0x90, d0: slot as u8, d1: 127 },
            );
            map.set_seq_event(
                slot,
                SeqAction::Delete,
                OutEvent { enabled: true, channel: 0, status: 0x90, d0: slot as u8, d1: 0 },
            );
        }
        map.set_ui_event(
            UiAction::Play,
            OutEvent { enabled: true, channel: 15, status: 0xB0, d0: 105, d1: 127 },
        );
        let out = ControlOutput::new(map);
        (master, taps, out)
    }

    #[test]
    fn seq_event_goes_to_feedback_bus() {
        let (master, taps, out) = setup();
        out.send_seq_event(&master, 3, SeqAction::Arm, true);
        assert_eq!(taps[15].messages(), vec![vec![0x90, 3, 127]]);
        assert!(taps[0].is_empty());
    }

    #[test]
    fn offset_adjusts_slot_and_window() {
        let (master, taps, mut out) = setup();
        out.set_screenset_offset(32);

        // Second screen-set: absolute 40 is visible slot 8
        out.send_seq_event(&master, 40, SeqAction::Arm, false);
        assert_eq!(taps[15].messages(), vec![vec![0x90, 8, 127]]);

        // Below the window (absolute 8) and past it (absolute 64): dropped
        out.send_seq_event(&master, 8, SeqAction::Arm, false);
        out.send_seq_event(&master, 64, SeqAction::Arm, false);
        assert_eq!(taps[15].len(), 1);
    }

    #[test]
    fn clear_sequences_covers_visible_window() {
        let (master, taps, out) = setup();
        out.clear_sequences(&master);
        assert_eq!(taps[15].len(), 32);
        assert_eq!(taps[15].messages()[0], vec![0x90, 0, 0]);
    }

    #[test]
    fn disabled_map_sends_nothing() {
        let (master, taps, mut out) = setup();
        out.map_mut().enabled = false;
        out.send_seq_event(&master, 3, SeqAction::Arm, true);
        out.send_ui_event(&master, UiAction::Play);
        out.clear_sequences(&master);
        assert!(taps[15].is_empty());
    }

    #[test]
    fn ui_event_uses_its_mapping() {
        let (master, taps, out) = setup();
        out.send_ui_event(&master, UiAction::Play);
        assert_eq!(taps[15].messages(), vec![vec![0xBF, 105, 127]]);
        // Unmapped action: silence
        out.send_ui_event(&master, UiAction::Stop);
        assert_eq!(taps[15].len(), 1);
    }
}
