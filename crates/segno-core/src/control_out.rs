//! Outgoing control-surface feedback mappings.
//!
//! The mirror image of the control table: per visible pattern slot, four
//! prebuilt events announce arm/mute/queue/delete transitions to an
//! external controller; a second set announces transport and modifier
//! state. Only the mappings live here — the screenset-relative send logic
//! is in the engine crate.

/// Feedback events per visible pattern slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeqAction {
    Arm,
    Mute,
    Queue,
    Delete,
}

pub const SEQ_ACTIONS: [SeqAction; 4] = [
    SeqAction::Arm,
    SeqAction::Mute,
    SeqAction::Queue,
    SeqAction::Delete,
];

/// Non-sequence feedback rows, in rc order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiAction {
    Play,
    Stop,
    Pause,
    QueueOn,
    QueueOff,
    OneshotOn,
    OneshotOff,
    ReplaceOn,
    ReplaceOff,
    SnapStore,
    SnapRestore,
    Snap2Store,
    Snap2Restore,
    LearnOn,
    LearnOff,
}

pub const UI_ACTIONS: [UiAction; 15] = [
    UiAction::Play,
    UiAction::Stop,
    UiAction::Pause,
    UiAction::QueueOn,
    UiAction::QueueOff,
    UiAction::OneshotOn,
    UiAction::OneshotOff,
    UiAction::ReplaceOn,
    UiAction::ReplaceOff,
    UiAction::SnapStore,
    UiAction::SnapRestore,
    UiAction::Snap2Store,
    UiAction::Snap2Restore,
    UiAction::LearnOn,
    UiAction::LearnOff,
];

/// One prebuilt feedback event: `{enabled, channel, status, d0, d1}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutEvent {
    pub enabled: bool,
    pub channel: u8,
    pub status: u8,
    pub d0: u8,
    pub d1: u8,
}

impl OutEvent {
    /// Raw bytes ready for the feedback bus.
    pub fn to_bytes(&self) -> [u8; 3] {
        [self.status | (self.channel & 0x0F), self.d0, self.d1]
    }

    pub fn to_rc(&self) -> [i32; 5] {
        [
            self.enabled as i32,
            self.channel as i32,
            self.status as i32,
            self.d0 as i32,
            self.d1 as i32,
        ]
    }

    pub fn from_rc(row: [i32; 5]) -> Self {
        Self {
            enabled: row[0] != 0,
            channel: row[1] as u8,
            status: row[2] as u8,
            d0: row[3] as u8,
            d1: row[4] as u8,
        }
    }
}

/// Default output bus reserved for control-surface feedback.
pub const DEFAULT_CONTROL_OUT_BUS: u8 = 15;

/// The complete feedback mapping, sized to one screen-set of slots.
#[derive(Clone, Debug)]
pub struct ControlOutMap {
    seq_events: Vec<[OutEvent; 4]>,
    ui_events: [OutEvent; UI_ACTIONS.len()],
    pub bus: u8,
    pub enabled: bool,
}

impl ControlOutMap {
    pub fn new(screenset_size: usize) -> Self {
        Self {
            seq_events: vec![[OutEvent::default(); 4]; screenset_size],
            ui_events: [OutEvent::default(); UI_ACTIONS.len()],
            bus: DEFAULT_CONTROL_OUT_BUS,
            enabled: false,
        }
    }

    /// Number of visible slots the map covers.
    pub fn screenset_size(&self) -> usize {
        self.seq_events.len()
    }

    pub fn seq_event(&self, slot: usize, action: SeqAction) -> Option<&OutEvent> {
        self.seq_events.get(slot).map(|row| &row[action as usize])
    }

    pub fn set_seq_event(&mut self, slot: usize, action: SeqAction, event: OutEvent) {
        if let Some(row) = self.seq_events.get_mut(slot) {
            row[action as usize] = event;
        }
    }

    pub fn ui_event(&self, action: UiAction) -> &OutEvent {
        &self.ui_events[action as usize]
    }

    pub fn set_ui_event(&mut self, action: UiAction, event: OutEvent) {
        self.ui_events[action as usize] = event;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_fold_channel_into_status() {
        let ev = OutEvent { enabled: true, channel: 4, status: 0x90, d0: 10, d1: 127 };
        assert_eq!(ev.to_bytes(), [0x94, 10, 127]);
    }

    #[test]
    fn rc_round_trip() {
        let ev = OutEvent { enabled: true, channel: 15, status: 0xB0, d0: 3, d1: 64 };
        assert_eq!(OutEvent::from_rc(ev.to_rc()), ev);
    }

    #[test]
    fn seq_event_indexing_is_bounded() {
        let mut map = ControlOutMap::new(32);
        let ev = OutEvent { enabled: true, status: 0x90, d0: 8, d1: 1, channel: 0 };
        map.set_seq_event(8, SeqAction::Arm, ev);
        assert_eq!(map.seq_event(8, SeqAction::Arm), Some(&ev));
        assert_eq!(map.seq_event(8, SeqAction::Mute), Some(&OutEvent::default()));
        assert_eq!(map.seq_event(32, SeqAction::Arm), None);
    }

    #[test]
    fn default_bus_is_fifteen() {
        assert_eq!(ControlOutMap::new(32).bus, 15);
    }
}
