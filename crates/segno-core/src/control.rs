//! The MIDI control table: incoming (status, data) pairs mapped to actions.
//!
//! The table is a flat, versioned index space rather than a nested
//! structure: slots `[0, seqs_in_set)` toggle patterns in the playing
//! screen-set, the next `seqs_in_set` slots select mute groups, and
//! everything above `track_ctrl_base()` is a fixed list of meta-actions
//! that has grown across table versions. Flat integer ranges keep the
//! table trivially convertible to the external rc representation and keep
//! dispatch on the input thread to plain array walks.

/// Table version sizes for a 32-slot screen-set: the original ten
/// meta-actions, the first extension, and the current table.
pub const CONTROLS_V1: usize = 74;
pub const CONTROLS_V2: usize = 84;
pub const CONTROLS_V3: usize = 96;

/// One configured control: fires when an incoming message's status and
/// first data byte match exactly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MidiControl {
    pub active: bool,
    /// Inverted semantics: an out-of-range value triggers the opposite action.
    pub inverse_active: bool,
    pub status: u8,
    pub data: u8,
    pub min_value: u8,
    pub max_value: u8,
}

impl MidiControl {
    /// Exact-match rule consulted on every incoming event.
    pub fn matches(&self, status: u8, data: u8) -> bool {
        self.active && status == self.status && data == self.data
    }

    /// Secondary check for controls that encode a continuous value.
    pub fn in_range(&self, value: u8) -> bool {
        value >= self.min_value && value <= self.max_value
    }

    /// Flat rc row: `[active, inverse, status, data, min, max]`.
    pub fn to_rc(&self) -> [i32; 6] {
        [
            self.active as i32,
            self.inverse_active as i32,
            self.status as i32,
            self.data as i32,
            self.min_value as i32,
            self.max_value as i32,
        ]
    }

    /// Inverse of [`MidiControl::to_rc`].
    pub fn from_rc(row: [i32; 6]) -> Self {
        Self {
            active: row[0] != 0,
            inverse_active: row[1] != 0,
            status: row[2] as u8,
            data: row[3] as u8,
            min_value: row[4] as u8,
            max_value: row[5] as u8,
        }
    }
}

/// The three action kinds configurable per control slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlAction {
    Toggle,
    On,
    Off,
}

/// One control slot's worth of configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlRow {
    pub toggle: MidiControl,
    pub on: MidiControl,
    pub off: MidiControl,
}

impl ControlRow {
    pub fn get(&self, action: ControlAction) -> &MidiControl {
        match action {
            ControlAction::Toggle => &self.toggle,
            ControlAction::On => &self.on,
            ControlAction::Off => &self.off,
        }
    }

    pub fn get_mut(&mut self, action: ControlAction) -> &mut MidiControl {
        match action {
            ControlAction::Toggle => &mut self.toggle,
            ControlAction::On => &mut self.on,
            ControlAction::Off => &mut self.off,
        }
    }
}

/// Meta-actions above the pattern/group ranges, in table order. The order
/// is part of the external rc interface and must not be rearranged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaAction {
    // Original table (10 rows)
    BpmUp,
    BpmDown,
    ScreensetUp,
    ScreensetDown,
    SetReplace,
    SetSnapshot,
    SetQueue,
    GroupMute,
    GroupLearn,
    PlayScreenset,
    // First extension (10 rows)
    Playback,
    SongRecord,
    Solo,
    Thru,
    BpmPageUp,
    BpmPageDown,
    ScreensetByValue,
    Record,
    QuantizedRecord,
    ResetSequence,
    // Second extension (12 rows)
    OneShot,
    FastForward,
    Rewind,
    Top,
    Playlist,
    PlaylistSong,
    SlotShift,
    Start,
    Stop,
    SnapshotTwo,
    ToggleMutes,
    SongPointer,
}

/// Meta-action rows in table order.
pub const META_ACTIONS: [MetaAction; 32] = [
    MetaAction::BpmUp,
    MetaAction::BpmDown,
    MetaAction::ScreensetUp,
    MetaAction::ScreensetDown,
    MetaAction::SetReplace,
    MetaAction::SetSnapshot,
    MetaAction::SetQueue,
    MetaAction::GroupMute,
    MetaAction::GroupLearn,
    MetaAction::PlayScreenset,
    MetaAction::Playback,
    MetaAction::SongRecord,
    MetaAction::Solo,
    MetaAction::Thru,
    MetaAction::BpmPageUp,
    MetaAction::BpmPageDown,
    MetaAction::ScreensetByValue,
    MetaAction::Record,
    MetaAction::QuantizedRecord,
    MetaAction::ResetSequence,
    MetaAction::OneShot,
    MetaAction::FastForward,
    MetaAction::Rewind,
    MetaAction::Top,
    MetaAction::Playlist,
    MetaAction::PlaylistSong,
    MetaAction::SlotShift,
    MetaAction::Start,
    MetaAction::Stop,
    MetaAction::SnapshotTwo,
    MetaAction::ToggleMutes,
    MetaAction::SongPointer,
];

/// What a control slot index stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSlot {
    /// Pattern toggle within the playing screen-set.
    Pattern(usize),
    /// Mute-group select.
    Group(usize),
    /// Transport/automation meta-action.
    Meta(MetaAction),
}

/// The full table, sized by screen-set geometry plus the meta rows.
#[derive(Clone, Debug)]
pub struct MidiControlTable {
    rows: Vec<ControlRow>,
    seqs_in_set: usize,
}

impl MidiControlTable {
    /// An all-inactive table at the current version size.
    pub fn new(seqs_in_set: usize) -> Self {
        let rows = seqs_in_set * 2 + META_ACTIONS.len();
        Self {
            rows: vec![ControlRow::default(); rows],
            seqs_in_set,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.rows.len()
    }

    /// First index of the meta-action range.
    pub fn track_ctrl_base(&self) -> usize {
        self.seqs_in_set * 2
    }

    pub fn row(&self, slot: usize) -> Option<&ControlRow> {
        self.rows.get(slot)
    }

    pub fn row_mut(&mut self, slot: usize) -> Option<&mut ControlRow> {
        self.rows.get_mut(slot)
    }

    /// Decode a slot index into its action space.
    pub fn classify(&self, slot: usize) -> Option<ControlSlot> {
        if slot < self.seqs_in_set {
            Some(ControlSlot::Pattern(slot))
        } else if slot < self.track_ctrl_base() {
            Some(ControlSlot::Group(slot - self.seqs_in_set))
        } else {
            META_ACTIONS
                .get(slot - self.track_ctrl_base())
                .copied()
                .map(ControlSlot::Meta)
        }
    }

    /// Flat rc representation: one `[toggle, on, off]` triple of sextuples
    /// per slot, in slot order.
    pub fn to_rc(&self) -> Vec<[[i32; 6]; 3]> {
        self.rows
            .iter()
            .map(|row| [row.toggle.to_rc(), row.on.to_rc(), row.off.to_rc()])
            .collect()
    }

    /// Rebuild from rc values. Rows beyond the provided data stay inactive,
    /// so older (shorter) tables load into newer layouts unchanged.
    pub fn from_rc(seqs_in_set: usize, values: &[[[i32; 6]; 3]]) -> Self {
        let mut table = Self::new(seqs_in_set);
        for (row, value) in table.rows.iter_mut().zip(values) {
            row.toggle = MidiControl::from_rc(value[0]);
            row.on = MidiControl::from_rc(value[1]);
            row.off = MidiControl::from_rc(value[2]);
        }
        table
    }
}

/// The held-modifier set: Replace, Snapshot, Queue, OneShot.
///
/// Unhandled combinations are resolved by last-modifier-wins before they
/// reach this type, so in practice at most one bit is set; the type still
/// models a set so that tests can pin that policy down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlFlags(u8);

impl ControlFlags {
    pub const REPLACE: ControlFlags = ControlFlags(0x01);
    pub const SNAPSHOT: ControlFlags = ControlFlags(0x02);
    pub const QUEUE: ControlFlags = ControlFlags(0x04);
    pub const ONESHOT: ControlFlags = ControlFlags(0x08);

    pub const fn empty() -> Self {
        ControlFlags(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: ControlFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn insert(&mut self, other: ControlFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ControlFlags) {
        self.0 &= !other.0;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_requires_active_and_exact_bytes() {
        let ctrl = MidiControl {
            active: true,
            status: 0x90,
            data: 36,
            max_value: 127,
            ..Default::default()
        };
        assert!(ctrl.matches(0x90, 36));
        assert!(!ctrl.matches(0x90, 37));
        assert!(!ctrl.matches(0x91, 36));

        let inactive = MidiControl { active: false, ..ctrl };
        assert!(!inactive.matches(0x90, 36));
    }

    #[test]
    fn in_range_is_inclusive() {
        let ctrl = MidiControl { min_value: 10, max_value: 20, ..Default::default() };
        assert!(!ctrl.in_range(9));
        assert!(ctrl.in_range(10));
        assert!(ctrl.in_range(20));
        assert!(!ctrl.in_range(21));
    }

    #[test]
    fn table_sizes_match_versions() {
        // 32-slot screen-set: 64 track controls + 32 metas
        let table = MidiControlTable::new(32);
        assert_eq!(table.slot_count(), CONTROLS_V3);
        assert_eq!(table.track_ctrl_base(), 64);
        // The versioned bounds are prefixes of the current table
        assert!(CONTROLS_V1 < CONTROLS_V2 && CONTROLS_V2 < CONTROLS_V3);
    }

    #[test]
    fn classify_covers_all_ranges() {
        let table = MidiControlTable::new(32);
        assert_eq!(table.classify(0), Some(ControlSlot::Pattern(0)));
        assert_eq!(table.classify(31), Some(ControlSlot::Pattern(31)));
        assert_eq!(table.classify(32), Some(ControlSlot::Group(0)));
        assert_eq!(table.classify(63), Some(ControlSlot::Group(31)));
        assert_eq!(table.classify(64), Some(ControlSlot::Meta(MetaAction::BpmUp)));
        assert_eq!(table.classify(95), Some(ControlSlot::Meta(MetaAction::SongPointer)));
        assert_eq!(table.classify(96), None);
    }

    #[test]
    fn rc_round_trip_is_exact() {
        let mut table = MidiControlTable::new(32);
        table.row_mut(5).unwrap().toggle = MidiControl {
            active: true,
            inverse_active: true,
            status: 0x90,
            data: 36,
            min_value: 1,
            max_value: 126,
        };
        table.row_mut(70).unwrap().on = MidiControl {
            active: true,
            status: 0xB0,
            data: 64,
            max_value: 127,
            ..Default::default()
        };

        let rc = table.to_rc();
        let rebuilt = MidiControlTable::from_rc(32, &rc);
        assert_eq!(rebuilt.to_rc(), rc);
        assert_eq!(rebuilt.row(5).unwrap().toggle, table.row(5).unwrap().toggle);
        assert_eq!(rebuilt.row(70).unwrap().on, table.row(70).unwrap().on);
    }

    #[test]
    fn short_rc_data_loads_into_longer_table() {
        let mut old = MidiControlTable::new(32);
        old.row_mut(0).unwrap().on.active = true;
        let mut rc = old.to_rc();
        rc.truncate(CONTROLS_V1);

        let table = MidiControlTable::from_rc(32, &rc);
        assert_eq!(table.slot_count(), CONTROLS_V3);
        assert!(table.row(0).unwrap().on.active);
        assert!(!table.row(CONTROLS_V1).unwrap().on.active);
    }

    #[test]
    fn control_flags_set_ops() {
        let mut flags = ControlFlags::empty();
        assert!(flags.is_empty());
        flags.insert(ControlFlags::QUEUE);
        assert!(flags.contains(ControlFlags::QUEUE));
        assert!(!flags.contains(ControlFlags::REPLACE));
        flags.insert(ControlFlags::REPLACE);
        flags.remove(ControlFlags::QUEUE);
        assert!(flags.contains(ControlFlags::REPLACE));
        assert!(!flags.contains(ControlFlags::QUEUE));
        flags.clear();
        assert!(flags.is_empty());
    }
}
