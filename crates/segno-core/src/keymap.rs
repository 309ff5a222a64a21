//! Keystroke bindings, kept in lockstep with the MIDI control vocabulary.
//!
//! Two independent bidirectional maps (key↔pattern slot, key↔mute group)
//! plus the named transport keys. Inserting a binding evicts any existing
//! reverse binding so neither side can hold an orphaned entry.

use std::collections::HashMap;

/// A platform keycode. Defaults use ASCII values plus GDK-style codes
/// for non-printable keys.
pub type Keycode = u32;

/// Named transport/modifier key bindings, all plain fields so dispatch can
/// treat keyboard and MIDI control uniformly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportKeys {
    pub start: Keycode,
    pub stop: Keycode,
    pub pause: Keycode,
    pub replace: Keycode,
    pub queue: Keycode,
    pub keep_queue: Keycode,
    pub snapshot_1: Keycode,
    pub snapshot_2: Keycode,
    pub screenset_up: Keycode,
    pub screenset_down: Keycode,
    pub set_playing_screenset: Keycode,
    pub group_on: Keycode,
    pub group_off: Keycode,
    pub group_learn: Keycode,
    pub tap_bpm: Keycode,
    pub bpm_up: Keycode,
    pub bpm_down: Keycode,
    pub fast_forward: Keycode,
    pub rewind: Keycode,
    pub pattern_edit: Keycode,
    pub event_edit: Keycode,
    pub follow_transport: Keycode,
}

impl Default for TransportKeys {
    fn default() -> Self {
        Self {
            start: b' ' as Keycode,
            stop: 0xFF1B, // Escape
            pause: b'.' as Keycode,
            replace: 0xFFE3, // Control_L
            queue: 0xFFE4,   // Control_R
            keep_queue: b'\\' as Keycode,
            snapshot_1: 0xFFE9, // Alt_L
            snapshot_2: 0xFFEA, // Alt_R
            screenset_up: b']' as Keycode,
            screenset_down: b'[' as Keycode,
            set_playing_screenset: 0xFF50, // Home
            group_on: b'l' as Keycode,
            group_off: b'k' as Keycode,
            group_learn: 0xFF63, // Insert
            tap_bpm: 0xFF08,     // Backspace
            bpm_up: b'\'' as Keycode,
            bpm_down: b';' as Keycode,
            fast_forward: b'f' as Keycode,
            rewind: b'r' as Keycode,
            pattern_edit: b'=' as Keycode,
            event_edit: b'-' as Keycode,
            follow_transport: 0xFF57, // End
        }
    }
}

/// Bidirectional keystroke maps for pattern slots and mute groups.
#[derive(Clone, Debug, Default)]
pub struct KeyMap {
    key_to_slot: HashMap<Keycode, usize>,
    slot_to_key: HashMap<usize, Keycode>,
    key_to_group: HashMap<Keycode, usize>,
    group_to_key: HashMap<usize, Keycode>,
    /// Usable group ceiling: larger screen-sets leave fewer usable groups.
    group_max: usize,
    pub transport: TransportKeys,
}

// The classic grid: four keyboard rows of eight, column-major per pair.
const SLOT_LAYOUT: [u8; 32] = *b"1qaz2wsx3edc4rfv5tgb6yhn7ujm8ik,";
const GROUP_LAYOUT: [u8; 32] = *b"!QAZ@WSX#EDC$RFV%TGB^YHN&UJM*IK<";

impl KeyMap {
    /// Empty map with the given group ceiling.
    pub fn new(group_max: usize) -> Self {
        Self {
            group_max,
            transport: TransportKeys::default(),
            ..Default::default()
        }
    }

    /// The default grid layout for a 32-slot screen-set.
    pub fn standard(group_max: usize) -> Self {
        let mut map = Self::new(group_max);
        for (slot, &key) in SLOT_LAYOUT.iter().enumerate() {
            map.bind_slot(key as Keycode, slot);
        }
        for (group, &key) in GROUP_LAYOUT.iter().enumerate() {
            map.bind_group(key as Keycode, group);
        }
        map
    }

    pub fn group_max(&self) -> usize {
        self.group_max
    }

    pub fn set_group_max(&mut self, group_max: usize) {
        self.group_max = group_max;
    }

    /// Bind `key` to a pattern slot, evicting any previous binding of
    /// either the key or the slot.
    pub fn bind_slot(&mut self, key: Keycode, slot: usize) {
        if let Some(old_slot) = self.key_to_slot.remove(&key) {
            self.slot_to_key.remove(&old_slot);
        }
        if let Some(old_key) = self.slot_to_key.remove(&slot) {
            self.key_to_slot.remove(&old_key);
        }
        self.key_to_slot.insert(key, slot);
        self.slot_to_key.insert(slot, key);
    }

    /// Bind `key` to a mute group, with the same eviction rule.
    pub fn bind_group(&mut self, key: Keycode, group: usize) {
        if let Some(old_group) = self.key_to_group.remove(&key) {
            self.group_to_key.remove(&old_group);
        }
        if let Some(old_key) = self.group_to_key.remove(&group) {
            self.key_to_group.remove(&old_key);
        }
        self.key_to_group.insert(key, group);
        self.group_to_key.insert(group, key);
    }

    pub fn lookup_slot(&self, key: Keycode) -> Option<usize> {
        self.key_to_slot.get(&key).copied()
    }

    pub fn lookup_slot_key(&self, slot: usize) -> Option<Keycode> {
        self.slot_to_key.get(&slot).copied()
    }

    /// Group for a key, bounded by the group ceiling.
    pub fn lookup_group(&self, key: Keycode) -> Option<usize> {
        self.key_to_group
            .get(&key)
            .copied()
            .filter(|&g| g < self.group_max)
    }

    pub fn lookup_group_key(&self, group: usize) -> Option<Keycode> {
        if group >= self.group_max {
            return None;
        }
        self.group_to_key.get(&group).copied()
    }

    pub fn slot_bindings(&self) -> impl Iterator<Item = (Keycode, usize)> + '_ {
        self.key_to_slot.iter().map(|(&k, &s)| (k, s))
    }

    pub fn group_bindings(&self) -> impl Iterator<Item = (Keycode, usize)> + '_ {
        self.key_to_group.iter().map(|(&k, &g)| (k, g))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_layout_is_bijective() {
        let map = KeyMap::standard(32);
        for slot in 0..32 {
            let key = map.lookup_slot_key(slot).unwrap();
            assert_eq!(map.lookup_slot(key), Some(slot));
        }
    }

    #[test]
    fn rebinding_key_evicts_old_slot() {
        let mut map = KeyMap::new(32);
        map.bind_slot(b'q' as Keycode, 1);
        map.bind_slot(b'q' as Keycode, 2);
        assert_eq!(map.lookup_slot(b'q' as Keycode), Some(2));
        assert_eq!(map.lookup_slot_key(1), None);
        assert_eq!(map.lookup_slot_key(2), Some(b'q' as Keycode));
    }

    #[test]
    fn rebinding_slot_evicts_old_key() {
        let mut map = KeyMap::new(32);
        map.bind_slot(b'q' as Keycode, 1);
        map.bind_slot(b'w' as Keycode, 1);
        assert_eq!(map.lookup_slot(b'q' as Keycode), None);
        assert_eq!(map.lookup_slot(b'w' as Keycode), Some(1));
    }

    #[test]
    fn group_lookup_respects_ceiling() {
        let mut map = KeyMap::new(4);
        map.bind_group(b'A' as Keycode, 2);
        map.bind_group(b'B' as Keycode, 7);
        assert_eq!(map.lookup_group(b'A' as Keycode), Some(2));
        // Bound but above group_max: unusable
        assert_eq!(map.lookup_group(b'B' as Keycode), None);
        assert_eq!(map.lookup_group_key(7), None);
    }

    #[test]
    fn slot_and_group_maps_are_independent() {
        let mut map = KeyMap::new(32);
        map.bind_slot(b'z' as Keycode, 3);
        map.bind_group(b'z' as Keycode, 5);
        assert_eq!(map.lookup_slot(b'z' as Keycode), Some(3));
        assert_eq!(map.lookup_group(b'z' as Keycode), Some(5));
    }
}
