//! Mute groups: saved armed/disarmed patterns over one screen-set.

/// A flat `max_sets × seqs_in_set` boolean array, one row per group.
///
/// Group and column indices are always bounds-checked; out-of-range access
/// reads as false and writes are dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MuteGroups {
    bits: Vec<bool>,
    groups: usize,
    group_size: usize,
}

impl MuteGroups {
    pub fn new(groups: usize, group_size: usize) -> Self {
        Self {
            bits: vec![false; groups * group_size],
            groups,
            group_size,
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn get(&self, group: usize, slot: usize) -> bool {
        if group >= self.groups || slot >= self.group_size {
            return false;
        }
        self.bits[group * self.group_size + slot]
    }

    pub fn set(&mut self, group: usize, slot: usize, on: bool) {
        if group >= self.groups || slot >= self.group_size {
            return;
        }
        self.bits[group * self.group_size + slot] = on;
    }

    /// One group's saved pattern, empty if out of range.
    pub fn row(&self, group: usize) -> &[bool] {
        if group >= self.groups {
            return &[];
        }
        let start = group * self.group_size;
        &self.bits[start..start + self.group_size]
    }

    /// Capture `states` (current playing flags) into a group. Extra input
    /// is ignored; missing input clears the tail.
    pub fn learn(&mut self, group: usize, states: &[bool]) {
        if group >= self.groups {
            return;
        }
        for slot in 0..self.group_size {
            let on = states.get(slot).copied().unwrap_or(false);
            self.bits[group * self.group_size + slot] = on;
        }
    }

    /// Flat rc rows (one integer row per group).
    pub fn to_rc(&self) -> Vec<Vec<i32>> {
        (0..self.groups)
            .map(|g| self.row(g).iter().map(|&b| b as i32).collect())
            .collect()
    }

    pub fn from_rc(groups: usize, group_size: usize, rows: &[Vec<i32>]) -> Self {
        let mut mutes = Self::new(groups, group_size);
        for (g, row) in rows.iter().enumerate().take(groups) {
            for (s, &v) in row.iter().enumerate().take(group_size) {
                mutes.bits[g * group_size + s] = v != 0;
            }
        }
        mutes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learn_then_row_round_trips() {
        let mut mutes = MuteGroups::new(32, 32);
        let mut states = vec![false; 32];
        states[0] = true;
        states[2] = true;
        states[5] = true;

        mutes.learn(3, &states);
        assert_eq!(mutes.row(3), &states[..]);
        assert!(mutes.get(3, 2));
        assert!(!mutes.get(3, 1));
    }

    #[test]
    fn learn_clears_previous_contents() {
        let mut mutes = MuteGroups::new(4, 8);
        mutes.set(0, 7, true);
        mutes.learn(0, &[true]);
        assert!(mutes.get(0, 0));
        assert!(!mutes.get(0, 7));
    }

    #[test]
    fn out_of_range_access_is_inert() {
        let mut mutes = MuteGroups::new(4, 8);
        mutes.set(4, 0, true);
        mutes.set(0, 8, true);
        assert!(!mutes.get(4, 0));
        assert!(!mutes.get(0, 8));
        assert!(mutes.row(4).is_empty());
        mutes.learn(99, &[true; 8]); // dropped
        assert_eq!(mutes, MuteGroups::new(4, 8));
    }

    #[test]
    fn rc_round_trip() {
        let mut mutes = MuteGroups::new(8, 4);
        mutes.set(1, 2, true);
        mutes.set(7, 0, true);
        let rc = mutes.to_rc();
        assert_eq!(MuteGroups::from_rc(8, 4, &rc), mutes);
    }
}
