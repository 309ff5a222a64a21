//! Engine configuration, built once at startup.
//!
//! Replaces the legacy pile of process-wide settings: every tunable the
//! engine or bus layer consults is decoded by the external rc collaborator
//! into this struct and passed into the constructors. Nothing here is
//! global and nothing mutates it after bring-up except explicit remapping.

use crate::clock::ClockPolicy;
use crate::control::MidiControlTable;
use crate::control_out::ControlOutMap;
use crate::keymap::KeyMap;
use crate::mute::MuteGroups;

/// Timing defaults for the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct TimingConfig {
    pub ppqn: u32,
    pub bpm: f64,
    pub beats_per_bar: u32,
    /// Time-signature denominator.
    pub beat_width: u32,
    /// Sequence slot holding tempo events, for SeqSpec interop.
    pub tempo_track: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ppqn: 192,
            bpm: 120.0,
            beats_per_bar: 4,
            beat_width: 4,
            tempo_track: 0,
        }
    }
}

/// Screen-set geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetConfig {
    pub seqs_in_set: usize,
    pub max_sets: usize,
}

impl SetConfig {
    pub fn max_sequences(&self) -> usize {
        self.seqs_in_set * self.max_sets
    }
}

impl Default for SetConfig {
    fn default() -> Self {
        Self { seqs_in_set: 32, max_sets: 32 }
    }
}

/// Decoded per-bus rc values applied at MasterBus bring-up.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortConfig {
    /// Clock policy per output bus number.
    pub clocks: Vec<ClockPolicy>,
    /// Input-enable flag per input bus number.
    pub inputs: Vec<bool>,
    /// Create app-owned virtual ports instead of connecting to hardware.
    pub manual_ports: bool,
}

impl PortConfig {
    pub fn clock_for(&self, bus: usize) -> ClockPolicy {
        self.clocks.get(bus).copied().unwrap_or_default()
    }

    pub fn input_for(&self, bus: usize) -> bool {
        self.inputs.get(bus).copied().unwrap_or(false)
    }
}

/// Behavioral policies that are neither timing nor routing.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyConfig {
    /// On stop, resume-style handling of sounding notes: true lets them
    /// decay naturally, false flushes all-notes-off per active bus.
    pub resume_note_ons: bool,
    /// Restrict pattern recording to the pattern's own channel.
    pub filter_by_channel: bool,
    /// Clock-mod restart granularity in sixteenth notes.
    pub clock_mod: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            resume_note_ons: false,
            filter_by_channel: false,
            clock_mod: 64,
        }
    }
}

/// Everything the engine and bus layer consume at startup.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub timing: TimingConfig,
    pub sets: SetConfig,
    pub ports: PortConfig,
    pub policy: PolicyConfig,
    pub controls: MidiControlTable,
    pub control_out: ControlOutMap,
    pub keys: KeyMap,
    pub mute_groups: MuteGroups,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let sets = SetConfig::default();
        Self {
            timing: TimingConfig::default(),
            ports: PortConfig::default(),
            policy: PolicyConfig::default(),
            controls: MidiControlTable::new(sets.seqs_in_set),
            control_out: ControlOutMap::new(sets.seqs_in_set),
            keys: KeyMap::standard(sets.seqs_in_set),
            mute_groups: MuteGroups::new(sets.max_sets, sets.seqs_in_set),
            sets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry() {
        let config = EngineConfig::default();
        assert_eq!(config.timing.ppqn, 192);
        assert_eq!(config.timing.bpm, 120.0);
        assert_eq!(config.sets.seqs_in_set, 32);
        assert_eq!(config.sets.max_sequences(), 1024);
        assert_eq!(config.policy.clock_mod, 64);
    }

    #[test]
    fn port_config_defaults_out_of_range() {
        let ports = PortConfig {
            clocks: vec![ClockPolicy::Pos],
            inputs: vec![true],
            manual_ports: false,
        };
        assert_eq!(ports.clock_for(0), ClockPolicy::Pos);
        assert_eq!(ports.clock_for(5), ClockPolicy::Off);
        assert!(ports.input_for(0));
        assert!(!ports.input_for(5));
    }
}
