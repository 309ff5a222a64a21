//! Core data types for the segno MIDI performance engine.
//!
//! This crate defines the shared vocabulary consumed by the bus layer and
//! the performance engine: MIDI messages, clock policies, the MIDI control
//! table and its feedback mirror, keystroke maps, mute groups, triggers,
//! the engine configuration, and the SeqSpec file-interop tags. It does no
//! I/O and owns no threads.

mod clock;
mod config;
mod control;
mod control_out;
mod event;
mod keymap;
mod mute;
mod seqspec;
mod trigger;

pub use clock::{ticks_per_pulse, ticks_per_sixteenth, ClockPolicy, CLOCKS_PER_QUARTER};
pub use config::{EngineConfig, PolicyConfig, PortConfig, SetConfig, TimingConfig};
pub use control::{
    ControlAction, ControlFlags, ControlRow, ControlSlot, MetaAction, MidiControl,
    MidiControlTable, CONTROLS_V1, CONTROLS_V2, CONTROLS_V3, META_ACTIONS,
};
pub use control_out::{
    ControlOutMap, OutEvent, SeqAction, UiAction, DEFAULT_CONTROL_OUT_BUS, SEQ_ACTIONS, UI_ACTIONS,
};
pub use event::MidiMsg;
pub use keymap::{KeyMap, Keycode, TransportKeys};
pub use mute::MuteGroups;
pub use seqspec::{
    SeqSpecTag, SEQSPEC_BPM, SEQSPEC_MIDI_BUS, SEQSPEC_MIDI_CHANNEL, SEQSPEC_MIDI_CLOCKS,
    SEQSPEC_MUTE_GROUPS, SEQSPEC_NOTES, SEQSPEC_TIME_SIGNATURE, SEQSPEC_TRIGGERS,
    SEQSPEC_TRIGGERS_NEW,
};
pub use trigger::{Trigger, TriggerList};
