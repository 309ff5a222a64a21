//! MIDI bus layer for segno.
//!
//! Backends supply ports; `MidiBus` owns per-port clock phase and send
//! logic; the registries fan transport operations across busses; and
//! `MasterBus` is the one façade the performance engine talks to.

mod bus;
mod busarray;
mod loopback;
mod masterbus;
mod midir_backend;
mod traits;

pub use bus::{clock_mod, set_clock_mod, MidiBus, SYSEX_CHUNK};
pub use busarray::{BusArray, BusEntry, InArray, InEntry};
pub use loopback::{Feeder, LoopbackBackend, LoopbackIn, LoopbackOut, OutTap};
pub use masterbus::{DumpState, MasterBus};
pub use midir_backend::{MidirBackend, MidirIn, MidirOut};
pub use traits::{MidiBackend, MidiError, PortIn, PortInfo, PortOut};
