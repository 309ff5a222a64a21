//! Performance/transport engine for segno.
//!
//! Owns the pattern slot array, mute groups, screen-sets, the playback
//! clock and its two real-time threads, and the live-control dispatch
//! shared by keyboard and MIDI control surfaces.

mod control_out;
mod performance;
mod sequence;
mod transport;

pub use control_out::ControlOutput;
pub use performance::{GroupLearnObserver, Performance, PlaybackMode};
pub use sequence::{SeqEvent, Sequence};
pub use transport::{bbt_position, BbtPosition, InternalClock, TransportLink, TICKS_PER_BEAT_FACTOR};
