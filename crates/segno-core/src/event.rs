//! MIDI message types and byte-level codecs.
//!
//! `MidiMsg` covers the channel-voice messages the engine records and plays,
//! the system real-time messages used for clock sync, Song Position, and
//! SysEx. Control matching and bus output both work on the encoded
//! status/data bytes, so the codecs here are the single source of truth.

use arrayvec::ArrayVec;

/// Channel-voice status nibbles (lower nibble carries the channel).
pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const AFTERTOUCH: u8 = 0xA0;
pub const CONTROL_CHANGE: u8 = 0xB0;
pub const PROGRAM_CHANGE: u8 = 0xC0;
pub const CHANNEL_PRESSURE: u8 = 0xD0;
pub const PITCH_BEND: u8 = 0xE0;

/// System messages.
pub const SYSEX_START: u8 = 0xF0;
pub const SONG_POSITION: u8 = 0xF2;
pub const SYSEX_END: u8 = 0xF7;
pub const CLOCK: u8 = 0xF8;
pub const START: u8 = 0xFA;
pub const CONTINUE: u8 = 0xFB;
pub const STOP: u8 = 0xFC;

/// A decoded MIDI message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MidiMsg {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    Aftertouch { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    PitchBend { channel: u8, lsb: u8, msb: u8 },
    /// Song position in MIDI beats (sixteenth notes).
    SongPosition { beats: u16 },
    Clock,
    Start,
    Continue,
    Stop,
    SysEx(Vec<u8>),
}

impl MidiMsg {
    /// Decode a message from raw bytes. Returns `None` for anything
    /// malformed or unsupported — the input thread drops those silently.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        if status == SYSEX_START {
            return Some(Self::SysEx(bytes.to_vec()));
        }
        let channel = status & 0x0F;
        match (status & 0xF0, bytes) {
            (NOTE_OFF, &[_, note, velocity]) => Some(Self::NoteOff { channel, note, velocity }),
            // Running-status convention: NoteOn with velocity 0 is a NoteOff
            (NOTE_ON, &[_, note, 0]) => Some(Self::NoteOff { channel, note, velocity: 0 }),
            (NOTE_ON, &[_, note, velocity]) => Some(Self::NoteOn { channel, note, velocity }),
            (AFTERTOUCH, &[_, note, pressure]) => Some(Self::Aftertouch { channel, note, pressure }),
            (CONTROL_CHANGE, &[_, controller, value]) => {
                Some(Self::ControlChange { channel, controller, value })
            }
            (PROGRAM_CHANGE, &[_, program]) => Some(Self::ProgramChange { channel, program }),
            (CHANNEL_PRESSURE, &[_, pressure]) => Some(Self::ChannelPressure { channel, pressure }),
            (PITCH_BEND, &[_, lsb, msb]) => Some(Self::PitchBend { channel, lsb, msb }),
            (0xF0, _) => match status {
                SONG_POSITION => {
                    if let &[_, lsb, msb] = bytes {
                        Some(Self::SongPosition {
                            beats: (msb as u16) << 7 | lsb as u16,
                        })
                    } else {
                        None
                    }
                }
                CLOCK => Some(Self::Clock),
                START => Some(Self::Start),
                CONTINUE => Some(Self::Continue),
                STOP => Some(Self::Stop),
                _ => None,
            },
            _ => None,
        }
    }

    /// Encode a non-SysEx message. Returns `None` for `SysEx`, whose payload
    /// is written separately in chunks.
    pub fn to_short_bytes(&self) -> Option<ArrayVec<u8, 3>> {
        let mut out = ArrayVec::new();
        match *self {
            Self::NoteOff { channel, note, velocity } => {
                out.push(NOTE_OFF | channel);
                out.push(note);
                out.push(velocity);
            }
            Self::NoteOn { channel, note, velocity } => {
                out.push(NOTE_ON | channel);
                out.push(note);
                out.push(velocity);
            }
            Self::Aftertouch { channel, note, pressure } => {
                out.push(AFTERTOUCH | channel);
                out.push(note);
                out.push(pressure);
            }
            Self::ControlChange { channel, controller, value } => {
                out.push(CONTROL_CHANGE | channel);
                out.push(controller);
                out.push(value);
            }
            Self::ProgramChange { channel, program } => {
                out.push(PROGRAM_CHANGE | channel);
                out.push(program);
            }
            Self::ChannelPressure { channel, pressure } => {
                out.push(CHANNEL_PRESSURE | channel);
                out.push(pressure);
            }
            Self::PitchBend { channel, lsb, msb } => {
                out.push(PITCH_BEND | channel);
                out.push(lsb);
                out.push(msb);
            }
            Self::SongPosition { beats } => {
                out.push(SONG_POSITION);
                out.push((beats & 0x7F) as u8);
                out.push(((beats >> 7) & 0x7F) as u8);
            }
            Self::Clock => out.push(CLOCK),
            Self::Start => out.push(START),
            Self::Continue => out.push(CONTINUE),
            Self::Stop => out.push(STOP),
            Self::SysEx(_) => return None,
        }
        Some(out)
    }

    /// Full status byte including the embedded channel, as matched by the
    /// MIDI control table.
    pub fn status_byte(&self) -> u8 {
        match *self {
            Self::NoteOff { channel, .. } => NOTE_OFF | channel,
            Self::NoteOn { channel, .. } => NOTE_ON | channel,
            Self::Aftertouch { channel, .. } => AFTERTOUCH | channel,
            Self::ControlChange { channel, .. } => CONTROL_CHANGE | channel,
            Self::ProgramChange { channel, .. } => PROGRAM_CHANGE | channel,
            Self::ChannelPressure { channel, .. } => CHANNEL_PRESSURE | channel,
            Self::PitchBend { channel, .. } => PITCH_BEND | channel,
            Self::SongPosition { .. } => SONG_POSITION,
            Self::Clock => CLOCK,
            Self::Start => START,
            Self::Continue => CONTINUE,
            Self::Stop => STOP,
            Self::SysEx(_) => SYSEX_START,
        }
    }

    /// First and second data bytes (zero where the message has fewer).
    pub fn data(&self) -> (u8, u8) {
        match *self {
            Self::NoteOff { note, velocity, .. } => (note, velocity),
            Self::NoteOn { note, velocity, .. } => (note, velocity),
            Self::Aftertouch { note, pressure, .. } => (note, pressure),
            Self::ControlChange { controller, value, .. } => (controller, value),
            Self::ProgramChange { program, .. } => (program, 0),
            Self::ChannelPressure { pressure, .. } => (pressure, 0),
            Self::PitchBend { lsb, msb, .. } => (lsb, msb),
            Self::SongPosition { beats } => ((beats & 0x7F) as u8, ((beats >> 7) & 0x7F) as u8),
            _ => (0, 0),
        }
    }

    /// The embedded channel for channel-voice messages.
    pub fn channel(&self) -> Option<u8> {
        match *self {
            Self::NoteOff { channel, .. }
            | Self::NoteOn { channel, .. }
            | Self::Aftertouch { channel, .. }
            | Self::ControlChange { channel, .. }
            | Self::ProgramChange { channel, .. }
            | Self::ChannelPressure { channel, .. }
            | Self::PitchBend { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// Copy of this message with the channel forcibly remapped. The
    /// sequencer owns the destination channel, not the stored event.
    pub fn with_channel(&self, channel: u8) -> Self {
        let channel = channel & 0x0F;
        let mut msg = self.clone();
        match &mut msg {
            Self::NoteOff { channel: c, .. }
            | Self::NoteOn { channel: c, .. }
            | Self::Aftertouch { channel: c, .. }
            | Self::ControlChange { channel: c, .. }
            | Self::ProgramChange { channel: c, .. }
            | Self::ChannelPressure { channel: c, .. }
            | Self::PitchBend { channel: c, .. } => *c = channel,
            _ => {}
        }
        msg
    }

    /// Returns true for note on/off, CC, and the other channel messages.
    pub fn is_channel_voice(&self) -> bool {
        self.channel().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_round_trip() {
        let msg = MidiMsg::NoteOn { channel: 3, note: 60, velocity: 100 };
        let bytes = msg.to_short_bytes().unwrap();
        assert_eq!(&bytes[..], &[0x93, 60, 100]);
        assert_eq!(MidiMsg::from_bytes(&bytes), Some(msg));
    }

    #[test]
    fn note_on_zero_velocity_decodes_as_off() {
        let msg = MidiMsg::from_bytes(&[0x90, 60, 0]).unwrap();
        assert!(matches!(msg, MidiMsg::NoteOff { note: 60, .. }));
    }

    #[test]
    fn realtime_messages_are_single_byte() {
        assert_eq!(&MidiMsg::Clock.to_short_bytes().unwrap()[..], &[0xF8]);
        assert_eq!(&MidiMsg::Start.to_short_bytes().unwrap()[..], &[0xFA]);
        assert_eq!(&MidiMsg::Continue.to_short_bytes().unwrap()[..], &[0xFB]);
        assert_eq!(&MidiMsg::Stop.to_short_bytes().unwrap()[..], &[0xFC]);
    }

    #[test]
    fn song_position_packs_fourteen_bits() {
        let msg = MidiMsg::SongPosition { beats: 0x1234 };
        let bytes = msg.to_short_bytes().unwrap();
        assert_eq!(&bytes[..], &[0xF2, 0x34, 0x24]);
        assert_eq!(MidiMsg::from_bytes(&bytes), Some(msg));
    }

    #[test]
    fn status_byte_includes_channel() {
        let msg = MidiMsg::ControlChange { channel: 5, controller: 7, value: 90 };
        assert_eq!(msg.status_byte(), 0xB5);
        assert_eq!(msg.data(), (7, 90));
    }

    #[test]
    fn with_channel_remaps_voice_messages_only() {
        let msg = MidiMsg::NoteOn { channel: 0, note: 64, velocity: 80 };
        assert_eq!(msg.with_channel(9).channel(), Some(9));
        assert_eq!(MidiMsg::Clock.with_channel(9), MidiMsg::Clock);
    }

    #[test]
    fn sysex_keeps_payload() {
        let raw = [0xF0, 0x7E, 0x01, 0xF7];
        match MidiMsg::from_bytes(&raw) {
            Some(MidiMsg::SysEx(data)) => assert_eq!(data, raw),
            other => panic!("expected sysex, got {:?}", other),
        }
    }

    #[test]
    fn garbage_decodes_to_none() {
        assert_eq!(MidiMsg::from_bytes(&[]), None);
        assert_eq!(MidiMsg::from_bytes(&[0x90, 60]), None);
        assert_eq!(MidiMsg::from_bytes(&[0xF4, 0, 0]), None);
    }
}
