//! SeqSpec tags: fixed 32-bit values identifying sequencer-specific chunks
//! inside a standard MIDI file.
//!
//! The MIDI-file reader/writer is an external collaborator; only the tag
//! values and their meanings are owned here. The values are wire-format
//! constants and must never change.

pub const SEQSPEC_MIDI_BUS: u32 = 0x2424_0001;
pub const SEQSPEC_MIDI_CHANNEL: u32 = 0x2424_0002;
pub const SEQSPEC_MIDI_CLOCKS: u32 = 0x2424_0003;
pub const SEQSPEC_TRIGGERS: u32 = 0x2424_0004;
pub const SEQSPEC_NOTES: u32 = 0x2424_0005;
pub const SEQSPEC_TIME_SIGNATURE: u32 = 0x2424_0006;
pub const SEQSPEC_BPM: u32 = 0x2424_0007;
pub const SEQSPEC_TRIGGERS_NEW: u32 = 0x2424_0008;
pub const SEQSPEC_MUTE_GROUPS: u32 = 0x2424_0009;

/// A decoded SeqSpec tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeqSpecTag {
    MidiBus,
    MidiChannel,
    MidiClocks,
    /// Original trigger format, kept readable for old files.
    Triggers,
    Notes,
    TimeSignature,
    Bpm,
    /// Trigger format with per-trigger offsets.
    TriggersNew,
    MuteGroups,
}

impl SeqSpecTag {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            SEQSPEC_MIDI_BUS => Some(Self::MidiBus),
            SEQSPEC_MIDI_CHANNEL => Some(Self::MidiChannel),
            SEQSPEC_MIDI_CLOCKS => Some(Self::MidiClocks),
            SEQSPEC_TRIGGERS => Some(Self::Triggers),
            SEQSPEC_NOTES => Some(Self::Notes),
            SEQSPEC_TIME_SIGNATURE => Some(Self::TimeSignature),
            SEQSPEC_BPM => Some(Self::Bpm),
            SEQSPEC_TRIGGERS_NEW => Some(Self::TriggersNew),
            SEQSPEC_MUTE_GROUPS => Some(Self::MuteGroups),
            _ => None,
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::MidiBus => SEQSPEC_MIDI_BUS,
            Self::MidiChannel => SEQSPEC_MIDI_CHANNEL,
            Self::MidiClocks => SEQSPEC_MIDI_CLOCKS,
            Self::Triggers => SEQSPEC_TRIGGERS,
            Self::Notes => SEQSPEC_NOTES,
            Self::TimeSignature => SEQSPEC_TIME_SIGNATURE,
            Self::Bpm => SEQSPEC_BPM,
            Self::TriggersNew => SEQSPEC_TRIGGERS_NEW,
            Self::MuteGroups => SEQSPEC_MUTE_GROUPS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for tag in [
            SeqSpecTag::MidiBus,
            SeqSpecTag::MidiChannel,
            SeqSpecTag::MidiClocks,
            SeqSpecTag::Triggers,
            SeqSpecTag::Notes,
            SeqSpecTag::TimeSignature,
            SeqSpecTag::Bpm,
            SeqSpecTag::TriggersNew,
            SeqSpecTag::MuteGroups,
        ] {
            assert_eq!(SeqSpecTag::from_raw(tag.to_raw()), Some(tag));
        }
    }

    #[test]
    fn unknown_tag_is_none() {
        assert_eq!(SeqSpecTag::from_raw(0x2424_00FF), None);
        assert_eq!(SeqSpecTag::from_raw(0), None);
    }

    #[test]
    fn tag_values_are_wire_constants() {
        // These values appear in files on disk; pin them.
        assert_eq!(SEQSPEC_MIDI_BUS, 0x24240001);
        assert_eq!(SEQSPEC_MUTE_GROUPS, 0x24240009);
    }
}
