//! The pattern collaborator: one slot's worth of looped MIDI events.
//!
//! The engine owns the slot bookkeeping (armed/queued/one-shot/snapshot
//! flags, dirty tracking); the sequence owns its event list and trigger
//! list. Playback delivers the half-open tick window `[last_tick, tick)`
//! each cycle, so batched or jittered calls never double-emit an event.

use segno_core::{MidiMsg, TriggerList};
use segno_midi::{MasterBus, MidiBackend};

/// One recorded event at a tick within the loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeqEvent {
    pub tick: u64,
    pub msg: MidiMsg,
}

/// A looped pattern bound to an output bus and channel.
#[derive(Clone, Debug)]
pub struct Sequence {
    name: String,
    events: Vec<SeqEvent>,
    length: u64,
    channel: u8,
    bus: usize,

    playing: bool,
    queued: bool,
    queued_tick: u64,
    one_shot: bool,
    one_shot_tick: u64,
    snapshot_playing: bool,

    recording: bool,
    quantized_record: bool,
    /// Quantization grid for recorded events, in ticks.
    snap: u64,
    thru: bool,

    // Dirty flags for the four observer surfaces
    dirty_main: bool,
    dirty_edit: bool,
    dirty_perf: bool,
    dirty_names: bool,

    last_tick: u64,
    triggers: TriggerList,
    /// Sounding notes, flushed when the pattern disarms.
    notes_on: Vec<u8>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, length: u64, bus: usize, channel: u8) -> Self {
        Self {
            name: name.into(),
            events: Vec::new(),
            length: length.max(1),
            channel,
            bus,
            playing: false,
            queued: false,
            queued_tick: 0,
            one_shot: false,
            one_shot_tick: 0,
            snapshot_playing: false,
            recording: false,
            quantized_record: false,
            snap: 0,
            thru: false,
            dirty_main: false,
            dirty_edit: false,
            dirty_perf: false,
            dirty_names: false,
            last_tick: 0,
            triggers: TriggerList::new(),
            notes_on: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.dirty_names = true;
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn set_length(&mut self, length: u64) {
        self.length = length.max(1);
        self.set_dirty();
    }

    pub fn bus(&self) -> usize {
        self.bus
    }

    pub fn set_bus(&mut self, bus: usize) {
        self.bus = bus;
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u8) {
        self.channel = channel & 0x0F;
    }

    // --- Events ---

    /// Insert an event, keeping the list sorted by tick.
    pub fn add_event(&mut self, tick: u64, msg: MidiMsg) {
        let tick = tick % self.length;
        let pos = self
            .events
            .partition_point(|e| e.tick <= tick);
        self.events.insert(pos, SeqEvent { tick, msg });
        self.set_dirty();
    }

    pub fn events(&self) -> &[SeqEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
        self.set_dirty();
    }

    // --- Armed state ---

    pub fn playing(&self) -> bool {
        self.playing
    }

    /// Arm or disarm immediately. Clears any pending queue toggle.
    pub fn set_playing(&mut self, on: bool) {
        if on != self.playing {
            self.playing = on;
            self.set_dirty();
        }
        self.queued = false;
        if !on {
            self.one_shot = false;
        }
    }

    pub fn toggle_playing(&mut self) {
        self.set_playing(!self.playing);
    }

    pub fn queued(&self) -> bool {
        self.queued
    }

    /// Defer a toggle to the next loop boundary after `tick`.
    pub fn toggle_queued(&mut self, tick: u64) {
        self.queued = !self.queued;
        self.queued_tick = tick - (tick % self.length) + self.length;
        self.set_dirty();
    }

    pub fn queued_tick(&self) -> u64 {
        self.queued_tick
    }

    pub fn one_shot(&self) -> bool {
        self.one_shot
    }

    /// Arm for exactly one pass starting now; auto-disarms at the end of
    /// the current loop cycle.
    pub fn arm_one_shot(&mut self, tick: u64) {
        self.playing = true;
        self.one_shot = true;
        self.one_shot_tick = tick - (tick % self.length) + self.length;
        self.set_dirty();
    }

    /// Resolve pending queue toggles and one-shot expiry at `tick`.
    pub fn check_queued(&mut self, tick: u64) {
        if self.queued && tick >= self.queued_tick {
            self.queued = false;
            self.playing = !self.playing;
            if !self.playing {
                self.one_shot = false;
            }
            self.set_dirty();
        }
        if self.one_shot && tick >= self.one_shot_tick {
            self.one_shot = false;
            self.playing = false;
            self.set_dirty();
        }
    }

    // --- Snapshot ---

    pub fn save_playing_state(&mut self) {
        self.snapshot_playing = self.playing;
    }

    pub fn restore_playing_state(&mut self) {
        self.set_playing(self.snapshot_playing);
    }

    // --- Recording ---

    pub fn recording(&self) -> bool {
        self.recording
    }

    pub fn set_recording(&mut self, on: bool) {
        self.recording = on;
    }

    pub fn quantized_record(&self) -> bool {
        self.quantized_record
    }

    pub fn set_quantized_record(&mut self, on: bool, snap: u64) {
        self.quantized_record = on;
        self.snap = snap;
    }

    pub fn thru(&self) -> bool {
        self.thru
    }

    pub fn set_thru(&mut self, on: bool) {
        self.thru = on;
    }

    /// Record one incoming event at the current position.
    pub fn stream_event(&mut self, tick: u64, msg: MidiMsg) {
        if !self.recording {
            return;
        }
        let mut pos = tick % self.length;
        if self.quantized_record && self.snap > 0 {
            let half = self.snap / 2;
            pos = ((pos + half) / self.snap * self.snap) % self.length;
        }
        self.add_event(pos, msg);
    }

    // --- Triggers (Song mode) ---

    pub fn triggers(&self) -> &TriggerList {
        &self.triggers
    }

    pub fn triggers_mut(&mut self) -> &mut TriggerList {
        self.set_dirty();
        &mut self.triggers
    }

    // --- Dirty tracking (read-and-clear per observer) ---

    fn set_dirty(&mut self) {
        self.dirty_main = true;
        self.dirty_edit = true;
        self.dirty_perf = true;
        self.dirty_names = true;
    }

    pub fn is_dirty_main(&mut self) -> bool {
        std::mem::take(&mut self.dirty_main)
    }

    pub fn is_dirty_edit(&mut self) -> bool {
        std::mem::take(&mut self.dirty_edit)
    }

    pub fn is_dirty_perf(&mut self) -> bool {
        std::mem::take(&mut self.dirty_perf)
    }

    pub fn is_dirty_names(&mut self) -> bool {
        std::mem::take(&mut self.dirty_names)
    }

    // --- Playback ---

    /// Jump the playback cursor (loop re-entry, Song-mode reposition).
    pub fn set_orig_tick(&mut self, tick: u64) {
        self.last_tick = tick;
    }

    /// Deliver due events for the window `[last_tick, tick)`.
    ///
    /// Live mode gates on the armed flag; Song mode gates each tick on
    /// trigger coverage and maps through the trigger offset.
    pub fn play<B: MidiBackend>(&mut self, tick: u64, song_mode: bool, master: &MasterBus<B>) {
        self.check_queued(tick);

        let end = tick;
        let mut start = self.last_tick;
        self.last_tick = end;
        if end <= start {
            return;
        }
        // A jump larger than one loop plays each event at most once
        if end - start > self.length {
            start = end - self.length;
        }

        for t in start..end {
            let pos = if song_mode {
                match self.triggers.at(t) {
                    Some(trig) => (t - trig.start + trig.offset) % self.length,
                    None => continue,
                }
            } else {
                if !self.playing {
                    continue;
                }
                t % self.length
            };
            let lo = self.events.partition_point(|e| e.tick < pos);
            let hi = self.events.partition_point(|e| e.tick <= pos);
            for i in lo..hi {
                let msg = &self.events[i].msg;
                match msg {
                    MidiMsg::NoteOn { note, .. } => {
                        if !self.notes_on.contains(note) {
                            self.notes_on.push(*note);
                        }
                    }
                    MidiMsg::NoteOff { note, .. } => {
                        self.notes_on.retain(|n| n != note);
                    }
                    _ => {}
                }
                master.play(self.bus, msg, self.channel);
            }
        }
    }

    /// Emit note-offs for everything still sounding.
    pub fn flush_notes<B: MidiBackend>(&mut self, master: &MasterBus<B>) {
        for note in self.notes_on.drain(..) {
            let off = MidiMsg::NoteOff { channel: 0, note, velocity: 0 };
            master.play(self.bus, &off, self.channel);
        }
    }

    pub fn has_notes_on(&self) -> bool {
        !self.notes_on.is_empty()
    }
}
