//! The performance engine: pattern slots, transport, live control.
//!
//! All shared state sits behind one mutex + condvar pair. The output
//! thread blocks on the condvar until playback starts, then advances the
//! tick counter each quantum and delivers due events through the master
//! bus; the input thread polls the master bus and feeds the control
//! dispatcher. The GUI-facing API is the same dispatcher, so keyboard,
//! mouse, and MIDI control share one action vocabulary.
//!
//! Real-time policy: nothing in here panics on bad input. Invalid
//! sequence/screenset/group/bus indices degrade to logged no-ops.

use crate::control_out::ControlOutput;
use crate::sequence::Sequence;
use crate::transport::{InternalClock, TransportLink};
use log::debug;
use segno_core::{
    ControlAction, ControlFlags, ControlSlot, EngineConfig, KeyMap, Keycode, MetaAction,
    MidiControlTable, MidiMsg, MuteGroups, SeqAction, TriggerList, UiAction,
};
use segno_midi::{MasterBus, MidiBackend, MidiError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Output-thread sleep quantum; bounds stop latency and clock jitter.
const QUANTUM: Duration = Duration::from_millis(2);

/// Input poll timeout; bounds shutdown latency of the input thread.
const INPUT_TIMEOUT: Duration = Duration::from_millis(100);

const BPM_MIN: f64 = 20.0;
const BPM_MAX: f64 = 500.0;
const BPM_PAGE_STEP: f64 = 10.0;

/// FF/rewind acceleration: growth per step, clamped.
const FF_RW_GROWTH: f64 = 1.1;
const FF_RW_MAX: f64 = 60.0;

/// Live mode plays armed patterns; Song mode follows triggers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackMode {
    Live,
    Song,
}

/// Called when group-learn turns on or off.
pub type GroupLearnObserver = Box<dyn FnMut(bool) + Send>;

/// Everything guarded by the engine mutex.
struct PerfState {
    seqs: Vec<Option<Sequence>>,
    mutes: MuteGroups,
    mode_group: bool,
    group_learn: bool,
    selected_group: Option<usize>,

    screenset: usize,
    playing_screenset: usize,
    notepads: Vec<String>,

    control_status: ControlFlags,
    controls: MidiControlTable,
    keys: KeyMap,
    control_out: ControlOutput,

    mode: PlaybackMode,
    bpm: f64,
    tick: u64,
    starting_tick: u64,
    left_tick: u64,
    right_tick: u64,
    looping: bool,
    song_recording: bool,
    paused: bool,

    ff_rw_dir: i8,
    ff_rw_rate: f64,

    undo: Vec<Vec<(usize, TriggerList)>>,
    redo: Vec<Vec<(usize, TriggerList)>>,
    learn_observers: Vec<GroupLearnObserver>,

    // Copied out of the config at construction
    seqs_in_set: usize,
    max_sets: usize,
    ppqn: u32,
    resume_note_ons: bool,
    filter_by_channel: bool,
}

impl PerfState {
    fn left_right_size(&self) -> u64 {
        self.right_tick.saturating_sub(self.left_tick)
    }

    fn is_seq_valid(&self, seq: usize) -> bool {
        seq < self.seqs.len()
    }

    fn is_screenset_valid(&self, set: usize) -> bool {
        set < self.max_sets
    }

    fn playing_base(&self) -> usize {
        self.playing_screenset * self.seqs_in_set
    }
}

struct Shared {
    state: Mutex<PerfState>,
    cond: Condvar,
    running: AtomicBool,
    alive: AtomicBool,
    /// Lock-free tick mirror for displays.
    tick_hint: AtomicU64,
    link: Mutex<Box<dyn TransportLink>>,
}

impl Shared {
    fn alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// The central orchestrator, generic over the MIDI backend.
pub struct Performance<B: MidiBackend + 'static> {
    master: Arc<MasterBus<B>>,
    shared: Arc<Shared>,
    out_thread: Option<JoinHandle<()>>,
    in_thread: Option<JoinHandle<()>>,
}

impl<B: MidiBackend + 'static> Performance<B> {
    /// Build the engine and bring the bus layer up.
    pub fn new(backend: B, config: EngineConfig) -> Result<Self, MidiError> {
        let master = Arc::new(MasterBus::new(backend, &config));
        master.init()?;

        let max_seqs = config.sets.max_sequences();
        let state = PerfState {
            seqs: (0..max_seqs).map(|_| None).collect(),
            mutes: config.mute_groups,
            mode_group: true,
            group_learn: false,
            selected_group: None,
            screenset: 0,
            playing_screenset: 0,
            notepads: vec![String::new(); config.sets.max_sets],
            control_status: ControlFlags::empty(),
            controls: config.controls,
            keys: config.keys,
            control_out: ControlOutput::new(config.control_out),
            mode: PlaybackMode::Live,
            bpm: config.timing.bpm,
            tick: 0,
            starting_tick: 0,
            left_tick: 0,
            right_tick: config.timing.ppqn as u64 * 16,
            looping: false,
            song_recording: false,
            paused: false,
            ff_rw_dir: 0,
            ff_rw_rate: 1.0,
            undo: Vec::new(),
            redo: Vec::new(),
            learn_observers: Vec::new(),
            seqs_in_set: config.sets.seqs_in_set,
            max_sets: config.sets.max_sets,
            ppqn: config.timing.ppqn,
            resume_note_ons: config.policy.resume_note_ons,
            filter_by_channel: config.policy.filter_by_channel,
        };

        Ok(Self {
            master,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                cond: Condvar::new(),
                running: AtomicBool::new(false),
                alive: AtomicBool::new(true),
                tick_hint: AtomicU64::new(0),
                link: Mutex::new(Box::new(InternalClock)),
            }),
            out_thread: None,
            in_thread: None,
        })
    }

    pub fn master(&self) -> &Arc<MasterBus<B>> {
        &self.master
    }

    /// Replace the transport link (e.g. attach an external sync peer).
    pub fn set_transport_link(&self, link: Box<dyn TransportLink>) {
        *self.shared.link.lock().unwrap() = link;
    }

    // --- Threads ---

    /// Spawn the output and input threads.
    pub fn launch(&mut self) {
        if self.out_thread.is_some() {
            return;
        }
        let shared = self.shared.clone();
        let master = self.master.clone();
        self.out_thread = Some(
            thread::Builder::new()
                .name("segno-output".into())
                .spawn(move || Self::output_loop(&shared, &master))
                .expect("spawn output thread"),
        );
        let shared = self.shared.clone();
        let master = self.master.clone();
        self.in_thread = Some(
            thread::Builder::new()
                .name("segno-input".into())
                .spawn(move || Self::input_loop(&shared, &master))
                .expect("spawn input thread"),
        );
    }

    /// Stop playback and join both threads.
    pub fn finish(&mut self) {
        self.shared.alive.store(false, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
        self.shared.cond.notify_all();
        if let Some(handle) = self.out_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.in_thread.take() {
            let _ = handle.join();
        }
    }

    fn output_loop(shared: &Shared, master: &MasterBus<B>) {
        while shared.alive() {
            {
                let mut st = shared.state.lock().unwrap();
                while !shared.running() && shared.alive() {
                    st = shared.cond.wait(st).unwrap();
                }
            }
            if !shared.alive() {
                break;
            }

            let session_tick = shared.state.lock().unwrap().tick;
            master.init_clock(session_tick);

            let mut frac = 0.0f64;
            let mut last = Instant::now();
            while shared.running() && shared.alive() {
                thread::sleep(QUANTUM);
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f64();
                last = now;

                let mut st = shared.state.lock().unwrap();
                // Lock order is always state-then-link
                let external = shared.link.lock().unwrap().position();
                let new_tick = match external {
                    Some(tick) => tick,
                    None => {
                        frac += dt * st.bpm * st.ppqn as f64 / 60.0;
                        let whole = frac as u64;
                        frac -= whole as f64;
                        st.tick + whole
                    }
                };
                Self::advance_state(&mut st, master, new_tick);
                shared.tick_hint.store(st.tick, Ordering::Release);
                drop(st);
                master.flush();
            }

            // Session teardown: silence per the resume policy
            let mut st = shared.state.lock().unwrap();
            if !st.resume_note_ons {
                for seq in st.seqs.iter_mut().flatten() {
                    seq.flush_notes(master);
                }
            }
            drop(st);
            master.flush();
        }
    }

    /// One transport step: loop wrap, pattern delivery, clock emission.
    fn advance_state(st: &mut PerfState, master: &MasterBus<B>, tick: u64) {
        let mut tick = tick;
        if st.mode == PlaybackMode::Song && st.looping && tick >= st.right_tick {
            let size = st.left_right_size();
            tick = if size > 0 {
                st.left_tick + (tick - st.right_tick) % size
            } else {
                st.left_tick
            };
            for seq in st.seqs.iter_mut().flatten() {
                seq.set_orig_tick(tick);
            }
        }
        st.tick = tick;
        let song_mode = st.mode == PlaybackMode::Song;
        for seq in st.seqs.iter_mut().flatten() {
            seq.play(tick, song_mode, master);
        }
        master.emit_clock(tick);
    }

    /// Drive the transport by hand when no output thread is running
    /// (offline use and deterministic tests).
    pub fn advance_to(&self, tick: u64) {
        let mut st = self.shared.state.lock().unwrap();
        Self::advance_state(&mut st, &self.master, tick);
        self.shared.tick_hint.store(st.tick, Ordering::Release);
        drop(st);
        self.master.flush();
    }

    fn input_loop(shared: &Shared, master: &MasterBus<B>) {
        while shared.alive() {
            if master.poll_for_midi(INPUT_TIMEOUT) {
                while let Some(msg) = master.get_midi_event() {
                    Self::handle_incoming(shared, master, &msg);
                }
            }
        }
    }

    fn handle_incoming(shared: &Shared, master: &MasterBus<B>, msg: &MidiMsg) {
        let mut st = shared.state.lock().unwrap();
        Self::dispatch_control(shared, &mut st, master, msg);

        // Channel-filtered recording into the listening pattern
        let dump = master.dump_state();
        let Some(target) = dump.seq else {
            return;
        };
        if !st.is_seq_valid(target) {
            return;
        }
        let tick = st.tick;
        let filter = st.filter_by_channel;
        if let Some(seq) = st.seqs[target].as_mut() {
            let channel_ok = match (filter, dump.channel, msg.channel()) {
                (true, Some(want), Some(have)) => want == have,
                (true, Some(_), None) => false,
                _ => true,
            };
            if channel_ok {
                seq.stream_event(tick, msg.clone());
                if seq.thru() {
                    let (bus, channel) = (seq.bus(), seq.channel());
                    master.play(bus, msg, channel);
                }
            }
        }
    }

    // --- Transport ---

    pub fn start_playing(&self) {
        let mut st = self.shared.state.lock().unwrap();
        Self::start_inner(&self.shared, &mut st, &self.master);
    }

    fn start_inner(shared: &Shared, st: &mut PerfState, master: &MasterBus<B>) {
        if shared.running() {
            return;
        }
        if !st.paused {
            let tick = match st.mode {
                PlaybackMode::Song => st.starting_tick,
                PlaybackMode::Live => 0,
            };
            st.tick = tick;
            for seq in st.seqs.iter_mut().flatten() {
                seq.set_orig_tick(tick);
            }
        }
        st.paused = false;
        shared.running.store(true, Ordering::Release);
        shared.cond.notify_all();
        shared.link.lock().unwrap().on_start();
        st.control_out.send_ui_event(master, UiAction::Play);
    }

    /// Stop and rewind to the starting tick.
    pub fn stop_playing(&self) {
        let mut st = self.shared.state.lock().unwrap();
        Self::stop_inner(&self.shared, &mut st, &self.master);
    }

    fn stop_inner(shared: &Shared, st: &mut PerfState, master: &MasterBus<B>) {
        shared.running.store(false, Ordering::Release);
        shared.cond.notify_all();
        master.stop();
        if !st.resume_note_ons {
            for seq in st.seqs.iter_mut().flatten() {
                seq.flush_notes(master);
            }
        }
        st.paused = false;
        st.tick = st.starting_tick;
        for seq in st.seqs.iter_mut().flatten() {
            seq.set_orig_tick(st.tick);
        }
        shared.link.lock().unwrap().on_stop();
        st.control_out.send_ui_event(master, UiAction::Stop);
    }

    /// Stop without repositioning; the next start resumes here.
    pub fn pause_playing(&self) {
        let mut st = self.shared.state.lock().unwrap();
        Self::pause_inner(&self.shared, &mut st, &self.master);
    }

    fn pause_inner(shared: &Shared, st: &mut PerfState, master: &MasterBus<B>) {
        shared.running.store(false, Ordering::Release);
        shared.cond.notify_all();
        master.stop();
        st.paused = true;
        shared.link.lock().unwrap().on_stop();
        st.control_out.send_ui_event(master, UiAction::Pause);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().unwrap().paused
    }

    pub fn playback_mode(&self) -> PlaybackMode {
        self.shared.state.lock().unwrap().mode
    }

    pub fn set_playback_mode(&self, mode: PlaybackMode) {
        self.shared.state.lock().unwrap().mode = mode;
    }

    pub fn set_song_recording(&self, on: bool) {
        self.shared.state.lock().unwrap().song_recording = on;
    }

    pub fn song_recording(&self) -> bool {
        self.shared.state.lock().unwrap().song_recording
    }

    /// Current tick without taking the state lock.
    pub fn tick_hint(&self) -> u64 {
        self.shared.tick_hint.load(Ordering::Acquire)
    }

    pub fn tick(&self) -> u64 {
        self.shared.state.lock().unwrap().tick
    }

    pub fn bpm(&self) -> f64 {
        self.shared.state.lock().unwrap().bpm
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.shared.state.lock().unwrap().bpm = bpm.clamp(BPM_MIN, BPM_MAX);
    }

    pub fn ppqn(&self) -> u32 {
        self.shared.state.lock().unwrap().ppqn
    }

    // --- Loop markers and repositioning ---

    pub fn set_left_tick(&self, tick: u64) {
        let mut st = self.shared.state.lock().unwrap();
        st.left_tick = tick;
        st.starting_tick = tick;
        if st.right_tick <= st.left_tick {
            st.right_tick = st.left_tick + st.ppqn as u64 * 4;
        }
    }

    pub fn left_tick(&self) -> u64 {
        self.shared.state.lock().unwrap().left_tick
    }

    pub fn set_right_tick(&self, tick: u64) {
        let mut st = self.shared.state.lock().unwrap();
        st.right_tick = tick;
        if st.right_tick <= st.left_tick {
            let span = st.ppqn as u64 * 4;
            st.left_tick = st.right_tick.saturating_sub(span);
            st.starting_tick = st.left_tick;
        }
    }

    pub fn right_tick(&self) -> u64 {
        self.shared.state.lock().unwrap().right_tick
    }

    pub fn left_right_size(&self) -> u64 {
        self.shared.state.lock().unwrap().left_right_size()
    }

    pub fn set_looping(&self, on: bool) {
        self.shared.state.lock().unwrap().looping = on;
    }

    pub fn reposition(&self, tick: u64) {
        let mut st = self.shared.state.lock().unwrap();
        Self::reposition_inner(&self.shared, &mut st, tick);
    }

    fn reposition_inner(shared: &Shared, st: &mut PerfState, tick: u64) {
        st.tick = tick;
        st.starting_tick = tick;
        for seq in st.seqs.iter_mut().flatten() {
            seq.set_orig_tick(tick);
        }
        shared.tick_hint.store(tick, Ordering::Release);
        shared.link.lock().unwrap().reposition(tick);
    }

    // --- FF / rewind ---

    /// Hold or release the fast-forward button.
    pub fn set_fast_forward(&self, held: bool) {
        let mut st = self.shared.state.lock().unwrap();
        st.ff_rw_dir = if held { 1 } else { 0 };
        st.ff_rw_rate = 1.0;
    }

    /// Hold or release the rewind button.
    pub fn set_rewind(&self, held: bool) {
        let mut st = self.shared.state.lock().unwrap();
        st.ff_rw_dir = if held { -1 } else { 0 };
        st.ff_rw_rate = 1.0;
    }

    /// One step of the recurring FF/RW timeout. Returns false when the
    /// button is no longer held so the caller can cancel its timer.
    pub fn ff_rw_timeout(&self) -> bool {
        let mut st = self.shared.state.lock().unwrap();
        if st.ff_rw_dir == 0 {
            return false;
        }
        let step = (st.ppqn as f64 * st.ff_rw_rate) as u64;
        let tick = if st.ff_rw_dir > 0 {
            st.tick.saturating_add(step)
        } else {
            st.tick.saturating_sub(step)
        };
        st.ff_rw_rate = (st.ff_rw_rate * FF_RW_GROWTH).min(FF_RW_MAX);
        Self::reposition_inner(&self.shared, &mut st, tick);
        true
    }

    // --- Sequence slots ---

    /// Put a sequence into a slot. The slot array and active flags change
    /// together, under the lock, so the output thread never sees a half
    /// installed pattern.
    pub fn install_sequence(&self, slot: usize, mut seq: Sequence) -> bool {
        let mut st = self.shared.state.lock().unwrap();
        if !st.is_seq_valid(slot) {
            debug!("install_sequence: slot {} out of range", slot);
            return false;
        }
        seq.set_orig_tick(st.tick);
        st.seqs[slot] = Some(seq);
        true
    }

    pub fn remove_sequence(&self, slot: usize) -> bool {
        let mut st = self.shared.state.lock().unwrap();
        if !st.is_seq_valid(slot) || st.seqs[slot].is_none() {
            return false;
        }
        if let Some(seq) = st.seqs[slot].as_mut() {
            seq.flush_notes(&self.master);
        }
        st.seqs[slot] = None;
        st.control_out
            .send_seq_event(&self.master, slot, SeqAction::Delete, true);
        true
    }

    pub fn is_seq_active(&self, slot: usize) -> bool {
        let st = self.shared.state.lock().unwrap();
        st.is_seq_valid(slot) && st.seqs[slot].is_some()
    }

    pub fn sequence_count(&self) -> usize {
        self.shared.state.lock().unwrap().seqs.len()
    }

    /// Read access to a slot's sequence.
    pub fn with_sequence<R>(&self, slot: usize, f: impl FnOnce(&Sequence) -> R) -> Option<R> {
        let st = self.shared.state.lock().unwrap();
        st.seqs.get(slot)?.as_ref().map(f)
    }

    /// Mutating access to a slot's sequence.
    pub fn with_sequence_mut<R>(
        &self,
        slot: usize,
        f: impl FnOnce(&mut Sequence) -> R,
    ) -> Option<R> {
        let mut st = self.shared.state.lock().unwrap();
        st.seqs.get_mut(slot)?.as_mut().map(f)
    }

    pub fn is_sequence_playing(&self, slot: usize) -> bool {
        self.with_sequence(slot, |s| s.playing()).unwrap_or(false)
    }

    // --- Arm / disarm ---

    /// The single entry point for changing a pattern's armed state,
    /// shared by mouse, keystroke, and MIDI control.
    pub fn sequence_playing_toggle(&self, slot: usize) {
        let mut st = self.shared.state.lock().unwrap();
        Self::seq_toggle_inner(&mut st, &self.master, slot);
    }

    pub fn sequence_playing_on(&self, slot: usize) {
        let mut st = self.shared.state.lock().unwrap();
        Self::seq_change_inner(&mut st, &self.master, slot, true);
    }

    pub fn sequence_playing_off(&self, slot: usize) {
        let mut st = self.shared.state.lock().unwrap();
        Self::seq_change_inner(&mut st, &self.master, slot, false);
    }

    fn seq_toggle_inner(st: &mut PerfState, master: &MasterBus<B>, slot: usize) {
        if !st.is_seq_valid(slot) || st.seqs[slot].is_none() {
            debug!("sequence_playing_toggle: invalid slot {}", slot);
            return;
        }
        let tick = st.tick;
        if st.control_status.contains(ControlFlags::QUEUE) {
            let seq = st.seqs[slot].as_mut().unwrap();
            seq.toggle_queued(tick);
            st.control_out
                .send_seq_event(master, slot, SeqAction::Queue, true);
            return;
        }
        if st.control_status.contains(ControlFlags::ONESHOT) {
            let seq = st.seqs[slot].as_mut().unwrap();
            seq.arm_one_shot(tick);
            st.control_out
                .send_seq_event(master, slot, SeqAction::Arm, true);
            return;
        }
        // Replace is consumed by its first use: solo the toggled pattern
        if st.control_status.contains(ControlFlags::REPLACE) {
            st.control_status.remove(ControlFlags::REPLACE);
            Self::off_sequences_inner(st, master);
        }
        let seq = st.seqs[slot].as_mut().unwrap();
        seq.toggle_playing();
        let playing = seq.playing();
        if !playing {
            seq.flush_notes(master);
        }
        let action = if playing { SeqAction::Arm } else { SeqAction::Mute };
        st.control_out.send_seq_event(master, slot, action, true);
    }

    fn seq_change_inner(st: &mut PerfState, master: &MasterBus<B>, slot: usize, on: bool) {
        if !st.is_seq_valid(slot) || st.seqs[slot].is_none() {
            debug!("sequence_playing_change: invalid slot {}", slot);
            return;
        }
        let tick = st.tick;
        let queued = st.control_status.contains(ControlFlags::QUEUE);
        let seq = st.seqs[slot].as_mut().unwrap();
        if queued && seq.playing() != on {
            seq.toggle_queued(tick);
            st.control_out
                .send_seq_event(master, slot, SeqAction::Queue, true);
            return;
        }
        seq.set_playing(on);
        if !on {
            seq.flush_notes(master);
        }
        let action = if on { SeqAction::Arm } else { SeqAction::Mute };
        st.control_out.send_seq_event(master, slot, action, true);
    }

    /// Disarm every active pattern.
    pub fn off_sequences(&self) {
        let mut st = self.shared.state.lock().unwrap();
        Self::off_sequences_inner(&mut st, &self.master);
    }

    fn off_sequences_inner(st: &mut PerfState, master: &MasterBus<B>) {
        for slot in 0..st.seqs.len() {
            if let Some(seq) = st.seqs[slot].as_mut() {
                if seq.playing() {
                    seq.set_playing(false);
                    seq.flush_notes(master);
                    st.control_out
                        .send_seq_event(master, slot, SeqAction::Mute, false);
                }
            }
        }
        master.flush();
    }

    // --- Control-status modifiers (last-modifier-wins) ---

    /// Engage a held modifier. Setting a modifier replaces whatever was
    /// held before; simultaneous combinations resolve to the most recent.
    pub fn set_sequence_control_status(&self, status: ControlFlags) {
        let mut st = self.shared.state.lock().unwrap();
        Self::set_status_inner(&mut st, &self.master, status);
    }

    fn set_status_inner(st: &mut PerfState, master: &MasterBus<B>, status: ControlFlags) {
        if status.contains(ControlFlags::SNAPSHOT) {
            for seq in st.seqs.iter_mut().flatten() {
                seq.save_playing_state();
            }
            st.control_out.send_ui_event(master, UiAction::SnapStore);
        }
        if status.contains(ControlFlags::QUEUE) {
            st.control_out.send_ui_event(master, UiAction::QueueOn);
        }
        if status.contains(ControlFlags::REPLACE) {
            st.control_out.send_ui_event(master, UiAction::ReplaceOn);
        }
        if status.contains(ControlFlags::ONESHOT) {
            st.control_out.send_ui_event(master, UiAction::OneshotOn);
        }
        st.control_status = status;
    }

    /// Release a held modifier.
    pub fn unset_sequence_control_status(&self, status: ControlFlags) {
        let mut st = self.shared.state.lock().unwrap();
        Self::unset_status_inner(&mut st, &self.master, status);
    }

    fn unset_status_inner(st: &mut PerfState, master: &MasterBus<B>, status: ControlFlags) {
        if status.contains(ControlFlags::SNAPSHOT) && st.control_status.contains(ControlFlags::SNAPSHOT)
        {
            for seq in st.seqs.iter_mut().flatten() {
                seq.restore_playing_state();
            }
            st.control_out.send_ui_event(master, UiAction::SnapRestore);
        }
        if status.contains(ControlFlags::QUEUE) {
            st.control_out.send_ui_event(master, UiAction::QueueOff);
        }
        if status.contains(ControlFlags::REPLACE) {
            st.control_out.send_ui_event(master, UiAction::ReplaceOff);
        }
        if status.contains(ControlFlags::ONESHOT) {
            st.control_out.send_ui_event(master, UiAction::OneshotOff);
        }
        st.control_status.remove(status);
    }

    pub fn control_status(&self) -> ControlFlags {
        self.shared.state.lock().unwrap().control_status
    }

    /// Snapshot the armed set (also done when the Snapshot modifier is
    /// pressed).
    pub fn save_playing_state(&self) {
        let mut st = self.shared.state.lock().unwrap();
        for seq in st.seqs.iter_mut().flatten() {
            seq.save_playing_state();
        }
    }

    pub fn restore_playing_state(&self) {
        let mut st = self.shared.state.lock().unwrap();
        for seq in st.seqs.iter_mut().flatten() {
            seq.restore_playing_state();
        }
    }

    // --- Mute groups ---

    pub fn set_mode_group_mute(&self, on: bool) {
        self.shared.state.lock().unwrap().mode_group = on;
    }

    pub fn mode_group(&self) -> bool {
        self.shared.state.lock().unwrap().mode_group
    }

    /// Turn group-learn on or off, notifying observers.
    pub fn set_mode_group_learn(&self, on: bool) {
        let mut st = self.shared.state.lock().unwrap();
        Self::set_learn_inner(&mut st, &self.master, on);
    }

    fn set_learn_inner(st: &mut PerfState, master: &MasterBus<B>, on: bool) {
        if st.group_learn == on {
            return;
        }
        st.group_learn = on;
        if on {
            st.mode_group = true;
        }
        let action = if on { UiAction::LearnOn } else { UiAction::LearnOff };
        st.control_out.send_ui_event(master, action);
        let mut observers = std::mem::take(&mut st.learn_observers);
        for obs in observers.iter_mut() {
            obs(on);
        }
        st.learn_observers = observers;
    }

    pub fn mode_group_learn(&self) -> bool {
        self.shared.state.lock().unwrap().group_learn
    }

    /// Register for group-learn transitions.
    pub fn on_group_learn_change(&self, observer: GroupLearnObserver) {
        self.shared
            .state
            .lock()
            .unwrap()
            .learn_observers
            .push(observer);
    }

    /// Learn-or-apply: while learning, capture the playing screen-set's
    /// armed states into the group (and leave learn mode); otherwise
    /// apply the saved group onto the playing screen-set.
    pub fn select_group_mute(&self, group: usize) {
        let mut st = self.shared.state.lock().unwrap();
        Self::select_group_inner(&mut st, &self.master, group);
    }

    fn select_group_inner(st: &mut PerfState, master: &MasterBus<B>, group: usize) {
        if group >= st.keys.group_max() || group >= st.mutes.group_count() {
            debug!("select_group_mute: group {} out of range", group);
            return;
        }
        if st.group_learn {
            let base = st.playing_base();
            let states: Vec<bool> = (0..st.seqs_in_set)
                .map(|i| {
                    st.seqs
                        .get(base + i)
                        .and_then(|s| s.as_ref())
                        .map(|s| s.playing())
                        .unwrap_or(false)
                })
                .collect();
            st.mutes.learn(group, &states);
            st.selected_group = Some(group);
            Self::set_learn_inner(st, master, false);
        } else {
            st.selected_group = Some(group);
            Self::mute_group_tracks_inner(st, master);
        }
    }

    /// Apply the selected group's saved pattern onto the playing
    /// screen-set, gated by group mode.
    pub fn mute_group_tracks(&self) {
        let mut st = self.shared.state.lock().unwrap();
        Self::mute_group_tracks_inner(&mut st, &self.master);
    }

    fn mute_group_tracks_inner(st: &mut PerfState, master: &MasterBus<B>) {
        if !st.mode_group {
            return;
        }
        let Some(group) = st.selected_group else {
            return;
        };
        let base = st.playing_base();
        for i in 0..st.seqs_in_set {
            let on = st.mutes.get(group, i);
            let slot = base + i;
            if let Some(seq) = st.seqs.get_mut(slot).and_then(|s| s.as_mut()) {
                seq.set_playing(on);
                if !on {
                    seq.flush_notes(master);
                }
            }
        }
    }

    /// Select and immediately apply (or, in learn mode, capture) a group.
    pub fn select_and_mute_group(&self, group: usize) {
        let mut st = self.shared.state.lock().unwrap();
        Self::select_group_inner(&mut st, &self.master, group);
        Self::mute_group_tracks_inner(&mut st, &self.master);
    }

    /// Direct group row write, for the rc reader.
    pub fn save_mute_group(&self, group: usize, states: &[bool]) {
        self.shared.state.lock().unwrap().mutes.learn(group, states);
    }

    /// Direct group row read, for the rc writer.
    pub fn load_mute_group(&self, group: usize) -> Vec<bool> {
        self.shared.state.lock().unwrap().mutes.row(group).to_vec()
    }

    // --- Screen-sets ---

    pub fn screenset(&self) -> usize {
        self.shared.state.lock().unwrap().screenset
    }

    pub fn playing_screenset(&self) -> usize {
        self.shared.state.lock().unwrap().playing_screenset
    }

    pub fn set_screenset(&self, set: usize) {
        let mut st = self.shared.state.lock().unwrap();
        Self::set_screenset_inner(&mut st, &self.master, set);
    }

    fn set_screenset_inner(st: &mut PerfState, master: &MasterBus<B>, set: usize) {
        if !st.is_screenset_valid(set) {
            debug!("set_screenset: {} out of range", set);
            return;
        }
        if set == st.screenset {
            return;
        }
        st.screenset = set;
        st.control_out.clear_sequences(master);
        let offset = set * st.seqs_in_set;
        st.control_out.set_screenset_offset(offset);
    }

    pub fn increment_screenset(&self) {
        let mut st = self.shared.state.lock().unwrap();
        let next = (st.screenset + 1) % st.max_sets;
        Self::set_screenset_inner(&mut st, &self.master, next);
    }

    pub fn decrement_screenset(&self) {
        let mut st = self.shared.state.lock().unwrap();
        let next = (st.screenset + st.max_sets - 1) % st.max_sets;
        Self::set_screenset_inner(&mut st, &self.master, next);
    }

    /// Make the viewed screen-set the one transport and mute actions
    /// target.
    pub fn set_playing_screenset(&self) {
        let mut st = self.shared.state.lock().unwrap();
        st.playing_screenset = st.screenset;
    }

    /// Snapshot the viewed screen-set's armed states.
    pub fn save_current_screenset(&self) {
        let mut st = self.shared.state.lock().unwrap();
        let base = st.screenset * st.seqs_in_set;
        for i in 0..st.seqs_in_set {
            if let Some(seq) = st.seqs.get_mut(base + i).and_then(|s| s.as_mut()) {
                seq.save_playing_state();
            }
        }
    }

    /// Disarm and clear every slot in the viewed screen-set.
    pub fn clear_current_screenset(&self) {
        let mut st = self.shared.state.lock().unwrap();
        let base = st.screenset * st.seqs_in_set;
        for i in 0..st.seqs_in_set {
            if let Some(seq) = st.seqs.get_mut(base + i).and_then(|s| s.as_mut()) {
                seq.set_playing(false);
                seq.flush_notes(&self.master);
            }
            if let Some(slot) = st.seqs.get_mut(base + i) {
                *slot = None;
            }
        }
        st.control_out.clear_sequences(&self.master);
    }

    pub fn screenset_notepad(&self, set: usize) -> Option<String> {
        self.shared.state.lock().unwrap().notepads.get(set).cloned()
    }

    pub fn set_screenset_notepad(&self, set: usize, text: impl Into<String>) -> bool {
        let mut st = self.shared.state.lock().unwrap();
        match st.notepads.get_mut(set) {
            Some(pad) => {
                *pad = text.into();
                true
            }
            None => false,
        }
    }

    // --- Trigger undo/redo ---

    /// Snapshot trigger lists before a song edit. `None` snapshots every
    /// active track.
    pub fn push_trigger_undo(&self, track: Option<usize>) {
        let mut st = self.shared.state.lock().unwrap();
        let snapshot = Self::trigger_snapshot(&st, track);
        st.undo.push(snapshot);
        st.redo.clear();
    }

    fn trigger_snapshot(st: &PerfState, track: Option<usize>) -> Vec<(usize, TriggerList)> {
        match track {
            Some(slot) => st
                .seqs
                .get(slot)
                .and_then(|s| s.as_ref())
                .map(|seq| vec![(slot, seq.triggers().clone())])
                .unwrap_or_default(),
            None => st
                .seqs
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.as_ref().map(|seq| (i, seq.triggers().clone())))
                .collect(),
        }
    }

    fn apply_trigger_snapshot(st: &mut PerfState, snapshot: &[(usize, TriggerList)]) {
        for (slot, triggers) in snapshot {
            if let Some(seq) = st.seqs.get_mut(*slot).and_then(|s| s.as_mut()) {
                *seq.triggers_mut() = triggers.clone();
            }
        }
    }

    pub fn pop_trigger_undo(&self) {
        let mut st = self.shared.state.lock().unwrap();
        let Some(snapshot) = st.undo.pop() else {
            return;
        };
        let tracks: Vec<usize> = snapshot.iter().map(|(slot, _)| *slot).collect();
        let current: Vec<(usize, TriggerList)> = tracks
            .iter()
            .filter_map(|&slot| {
                st.seqs
                    .get(slot)
                    .and_then(|s| s.as_ref())
                    .map(|seq| (slot, seq.triggers().clone()))
            })
            .collect();
        st.redo.push(current);
        Self::apply_trigger_snapshot(&mut st, &snapshot);
    }

    pub fn pop_trigger_redo(&self) {
        let mut st = self.shared.state.lock().unwrap();
        let Some(snapshot) = st.redo.pop() else {
            return;
        };
        let current: Vec<(usize, TriggerList)> = snapshot
            .iter()
            .filter_map(|(slot, _)| {
                st.seqs
                    .get(*slot)
                    .and_then(|s| s.as_ref())
                    .map(|seq| (*slot, seq.triggers().clone()))
            })
            .collect();
        st.undo.push(current);
        Self::apply_trigger_snapshot(&mut st, &snapshot);
    }

    // --- MIDI control dispatch ---

    /// Feed one incoming message through the control table. Returns true
    /// if any control fired. The input thread calls this for every event;
    /// it is also the public hook for tests and for hosts without the
    /// input thread.
    pub fn midi_control_event(&self, msg: &MidiMsg) -> bool {
        let mut st = self.shared.state.lock().unwrap();
        Self::dispatch_control(&self.shared, &mut st, &self.master, msg)
    }

    fn dispatch_control(
        shared: &Shared,
        st: &mut PerfState,
        master: &MasterBus<B>,
        msg: &MidiMsg,
    ) -> bool {
        if !msg.is_channel_voice() {
            return false;
        }
        let status = msg.status_byte();
        let (data, value) = msg.data();
        let mut handled = false;

        for slot in 0..st.controls.slot_count() {
            let Some(row) = st.controls.row(slot) else {
                break;
            };
            let row = *row;

            if row.toggle.matches(status, data) && row.toggle.in_range(value) {
                Self::fire_control(shared, st, master, slot, ControlAction::Toggle, value);
                handled = true;
            }
            if row.on.matches(status, data) {
                if row.on.in_range(value) {
                    Self::fire_control(shared, st, master, slot, ControlAction::On, value);
                    handled = true;
                } else if row.on.inverse_active {
                    Self::fire_control(shared, st, master, slot, ControlAction::Off, value);
                    handled = true;
                }
            }
            if row.off.matches(status, data) {
                if row.off.in_range(value) {
                    Self::fire_control(shared, st, master, slot, ControlAction::Off, value);
                    handled = true;
                } else if row.off.inverse_active {
                    Self::fire_control(shared, st, master, slot, ControlAction::On, value);
                    handled = true;
                }
            }
        }
        handled
    }

    fn fire_control(
        shared: &Shared,
        st: &mut PerfState,
        master: &MasterBus<B>,
        slot: usize,
        action: ControlAction,
        value: u8,
    ) {
        let Some(target) = st.controls.classify(slot) else {
            return;
        };
        match target {
            ControlSlot::Pattern(i) => {
                let seq = st.playing_base() + i;
                match action {
                    ControlAction::Toggle => Self::seq_toggle_inner(st, master, seq),
                    ControlAction::On => Self::seq_change_inner(st, master, seq, true),
                    ControlAction::Off => Self::seq_change_inner(st, master, seq, false),
                }
            }
            ControlSlot::Group(g) => {
                Self::select_group_inner(st, master, g);
                Self::mute_group_tracks_inner(st, master);
            }
            ControlSlot::Meta(meta) => {
                Self::fire_meta(shared, st, master, meta, action, value);
            }
        }
    }

    fn fire_meta(
        shared: &Shared,
        st: &mut PerfState,
        master: &MasterBus<B>,
        meta: MetaAction,
        action: ControlAction,
        value: u8,
    ) {
        use ControlAction::{Off, On, Toggle};
        match meta {
            MetaAction::BpmUp => st.bpm = (st.bpm + 1.0).clamp(BPM_MIN, BPM_MAX),
            MetaAction::BpmDown => st.bpm = (st.bpm - 1.0).clamp(BPM_MIN, BPM_MAX),
            MetaAction::BpmPageUp => st.bpm = (st.bpm + BPM_PAGE_STEP).clamp(BPM_MIN, BPM_MAX),
            MetaAction::BpmPageDown => st.bpm = (st.bpm - BPM_PAGE_STEP).clamp(BPM_MIN, BPM_MAX),
            MetaAction::ScreensetUp => {
                let next = (st.screenset + 1) % st.max_sets;
                Self::set_screenset_inner(st, master, next);
            }
            MetaAction::ScreensetDown => {
                let next = (st.screenset + st.max_sets - 1) % st.max_sets;
                Self::set_screenset_inner(st, master, next);
            }
            MetaAction::ScreensetByValue => {
                Self::set_screenset_inner(st, master, value as usize);
            }
            MetaAction::SetReplace => match action {
                On | Toggle => Self::set_status_inner(st, master, ControlFlags::REPLACE),
                Off => Self::unset_status_inner(st, master, ControlFlags::REPLACE),
            },
            MetaAction::SetSnapshot | MetaAction::SnapshotTwo => match action {
                On | Toggle => Self::set_status_inner(st, master, ControlFlags::SNAPSHOT),
                Off => Self::unset_status_inner(st, master, ControlFlags::SNAPSHOT),
            },
            MetaAction::SetQueue => match action {
                On | Toggle => Self::set_status_inner(st, master, ControlFlags::QUEUE),
                Off => Self::unset_status_inner(st, master, ControlFlags::QUEUE),
            },
            MetaAction::OneShot => match action {
                On | Toggle => Self::set_status_inner(st, master, ControlFlags::ONESHOT),
                Off => Self::unset_status_inner(st, master, ControlFlags::ONESHOT),
            },
            MetaAction::Solo => match action {
                // A latched Replace: solo the next pattern touched
                On | Toggle => Self::set_status_inner(st, master, ControlFlags::REPLACE),
                Off => Self::unset_status_inner(st, master, ControlFlags::REPLACE),
            },
            MetaAction::GroupMute => match action {
                On => st.mode_group = true,
                Off => st.mode_group = false,
                Toggle => st.mode_group = !st.mode_group,
            },
            MetaAction::GroupLearn => match action {
                On | Toggle => Self::set_learn_inner(st, master, true),
                Off => Self::set_learn_inner(st, master, false),
            },
            MetaAction::PlayScreenset => st.playing_screenset = st.screenset,
            MetaAction::Playback => match action {
                On => Self::start_inner(shared, st, master),
                Off => Self::stop_inner(shared, st, master),
                Toggle => {
                    if shared.running() {
                        Self::pause_inner(shared, st, master);
                    } else {
                        Self::start_inner(shared, st, master);
                    }
                }
            },
            MetaAction::Start => Self::start_inner(shared, st, master),
            MetaAction::Stop => Self::stop_inner(shared, st, master),
            MetaAction::SongRecord => match action {
                On => st.song_recording = true,
                Off => st.song_recording = false,
                Toggle => st.song_recording = !st.song_recording,
            },
            MetaAction::Thru => {
                let idx = st.playing_base() + value as usize;
                if let Some(seq) = st.seqs.get_mut(idx).and_then(|s| s.as_mut()) {
                    let thru = seq.thru();
                    seq.set_thru(!thru);
                }
            }
            MetaAction::Record => {
                let idx = st.playing_base() + value as usize;
                if let Some(seq) = st.seqs.get_mut(idx).and_then(|s| s.as_mut()) {
                    let rec = seq.recording();
                    seq.set_recording(!rec);
                }
            }
            MetaAction::QuantizedRecord => {
                let snap = st.ppqn as u64 / 4;
                let idx = st.playing_base() + value as usize;
                if let Some(seq) = st.seqs.get_mut(idx).and_then(|s| s.as_mut()) {
                    let rec = seq.recording();
                    seq.set_recording(!rec);
                    seq.set_quantized_record(!rec, snap);
                }
            }
            MetaAction::ResetSequence => {
                let tick = st.tick;
                let idx = st.playing_base() + value as usize;
                if let Some(seq) = st.seqs.get_mut(idx).and_then(|s| s.as_mut()) {
                    seq.set_orig_tick(tick);
                }
            }
            MetaAction::FastForward => {
                st.ff_rw_dir = if action == Off { 0 } else { 1 };
                st.ff_rw_rate = 1.0;
            }
            MetaAction::Rewind => {
                st.ff_rw_dir = if action == Off { 0 } else { -1 };
                st.ff_rw_rate = 1.0;
            }
            MetaAction::Top => Self::reposition_inner(shared, st, 0),
            MetaAction::SongPointer => {
                let tick = value as u64 * (st.ppqn as u64 / 4);
                Self::reposition_inner(shared, st, tick);
            }
            MetaAction::ToggleMutes => {
                for seq in st.seqs.iter_mut().flatten() {
                    seq.toggle_playing();
                    if !seq.playing() {
                        seq.flush_notes(master);
                    }
                }
            }
            MetaAction::Playlist | MetaAction::PlaylistSong | MetaAction::SlotShift => {
                // Playlist navigation belongs to the playlist collaborator
                debug!("unrouted meta action {:?}", meta);
            }
        }
    }

    // --- Keyboard dispatch ---

    /// Handle a key press through the same action vocabulary as MIDI
    /// control. Returns true when the key was bound.
    pub fn key_press(&self, key: Keycode) -> bool {
        let mut st = self.shared.state.lock().unwrap();
        let keys = st.keys.transport.clone();

        if key == keys.start {
            Self::start_inner(&self.shared, &mut st, &self.master);
        } else if key == keys.stop {
            Self::stop_inner(&self.shared, &mut st, &self.master);
        } else if key == keys.pause {
            if self.shared.running() {
                Self::pause_inner(&self.shared, &mut st, &self.master);
            } else {
                Self::start_inner(&self.shared, &mut st, &self.master);
            }
        } else if key == keys.replace {
            Self::set_status_inner(&mut st, &self.master, ControlFlags::REPLACE);
        } else if key == keys.queue || key == keys.keep_queue {
            Self::set_status_inner(&mut st, &self.master, ControlFlags::QUEUE);
        } else if key == keys.snapshot_1 || key == keys.snapshot_2 {
            Self::set_status_inner(&mut st, &self.master, ControlFlags::SNAPSHOT);
        } else if key == keys.screenset_up {
            let next = (st.screenset + 1) % st.max_sets;
            Self::set_screenset_inner(&mut st, &self.master, next);
        } else if key == keys.screenset_down {
            let next = (st.screenset + st.max_sets - 1) % st.max_sets;
            Self::set_screenset_inner(&mut st, &self.master, next);
        } else if key == keys.set_playing_screenset {
            st.playing_screenset = st.screenset;
        } else if key == keys.group_on {
            st.mode_group = true;
        } else if key == keys.group_off {
            st.mode_group = false;
        } else if key == keys.group_learn {
            Self::set_learn_inner(&mut st, &self.master, true);
        } else if key == keys.bpm_up {
            st.bpm = (st.bpm + 1.0).clamp(BPM_MIN, BPM_MAX);
        } else if key == keys.bpm_down {
            st.bpm = (st.bpm - 1.0).clamp(BPM_MIN, BPM_MAX);
        } else if key == keys.fast_forward {
            st.ff_rw_dir = 1;
            st.ff_rw_rate = 1.0;
        } else if key == keys.rewind {
            st.ff_rw_dir = -1;
            st.ff_rw_rate = 1.0;
        } else if let Some(slot) = st.keys.lookup_slot(key) {
            let seq = st.playing_base() + slot;
            Self::seq_toggle_inner(&mut st, &self.master, seq);
        } else if let Some(group) = st.keys.lookup_group(key) {
            Self::select_group_inner(&mut st, &self.master, group);
            Self::mute_group_tracks_inner(&mut st, &self.master);
        } else {
            return false;
        }
        true
    }

    /// Handle a key release (modifier keys are held-state).
    pub fn key_release(&self, key: Keycode) -> bool {
        let mut st = self.shared.state.lock().unwrap();
        let keys = st.keys.transport.clone();

        if key == keys.replace {
            Self::unset_status_inner(&mut st, &self.master, ControlFlags::REPLACE);
        } else if key == keys.queue {
            Self::unset_status_inner(&mut st, &self.master, ControlFlags::QUEUE);
        } else if key == keys.snapshot_1 || key == keys.snapshot_2 {
            Self::unset_status_inner(&mut st, &self.master, ControlFlags::SNAPSHOT);
        } else if key == keys.fast_forward || key == keys.rewind {
            st.ff_rw_dir = 0;
            st.ff_rw_rate = 1.0;
        } else {
            return false;
        }
        true
    }

    // --- Recording routing ---

    /// Point incoming MIDI at a pattern slot's recorder.
    pub fn set_sequence_input(&self, slot: Option<usize>, channel: Option<u8>) {
        self.master.set_sequence_input(slot, channel);
    }
}

impl<B: MidiBackend + 'static> Drop for Performance<B> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segno_core::{ClockPolicy, OutEvent, Trigger};
    use segno_midi::{LoopbackBackend, OutTap};

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.ports.clocks = vec![ClockPolicy::Off; 16];
        config.ports.inputs = vec![true];
        config
    }

    fn engine() -> Performance<LoopbackBackend> {
        Performance::new(LoopbackBackend::new(16, 1), test_config()).unwrap()
    }

    fn pattern(len: u64) -> Sequence {
        Sequence::new("p", len, 0, 0)
    }

    #[test]
    fn toggle_is_an_involution_without_modifiers() {
        let perf = engine();
        perf.install_sequence(0, pattern(192));
        assert!(!perf.is_sequence_playing(0));
        perf.sequence_playing_toggle(0);
        assert!(perf.is_sequence_playing(0));
        perf.sequence_playing_toggle(0);
        assert!(!perf.is_sequence_playing(0));
    }

    #[test]
    fn invalid_and_empty_slots_are_noops() {
        let perf = engine();
        perf.sequence_playing_toggle(999_999);
        perf.sequence_playing_toggle(5); // empty slot
        assert!(!perf.is_sequence_playing(5));
        assert!(!perf.install_sequence(999_999, pattern(192)));
        assert!(!perf.remove_sequence(5));
    }

    #[test]
    fn replace_solos_the_toggled_pattern() {
        let perf = engine();
        for slot in [2, 7] {
            perf.install_sequence(slot, pattern(192));
            perf.sequence_playing_toggle(slot);
        }
        perf.set_sequence_control_status(ControlFlags::REPLACE);
        perf.sequence_playing_toggle(7);

        assert!(!perf.is_sequence_playing(2));
        assert!(perf.is_sequence_playing(7));
        // Replace is consumed by its first use
        assert!(!perf.control_status().contains(ControlFlags::REPLACE));
    }

    #[test]
    fn queue_defers_toggle_to_loop_boundary() {
        let perf = engine();
        perf.install_sequence(0, pattern(100));
        perf.set_sequence_control_status(ControlFlags::QUEUE);
        perf.sequence_playing_toggle(0);

        assert!(!perf.is_sequence_playing(0));
        assert!(perf.with_sequence(0, |s| s.queued()).unwrap());

        perf.advance_to(50);
        assert!(!perf.is_sequence_playing(0));
        perf.advance_to(120);
        assert!(perf.is_sequence_playing(0));
        assert!(!perf.with_sequence(0, |s| s.queued()).unwrap());
    }

    #[test]
    fn snapshot_restores_on_release() {
        let perf = engine();
        perf.install_sequence(0, pattern(192));
        perf.install_sequence(1, pattern(192));
        perf.sequence_playing_toggle(0);

        perf.set_sequence_control_status(ControlFlags::SNAPSHOT);
        perf.sequence_playing_toggle(0);
        perf.sequence_playing_toggle(1);
        assert!(!perf.is_sequence_playing(0));
        assert!(perf.is_sequence_playing(1));

        perf.unset_sequence_control_status(ControlFlags::SNAPSHOT);
        assert!(perf.is_sequence_playing(0));
        assert!(!perf.is_sequence_playing(1));
    }

    #[test]
    fn one_shot_modifier_arms_for_one_pass() {
        let perf = engine();
        perf.install_sequence(0, pattern(100));
        perf.set_sequence_control_status(ControlFlags::ONESHOT);
        perf.sequence_playing_toggle(0);
        assert!(perf.is_sequence_playing(0));

        perf.advance_to(99);
        assert!(perf.is_sequence_playing(0));
        perf.advance_to(101);
        assert!(!perf.is_sequence_playing(0));
    }

    #[test]
    fn last_modifier_wins() {
        let perf = engine();
        perf.set_sequence_control_status(ControlFlags::REPLACE);
        perf.set_sequence_control_status(ControlFlags::QUEUE);
        assert!(perf.control_status().contains(ControlFlags::QUEUE));
        assert!(!perf.control_status().contains(ControlFlags::REPLACE));
    }

    #[test]
    fn group_learn_stores_then_applies_exactly() {
        let perf = engine();
        for slot in 0..8 {
            perf.install_sequence(slot, pattern(192));
        }
        for slot in [0, 2, 5] {
            perf.sequence_playing_toggle(slot);
        }

        perf.set_mode_group_learn(true);
        perf.select_and_mute_group(3);
        // Learn mode captured and turned itself off
        assert!(!perf.mode_group_learn());

        // Scramble the armed set
        perf.sequence_playing_toggle(0);
        perf.sequence_playing_toggle(1);
        perf.sequence_playing_toggle(7);

        perf.select_group_mute(3);
        let armed: Vec<usize> = (0..8).filter(|&s| perf.is_sequence_playing(s)).collect();
        assert_eq!(armed, vec![0, 2, 5]);
    }

    #[test]
    fn group_out_of_range_is_noop() {
        let perf = engine();
        perf.install_sequence(0, pattern(192));
        perf.sequence_playing_toggle(0);
        perf.select_and_mute_group(999);
        assert!(perf.is_sequence_playing(0));
    }

    #[test]
    fn group_learn_observers_fire() {
        let perf = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        perf.on_group_learn_change(Box::new(move |on| sink.lock().unwrap().push(on)));

        perf.set_mode_group_learn(true);
        perf.set_mode_group_learn(true); // no transition, no callback
        perf.set_mode_group_learn(false);
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn viewed_and_playing_screensets_are_distinct() {
        let perf = engine();
        perf.set_screenset(2);
        assert_eq!(perf.screenset(), 2);
        assert_eq!(perf.playing_screenset(), 0);
        perf.set_playing_screenset();
        assert_eq!(perf.playing_screenset(), 2);
    }

    #[test]
    fn screenset_wraps_and_rejects_invalid() {
        let perf = engine();
        perf.decrement_screenset();
        assert_eq!(perf.screenset(), 31);
        perf.increment_screenset();
        assert_eq!(perf.screenset(), 0);
        perf.set_screenset(999);
        assert_eq!(perf.screenset(), 0);
    }

    #[test]
    fn screenset_notepads() {
        let perf = engine();
        assert!(perf.set_screenset_notepad(3, "drums"));
        assert_eq!(perf.screenset_notepad(3).unwrap(), "drums");
        assert!(!perf.set_screenset_notepad(999, "x"));
        assert_eq!(perf.screenset_notepad(999), None);
    }

    #[test]
    fn trigger_undo_redo_round_trip() {
        let perf = engine();
        perf.install_sequence(0, pattern(192));

        perf.push_trigger_undo(Some(0));
        perf.with_sequence_mut(0, |s| s.triggers_mut().add(Trigger::new(0, 767, 0)));
        assert_eq!(perf.with_sequence(0, |s| s.triggers().len()).unwrap(), 1);

        perf.pop_trigger_undo();
        assert_eq!(perf.with_sequence(0, |s| s.triggers().len()).unwrap(), 0);

        perf.pop_trigger_redo();
        assert_eq!(perf.with_sequence(0, |s| s.triggers().len()).unwrap(), 1);
    }

    #[test]
    fn bpm_is_clamped() {
        let perf = engine();
        perf.set_bpm(10_000.0);
        assert_eq!(perf.bpm(), 500.0);
        perf.set_bpm(1.0);
        assert_eq!(perf.bpm(), 20.0);
    }

    #[test]
    fn ff_accelerates_until_released() {
        let perf = engine();
        perf.set_fast_forward(true);
        assert!(perf.ff_rw_timeout());
        let first = perf.tick();
        assert!(perf.ff_rw_timeout());
        let second = perf.tick();
        // Accelerating: the second step is larger
        assert!(second - first > first);

        perf.set_fast_forward(false);
        assert!(!perf.ff_rw_timeout());
    }

    #[test]
    fn rewind_saturates_at_zero() {
        let perf = engine();
        perf.set_rewind(true);
        assert!(perf.ff_rw_timeout());
        assert_eq!(perf.tick(), 0);
    }

    #[test]
    fn start_stop_pause_state_machine() {
        let perf = engine();
        assert!(!perf.is_running());
        perf.start_playing();
        assert!(perf.is_running());
        perf.pause_playing();
        assert!(!perf.is_running());
        assert!(perf.is_paused());
        perf.start_playing();
        assert!(perf.is_running());
        perf.stop_playing();
        assert!(!perf.is_running());
        assert!(!perf.is_paused());
    }

    #[test]
    fn stop_rewinds_pause_does_not() {
        let perf = engine();
        perf.start_playing();
        perf.advance_to(500);
        perf.pause_playing();
        assert_eq!(perf.tick(), 500);
        perf.start_playing();
        assert_eq!(perf.tick(), 500);
        perf.stop_playing();
        assert_eq!(perf.tick(), 0);
    }

    #[test]
    fn song_mode_loops_between_markers() {
        let perf = engine();
        perf.set_playback_mode(PlaybackMode::Song);
        perf.set_left_tick(100);
        perf.set_right_tick(200);
        perf.set_looping(true);

        perf.advance_to(230);
        // Wrapped: 100 + (230 - 200) % 100
        assert_eq!(perf.tick(), 130);
    }

    #[test]
    fn keyboard_shares_the_action_vocabulary() {
        let perf = engine();
        perf.install_sequence(0, pattern(192));

        // '1' is slot 0 in the standard layout
        assert!(perf.key_press(b'1' as Keycode));
        assert!(perf.is_sequence_playing(0));

        // Space starts the transport
        assert!(perf.key_press(b' ' as Keycode));
        assert!(perf.is_running());

        // Unbound key reports false
        assert!(!perf.key_press(0xFFFF));
    }

    #[test]
    fn modifier_keys_are_held_state() {
        let perf = engine();
        let replace_key = 0xFFE3; // default replace binding (Control_L)
        perf.key_press(replace_key);
        assert!(perf.control_status().contains(ControlFlags::REPLACE));
        perf.key_release(replace_key);
        assert!(perf.control_status().is_empty());
    }

    #[test]
    fn feedback_follows_arm_state() {
        let backend = LoopbackBackend::new(16, 1);
        let tap: OutTap = backend.tap(15).unwrap();
        let mut config = test_config();
        config.control_out.enabled = true;
        config.control_out.set_seq_event(
            3,
            SeqAction::Arm,
            OutEvent { enabled: true, channel: 0, status: 0x90, d0: 3, d1: 127 },
        );
        let perf = Performance::new(backend, config).unwrap();
        perf.install_sequence(3, pattern(192));
        perf.sequence_playing_toggle(3);
        assert_eq!(tap.messages(), vec![vec![0x90, 3, 127]]);
    }
}
