//! A single MIDI output endpoint: channel-forced playback, SysEx
//! chunking, and clock/start/stop/continue emission.
//!
//! Clock emission is a catch-up loop over the tick counter, so scheduling
//! jitter that batches several `clock()` calls still yields exactly one
//! pulse per `ppqn/24` boundary crossed.

use crate::traits::{MidiError, PortInfo, PortOut};
use segno_core::{ticks_per_pulse, ticks_per_sixteenth, ClockPolicy, MidiMsg};
use std::sync::atomic::{AtomicU32, Ordering};

/// SysEx transmission chunk size, sized to driver buffer limits.
pub const SYSEX_CHUNK: usize = 256;

// Clock-mod restart granularity in sixteenth notes, shared by every bus.
static CLOCK_MOD: AtomicU32 = AtomicU32::new(64);

/// Set the clock-mod granularity (in sixteenths) for all busses.
pub fn set_clock_mod(sixteenths: u32) {
    if sixteenths > 0 {
        CLOCK_MOD.store(sixteenths, Ordering::Relaxed);
    }
}

/// Current clock-mod granularity.
pub fn clock_mod() -> u32 {
    CLOCK_MOD.load(Ordering::Relaxed)
}

/// One output bus. Starts closed; `open()` attaches a backend port and
/// there is no transition back until destruction.
pub struct MidiBus<P: PortOut> {
    info: PortInfo,
    port: Option<P>,
    clock: ClockPolicy,
    ppqn: u32,
    /// Last tick the clock loop has processed; -1 means "before tick 0".
    last_tick: i64,
}

impl<P: PortOut> MidiBus<P> {
    pub fn new(info: PortInfo, ppqn: u32) -> Self {
        Self {
            info,
            port: None,
            clock: ClockPolicy::Off,
            ppqn,
            last_tick: -1,
        }
    }

    pub fn info(&self) -> &PortInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Attach the opened backend port.
    pub fn open(&mut self, port: P) {
        self.port = Some(port);
    }

    pub fn set_clock(&mut self, clock: ClockPolicy) {
        self.clock = clock;
    }

    pub fn get_clock(&self) -> ClockPolicy {
        self.clock
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), MidiError> {
        match self.port.as_mut() {
            Some(port) => port.write(bytes),
            None => Err(MidiError::Closed),
        }
    }

    /// Write one channel-voice message, remapping the outgoing channel
    /// regardless of the event's embedded channel.
    pub fn play(&mut self, msg: &MidiMsg, channel: u8) -> Result<(), MidiError> {
        if !self.clock.is_enabled() {
            return Ok(());
        }
        match msg.with_channel(channel).to_short_bytes() {
            Some(bytes) => self.send(&bytes),
            None => Ok(()),
        }
    }

    /// Transmit SysEx data in fixed-size chunks.
    pub fn sysex(&mut self, msg: &MidiMsg) -> Result<(), MidiError> {
        if !self.clock.is_enabled() {
            return Ok(());
        }
        let MidiMsg::SysEx(data) = msg else {
            return Ok(());
        };
        // chunks() never yields an empty slice, so an empty payload sends nothing
        let chunks: Vec<&[u8]> = data.chunks(SYSEX_CHUNK).collect();
        for chunk in chunks {
            self.send(chunk)?;
        }
        Ok(())
    }

    /// Emit MIDI Clock for every `ppqn/24` boundary crossed since the last
    /// call, no matter how calls are batched.
    pub fn clock(&mut self, tick: u64) -> Result<(), MidiError> {
        if !self.clock.is_emitting() || !self.is_open() {
            return Ok(());
        }
        let spacing = ticks_per_pulse(self.ppqn) as i64;
        let target = tick as i64;
        while self.last_tick < target {
            self.last_tick += 1;
            if self.last_tick % spacing == 0 {
                self.send(&[0xF8])?;
            }
        }
        Ok(())
    }

    /// Emit MIDI Start and rewind the clock phase to tick 0.
    pub fn start(&mut self) -> Result<(), MidiError> {
        self.last_tick = -1;
        if self.clock.is_emitting() {
            self.send(&[0xFA])?;
        }
        Ok(())
    }

    /// Emit MIDI Stop.
    pub fn stop(&mut self) -> Result<(), MidiError> {
        if self.clock.is_emitting() {
            self.send(&[0xFC])?;
        }
        Ok(())
    }

    /// Emit Song Position + Continue for a mid-song resume. The clock
    /// phase snaps to the next sixteenth so pulses stay aligned.
    pub fn continue_from(&mut self, tick: u64) -> Result<(), MidiError> {
        let pp16 = ticks_per_sixteenth(self.ppqn);
        let leftover = tick % pp16;
        let beats = tick / pp16;
        let mut starting = tick - leftover;
        if leftover > 0 {
            starting += pp16;
        }
        self.last_tick = starting as i64 - 1;
        if self.clock.is_emitting() {
            let beats = beats as u16;
            self.send(&[0xF2, (beats & 0x7F) as u8, ((beats >> 7) & 0x7F) as u8])?;
            self.send(&[0xFB])?;
        }
        Ok(())
    }

    /// Bring clock output up for a playback session starting at `tick`.
    ///
    /// Pos resumes with Continue + Song Position; Mod (or a start at tick
    /// zero) sends Start and holds the first pulse until the next
    /// clock-mod boundary.
    pub fn init_clock(&mut self, tick: u64) -> Result<(), MidiError> {
        if self.clock == ClockPolicy::Pos && tick != 0 {
            self.continue_from(tick)
        } else if self.clock == ClockPolicy::Mod || tick == 0 {
            self.start()?;
            let boundary = ticks_per_sixteenth(self.ppqn) * clock_mod() as u64;
            let leftover = tick % boundary;
            let mut starting = tick - leftover;
            if leftover > 0 {
                starting += boundary;
            }
            self.last_tick = starting as i64 - 1;
            Ok(())
        } else {
            Ok(())
        }
    }

    pub fn flush(&mut self) {
        if let Some(port) = self.port.as_mut() {
            port.flush();
        }
    }
}
