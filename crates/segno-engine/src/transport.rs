//! External transport linkage and bar/beat/tick conversion.
//!
//! The engine free-runs by default; a `TransportLink` can instead supply
//! the tick position each cycle (slave) or be told about local transport
//! changes (master). The BBT math matches the existing JACK-master wire
//! behavior, including its `ppqn * 10` ticks-per-beat convention.

/// Ticks-per-beat multiplier used when publishing BBT to an external
/// transport. Interop constant: peers expect this exact scaling.
pub const TICKS_PER_BEAT_FACTOR: u32 = 10;

/// A bar/beat/tick position as published to an external transport.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BbtPosition {
    /// 1-based bar number.
    pub bar: u32,
    /// 1-based beat within the bar.
    pub beat: u32,
    /// Tick within the beat, in `ticks_per_beat` units.
    pub tick: u32,
    pub ticks_per_beat: f64,
    pub beats_per_bar: u32,
    pub beat_type: u32,
    pub bpm: f64,
}

/// Convert an engine tick into the external BBT representation.
pub fn bbt_position(
    tick: u64,
    ppqn: u32,
    beats_per_bar: u32,
    beat_type: u32,
    bpm: f64,
) -> BbtPosition {
    let ticks_per_beat = (ppqn * TICKS_PER_BEAT_FACTOR) as f64;
    let beats_per_bar = beats_per_bar.max(1);
    let beat_total = tick / ppqn.max(1) as u64;
    let bar = (beat_total / beats_per_bar as u64) as u32 + 1;
    let beat = (beat_total % beats_per_bar as u64) as u32 + 1;
    let tick_in_beat = (tick % ppqn.max(1) as u64) as u32 * TICKS_PER_BEAT_FACTOR;
    BbtPosition {
        bar,
        beat,
        tick: tick_in_beat,
        ticks_per_beat,
        beats_per_bar,
        beat_type,
        bpm,
    }
}

/// An optional external transport the engine can slave to or master.
pub trait TransportLink: Send {
    /// Position supplied by the peer this cycle, in engine ticks.
    /// `None` means free-run on the internal clock.
    fn position(&self) -> Option<u64>;

    /// Local reposition to announce to the peer.
    fn reposition(&mut self, tick: u64);

    /// Local transport started.
    fn on_start(&mut self);

    /// Local transport stopped.
    fn on_stop(&mut self);
}

/// The default link: no peer, internal clock only.
#[derive(Debug, Default)]
pub struct InternalClock;

impl TransportLink for InternalClock {
    fn position(&self) -> Option<u64> {
        None
    }

    fn reposition(&mut self, _tick: u64) {}

    fn on_start(&mut self) {}

    fn on_stop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbt_at_zero_is_bar_one_beat_one() {
        let pos = bbt_position(0, 192, 4, 4, 120.0);
        assert_eq!(pos.bar, 1);
        assert_eq!(pos.beat, 1);
        assert_eq!(pos.tick, 0);
        assert_eq!(pos.ticks_per_beat, 1920.0);
    }

    #[test]
    fn bbt_walks_beats_and_bars() {
        // One beat in
        let pos = bbt_position(192, 192, 4, 4, 120.0);
        assert_eq!((pos.bar, pos.beat), (1, 2));
        // One full 4/4 bar in
        let pos = bbt_position(768, 192, 4, 4, 120.0);
        assert_eq!((pos.bar, pos.beat), (2, 1));
    }

    #[test]
    fn bbt_tick_uses_factor_scaling() {
        let pos = bbt_position(96, 192, 4, 4, 120.0);
        assert_eq!(pos.tick, 960);
    }

    #[test]
    fn internal_clock_free_runs() {
        assert_eq!(InternalClock.position(), None);
    }
}
