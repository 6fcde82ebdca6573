use crate::tick::NetworkTick;

use super::Command;

/// Upper bound on buffered inputs per entity; roughly one second of commands
/// at 60 Hz.
pub const CMD_BUFFER_CAP: usize = 64;

/// Fixed-capacity store of the most recent inputs for one entity, keyed by
/// tick. Slots are unordered; every lookup is a linear scan.
#[derive(Debug, Clone)]
pub struct CommandBuffer<T> {
    entries: Vec<T>,
}

impl<T: Command> Default for CommandBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Command> CommandBuffer<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(CMD_BUFFER_CAP),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts a command. An entry with an equal tick is overwritten in
    /// place; otherwise the command is appended, evicting the oldest entry
    /// when the buffer is full. Commands with an invalid tick are dropped.
    /// Best-effort by design: never fails.
    pub fn add(&mut self, cmd: T) {
        let tick = cmd.tick();
        if !tick.is_valid() {
            return;
        }

        if let Some(existing) = self.entries.iter_mut().find(|e| e.tick() == tick) {
            *existing = cmd;
            return;
        }

        if self.entries.len() < CMD_BUFFER_CAP {
            self.entries.push(cmd);
            return;
        }

        let mut oldest = 0;
        for i in 1..self.entries.len() {
            if self.entries[oldest].tick().is_newer_than(self.entries[i].tick()) {
                oldest = i;
            }
        }
        self.entries[oldest] = cmd;
    }

    /// Returns the entry whose tick is the newest value not newer than
    /// `target`, or `None` when every entry is newer than the target.
    pub fn get_at(&self, target: NetworkTick) -> Option<&T> {
        if !target.is_valid() {
            return None;
        }
        let mut best: Option<&T> = None;
        for entry in &self.entries {
            let tick = entry.tick();
            if tick.is_newer_than(target) {
                continue;
            }
            if best.map_or(true, |b| tick.is_newer_than(b.tick())) {
                best = Some(entry);
            }
        }
        best
    }

    /// Raw slot access; panics on an out-of-range index.
    pub fn get_at_index(&self, index: usize) -> &T {
        &self.entries[index]
    }

    /// Tick of the newest entry, or the invalid tick when empty.
    pub fn newest_tick(&self) -> NetworkTick {
        let mut newest = NetworkTick::INVALID;
        for entry in &self.entries {
            if !newest.is_valid() || entry.tick().is_newer_than(newest) {
                newest = entry.tick();
            }
        }
        newest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ByteReader, ByteWriter, WireError};

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    struct TestCmd {
        tick: NetworkTick,
        value: u32,
    }

    impl Command for TestCmd {
        const STABLE_NAME: &'static str = "test.TestCmd";

        fn tick(&self) -> NetworkTick {
            self.tick
        }

        fn set_tick(&mut self, tick: NetworkTick) {
            self.tick = tick;
        }

        fn encode(&self, w: &mut ByteWriter) {
            w.write_u32(self.value);
        }

        fn encode_delta(&self, w: &mut ByteWriter, baseline: &Self) {
            w.write_u32(self.value.wrapping_sub(baseline.value));
        }

        fn decode(r: &mut ByteReader) -> Result<Self, WireError> {
            Ok(Self {
                tick: NetworkTick::INVALID,
                value: r.read_u32()?,
            })
        }

        fn decode_delta(r: &mut ByteReader, baseline: &Self) -> Result<Self, WireError> {
            Ok(Self {
                tick: NetworkTick::INVALID,
                value: baseline.value.wrapping_add(r.read_u32()?),
            })
        }
    }

    fn cmd(tick: u32, value: u32) -> TestCmd {
        TestCmd {
            tick: NetworkTick::new(tick),
            value,
        }
    }

    #[test]
    fn equal_tick_overwrites() {
        let mut buffer = CommandBuffer::new();
        buffer.add(cmd(5, 1));
        buffer.add(cmd(5, 2));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get_at(NetworkTick::new(5)).unwrap().value, 2);
    }

    #[test]
    fn full_buffer_evicts_oldest() {
        let mut buffer = CommandBuffer::new();
        for t in 1..=CMD_BUFFER_CAP as u32 {
            buffer.add(cmd(t, t));
        }
        buffer.add(cmd(100, 100));
        assert_eq!(buffer.len(), CMD_BUFFER_CAP);
        assert!(buffer.get_at(NetworkTick::new(1)).is_none());
        assert_eq!(buffer.get_at(NetworkTick::new(100)).unwrap().value, 100);
    }

    #[test]
    fn get_at_returns_newest_not_newer() {
        let mut buffer = CommandBuffer::new();
        buffer.add(cmd(10, 10));
        buffer.add(cmd(20, 20));
        buffer.add(cmd(30, 30));

        assert_eq!(buffer.get_at(NetworkTick::new(25)).unwrap().value, 20);
        assert_eq!(buffer.get_at(NetworkTick::new(30)).unwrap().value, 30);
        assert!(buffer.get_at(NetworkTick::new(9)).is_none());
    }

    #[test]
    fn ticks_stay_unique() {
        let mut buffer = CommandBuffer::new();
        for t in [3u32, 1, 2, 3, 2, 1] {
            buffer.add(cmd(t, t));
        }
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn invalid_tick_is_dropped() {
        let mut buffer = CommandBuffer::new();
        buffer.add(TestCmd::default());
        assert!(buffer.is_empty());
        assert!(!buffer.newest_tick().is_valid());
    }

    #[test]
    fn newest_tick_tracks_insertions() {
        let mut buffer = CommandBuffer::new();
        buffer.add(cmd(7, 0));
        buffer.add(cmd(3, 0));
        assert_eq!(buffer.newest_tick(), NetworkTick::new(7));
    }
}
