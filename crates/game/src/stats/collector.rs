use crate::tick::NetworkTick;

use super::packet::{PacketPool, PacketQueue, StatPacket};

/// Per-frame cap on the bounded stat arrays; every list truncates silently
/// past this.
pub const MAX_FRAME_ENTRIES: usize = 255;

/// Snapshot stats come in triples per ghost type: instances, size in bits,
/// uncompressed chunk count.
pub const STATS_PER_GHOST_TYPE: usize = 3;

const MAX_GAP_FILL: i32 = 255;
const FRAME_HEADER_BYTES: usize = 12;
const TIME_SAMPLE_BYTES: usize = 36;

/// One per-tick timing probe shipped to the visualiser.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeSample {
    pub fraction: f32,
    pub timescale: f32,
    pub interpolation_offset: f32,
    pub interpolation_scale: f32,
    pub command_age: f32,
    pub rtt: f32,
    pub jitter: f32,
    pub snapshot_age_min: f32,
    pub snapshot_age_max: f32,
}

impl TimeSample {
    fn write(&self, out: &mut Vec<u8>) {
        for v in [
            self.fraction,
            self.timescale,
            self.interpolation_offset,
            self.interpolation_scale,
            self.command_age,
            self.rtt,
            self.jitter,
            self.snapshot_age_min,
            self.snapshot_age_max,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
}

/// Frame-level aggregate over the snapshot-stat triples, for in-process
/// metrics listeners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GhostMetrics {
    pub instances: u32,
    pub total_size_bits: u32,
    pub uncompressed: u32,
}

/// Per-world, per-tick telemetry accumulator.
///
/// Bandwidth, prediction error, command age and timing samples accumulate
/// under the current `collection_tick`; advancing the tick seals the frame
/// into one binary packet on the outgoing queue. A skipped tick range is
/// filled with empty frames so the visualiser timeline stays aligned with
/// the server's.
pub struct StatsCollector {
    name: String,
    stat_index: i32,
    has_metrics_monitor: bool,
    collection_tick: NetworkTick,
    ghost_names: Vec<String>,
    prediction_error_names: Vec<String>,
    names_dirty: bool,
    snapshot_stats: Vec<u32>,
    snapshot_ticks: Vec<u32>,
    command_ticks: Vec<u32>,
    command_stats: u32,
    prediction_errors: Vec<f32>,
    time_samples: Vec<TimeSample>,
    discarded_packets: u8,
    metrics: GhostMetrics,
    queue: PacketQueue,
    pool: PacketPool,
}

impl StatsCollector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stat_index: -1,
            has_metrics_monitor: false,
            collection_tick: NetworkTick::INVALID,
            ghost_names: Vec::new(),
            prediction_error_names: Vec::new(),
            names_dirty: false,
            snapshot_stats: Vec::new(),
            snapshot_ticks: Vec::new(),
            command_ticks: Vec::new(),
            command_stats: 0,
            prediction_errors: Vec::new(),
            time_samples: Vec::new(),
            discarded_packets: 0,
            metrics: GhostMetrics::default(),
            queue: PacketQueue::new(),
            pool: PacketPool::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stat_index(&self) -> i32 {
        self.stat_index
    }

    pub fn is_connected(&self) -> bool {
        self.stat_index >= 0
    }

    pub fn set_metrics_monitor(&mut self, enabled: bool) {
        self.has_metrics_monitor = enabled;
    }

    pub fn collection_tick(&self) -> NetworkTick {
        self.collection_tick
    }

    pub fn metrics(&self) -> GhostMetrics {
        self.metrics
    }

    fn collecting(&self) -> bool {
        self.collection_tick.is_valid() && (self.is_connected() || self.has_metrics_monitor)
    }

    /// Replaces the ghost-type name table. Changing the table resizes the
    /// per-tick stat arrays, which invalidates any frame in flight.
    pub fn set_ghost_names(&mut self, names: Vec<String>) {
        if names == self.ghost_names {
            return;
        }
        self.ghost_names = names;
        self.snapshot_stats = vec![0; self.ghost_names.len() * STATS_PER_GHOST_TYPE];
        self.collection_tick = NetworkTick::INVALID;
        self.reset_frame();
        self.names_dirty = true;
    }

    pub fn set_prediction_error_names(&mut self, names: Vec<String>) {
        if names == self.prediction_error_names {
            return;
        }
        self.prediction_error_names = names;
        self.prediction_errors = vec![0.0; self.prediction_error_names.len()];
        self.collection_tick = NetworkTick::INVALID;
        self.reset_frame();
        self.names_dirty = true;
    }

    /// Binds this collector to a visualiser stream.
    pub fn bind(&mut self, stat_index: i32) {
        self.stat_index = stat_index;
        self.collection_tick = NetworkTick::INVALID;
        self.reset_frame();
        self.names_dirty = true;
        self.flush_names();
    }

    /// Detaches from the visualiser: queue cleared, counters zeroed.
    pub fn unbind(&mut self) {
        self.stat_index = -1;
        self.queue.drain_into(&mut self.pool);
        self.collection_tick = NetworkTick::INVALID;
        self.reset_frame();
        self.names_dirty = false;
    }

    /// Reports the simulation's new server tick. Seals the previous frame
    /// (plus one empty frame per skipped tick) and starts accumulating under
    /// the new one.
    pub fn advance_tick(&mut self, tick: NetworkTick) {
        if !self.is_connected() && !self.has_metrics_monitor {
            self.collection_tick = NetworkTick::INVALID;
            return;
        }
        self.flush_names();
        if !tick.is_valid() || tick == self.collection_tick {
            return;
        }

        if self.collection_tick.is_valid() {
            let gap = tick.ticks_since(self.collection_tick);
            if gap > 0 && gap <= MAX_GAP_FILL {
                self.emit_frame(self.collection_tick);
                let mut fill = self.collection_tick.increment();
                while fill.is_valid() && tick.is_newer_than(fill) {
                    self.emit_frame(fill);
                    fill = fill.increment();
                }
            } else {
                // Too large a jump (or time went backwards): resynchronise.
                self.reset_frame();
            }
        }
        self.collection_tick = tick;
    }

    pub fn add_snapshot_stats(&mut self, tick: NetworkTick, per_ghost_triples: &[u32]) {
        if !self.collecting() {
            return;
        }
        if self.snapshot_ticks.len() < MAX_FRAME_ENTRIES {
            self.snapshot_ticks.push(tick.to_wire());
        }
        let len = per_ghost_triples.len().min(self.snapshot_stats.len());
        for i in 0..len {
            self.snapshot_stats[i] = self.snapshot_stats[i].wrapping_add(per_ghost_triples[i]);
        }
        for triple in per_ghost_triples.chunks_exact(STATS_PER_GHOST_TYPE) {
            self.metrics.instances = self.metrics.instances.wrapping_add(triple[0]);
            self.metrics.total_size_bits = self.metrics.total_size_bits.wrapping_add(triple[1]);
            self.metrics.uncompressed = self.metrics.uncompressed.wrapping_add(triple[2]);
        }
    }

    pub fn add_command_stats(&mut self, tick: NetworkTick, bytes: u32) {
        if !self.collecting() {
            return;
        }
        if self.command_ticks.len() < MAX_FRAME_ENTRIES {
            self.command_ticks.push(tick.to_wire());
        }
        self.command_stats = self.command_stats.wrapping_add(bytes);
    }

    /// Folds a set of per-field prediction errors into the frame's per-field
    /// maxima.
    pub fn add_prediction_error_stats(&mut self, values: &[f32]) {
        if !self.collecting() {
            return;
        }
        let len = values.len().min(self.prediction_errors.len());
        for i in 0..len {
            if values[i] > self.prediction_errors[i] {
                self.prediction_errors[i] = values[i];
            }
        }
    }

    pub fn add_time_sample(&mut self, sample: TimeSample) {
        if !self.collecting() {
            return;
        }
        if self.time_samples.len() < MAX_FRAME_ENTRIES {
            self.time_samples.push(sample);
        }
    }

    pub fn add_discarded_packets(&mut self, count: u32) {
        if !self.collecting() {
            return;
        }
        self.discarded_packets = self
            .discarded_packets
            .saturating_add(count.min(u8::MAX as u32) as u8);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pop_packet(&mut self) -> Option<StatPacket> {
        self.queue.pop()
    }

    pub fn recycle(&mut self, packet: StatPacket) {
        self.pool.release(packet);
    }

    fn flush_names(&mut self) {
        if !self.names_dirty || !self.is_connected() {
            return;
        }
        self.names_dirty = false;

        let mut ghosts = String::from("\"Destroy\"");
        for name in &self.ghost_names {
            ghosts.push_str(",\"");
            ghosts.push_str(name);
            ghosts.push('"');
        }
        let errors = self
            .prediction_error_names
            .iter()
            .map(|n| format!("\"{n}\""))
            .collect::<Vec<_>>()
            .join(",");
        let json = format!(
            "{{\"index\":{},\"name\":\"{}\",\"ghosts\":[{}],\"errors\":[{}]}}",
            self.stat_index, self.name, ghosts, errors
        );

        let mut packet = self.pool.acquire(json.len());
        packet.is_string = true;
        packet.data.extend_from_slice(json.as_bytes());
        self.queue.push(packet);
    }

    fn frame_size(&self) -> usize {
        FRAME_HEADER_BYTES
            + self.time_samples.len() * TIME_SAMPLE_BYTES
            + self.snapshot_ticks.len() * 4
            + self.snapshot_stats.len() * 4
            + self.prediction_errors.len() * 4
            + self.command_ticks.len() * 4
            + 4
    }

    fn emit_frame(&mut self, tick: NetworkTick) {
        let mut packet = self.pool.acquire(self.frame_size());
        let out = &mut packet.data;

        out.extend_from_slice(&tick.to_wire().to_le_bytes());
        out.push(self.stat_index.clamp(0, u8::MAX as i32) as u8);
        out.push(self.time_samples.len() as u8);
        out.push(self.snapshot_ticks.len() as u8);
        out.push(self.command_ticks.len() as u8);
        out.push(0); // rpcs, reserved
        out.push(self.discarded_packets);
        out.push(0);
        out.push(0);

        for sample in &self.time_samples {
            sample.write(out);
        }
        for v in &self.snapshot_ticks {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in &self.snapshot_stats {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in &self.prediction_errors {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in &self.command_ticks {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&self.command_stats.to_le_bytes());

        self.queue.push(packet);
        self.reset_frame();
    }

    fn reset_frame(&mut self) {
        self.snapshot_ticks.clear();
        self.command_ticks.clear();
        self.time_samples.clear();
        self.command_stats = 0;
        self.discarded_packets = 0;
        self.metrics = GhostMetrics::default();
        self.snapshot_stats.fill(0);
        self.prediction_errors.fill(0.0);
    }
}
