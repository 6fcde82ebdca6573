use crate::ghost::{EntityId, GhostWorld};
use crate::net::{CommandHeader, Connection, NetworkTime};
use crate::tick::NetworkTick;
use crate::wire::ByteWriter;

use super::buffer::CMD_BUFFER_CAP;
use super::registry::CommandRegistry;

/// Client-side per-tick job: selects routing targets, encodes their
/// redundant payloads, and enqueues exactly one command datagram on the
/// connection.
#[derive(Debug, Default)]
pub struct CommandSendPipeline {
    prev_input_target_tick: NetworkTick,
}

impl CommandSendPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the send job. Gated on the input target tick so render frames
    /// faster than the simulation cannot emit duplicates; returns the
    /// datagram size when one was queued.
    pub fn run(
        &mut self,
        world: &GhostWorld,
        registry: &CommandRegistry,
        conn: &mut Connection,
        time: &NetworkTime,
        local_time_ms: u32,
        num_loaded_prefabs: u32,
    ) -> Option<usize> {
        let target_tick = time.input_target_tick();
        if !target_tick.is_valid() {
            return None;
        }
        if self.prev_input_target_tick.is_valid()
            && !target_tick.is_newer_than(self.prev_input_target_tick)
        {
            return None;
        }

        let mut w = ByteWriter::with_capacity(256);
        let header = CommandHeader {
            last_received_snapshot: conn.ack.last_received_snapshot,
            received_mask: conn.ack.received_mask,
            local_time_ms,
            echoed_remote_time: conn.ack.echo_time(local_time_ms),
            interpolation_delay_ticks: time.interpolation_delay_ticks(),
            num_loaded_prefabs,
            input_target_tick: target_tick,
        };
        header.write(&mut w);

        let mut auto_encoded: Vec<EntityId> = Vec::new();
        for entity in world.auto_targets_for(conn.network_id) {
            let ghost = world.get(entity).and_then(|e| e.ghost);
            for registered in registry.entries() {
                if !registered.has_buffer(world, entity) {
                    continue;
                }
                if self.should_skip(registered.newest_buffered_tick(world, entity), target_tick)
                {
                    continue;
                }
                if registered.encode(world, entity, target_tick, ghost, &mut w).is_ok() {
                    auto_encoded.push(entity);
                }
            }
        }

        // Explicit target fallback: encoded with zeroed routing fields so
        // the receiver resolves it through the connection instead.
        if let Some(explicit) = conn.command_target {
            if !auto_encoded.contains(&explicit) {
                for registered in registry.entries() {
                    if !registered.has_buffer(world, explicit) {
                        continue;
                    }
                    if self
                        .should_skip(registered.newest_buffered_tick(world, explicit), target_tick)
                    {
                        continue;
                    }
                    let _ = registered.encode(world, explicit, target_tick, None, &mut w);
                }
            }
        }

        self.prev_input_target_tick = target_tick;

        let len = w.len();
        conn.queue_datagram(w.into_vec());
        Some(len)
    }

    /// Suppresses stale resends during catastrophic hitches: once the newest
    /// buffered input has already been sent and the buffer can no longer
    /// cover the gap to the target, sending would only repeat old data.
    fn should_skip(&self, newest_buffered: NetworkTick, target_tick: NetworkTick) -> bool {
        if !newest_buffered.is_valid() || !self.prev_input_target_tick.is_valid() {
            return false;
        }
        if newest_buffered.is_newer_than(self.prev_input_target_tick) {
            return false;
        }
        target_tick.ticks_since(newest_buffered) > CMD_BUFFER_CAP as i32
    }
}
