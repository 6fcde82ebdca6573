use crate::tick::NetworkTick;
use crate::wire::{ByteReader, ByteWriter, WireError};

use super::buffer::CommandBuffer;
use super::registry::stable_type_hash;
use super::Command;
use crate::ghost::SpawnedGhostId;

/// Number of inputs carried per payload: the newest as baseline plus three
/// delta-compressed predecessors. Losing any single input requires four
/// consecutive datagram losses before the server misses it.
pub const INPUT_REDUNDANCY: usize = 4;

/// Hard cap on one entity's encoded payload body.
pub const MAX_PAYLOAD_BYTES: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("command payload for {type_name} is {len} bytes, cap is {MAX_PAYLOAD_BYTES}")]
    PayloadOverflow { type_name: &'static str, len: usize },
}

/// Encodes one entity's redundant command payload:
///
/// ```text
/// u64 stable_type_hash
/// u16 payload_length
/// i32 ghost_id | 0
/// u32 spawn_tick | 0
/// u32 baseline_tick
///     baseline body
/// 3 × { packed u32 delta-tick, delta body }
/// ```
///
/// Returns `Ok(false)` when the buffer holds nothing at or before
/// `target_tick`. An oversized body is logged and dropped, leaving the
/// datagram writer untouched.
pub fn encode_command_payload<T: Command>(
    w: &mut ByteWriter,
    buffer: &CommandBuffer<T>,
    target_tick: NetworkTick,
    ghost: Option<SpawnedGhostId>,
) -> Result<bool, CodecError> {
    let Some(baseline) = buffer.get_at(target_tick).copied() else {
        return Ok(false);
    };

    let mut body = ByteWriter::with_capacity(64);
    match ghost {
        Some(g) => {
            body.write_i32(g.ghost_id);
            body.write_u32(g.spawn_tick.to_wire());
        }
        None => {
            body.write_i32(0);
            body.write_u32(0);
        }
    }

    body.write_u32(baseline.tick().to_wire());
    baseline.encode(&mut body);

    let mut prev = baseline;
    for _ in 1..INPUT_REDUNDANCY {
        let lookup = prev.tick().decrement();
        if let Some(entry) = buffer.get_at(lookup) {
            prev = *entry;
        }
        let delta_ticks = baseline.tick().ticks_since(prev.tick()).max(0) as u32;
        body.write_packed_u32(delta_ticks);
        prev.encode_delta(&mut body, &baseline);
    }

    if body.len() > MAX_PAYLOAD_BYTES {
        let err = CodecError::PayloadOverflow {
            type_name: T::STABLE_NAME,
            len: body.len(),
        };
        log::error!("{err}");
        return Err(err);
    }

    w.write_u64(stable_type_hash(T::STABLE_NAME));
    w.write_u16(body.len() as u16);
    w.write_bytes(body.as_slice());
    Ok(true)
}

/// Decodes the redundant entries of one payload into the target buffer.
///
/// The reader must be positioned after the ghost routing fields. Entries are
/// inserted in production order, oldest first, so a redundant older copy can
/// never overwrite a newer command with an equal tick. When the newest entry
/// is already older than the current server tick its tick is rewritten to
/// the server tick, keeping the sender's latest intent findable at the
/// current tick; the older entries keep their true ticks.
pub fn decode_command_payload<T: Command>(
    r: &mut ByteReader,
    buffer: &mut CommandBuffer<T>,
    server_tick: NetworkTick,
) -> Result<(), WireError> {
    let baseline_tick = NetworkTick::from_wire(r.read_u32()?);
    let mut baseline = T::decode(r)?;
    baseline.set_tick(baseline_tick);

    let mut entries = [baseline; INPUT_REDUNDANCY];
    for slot in entries.iter_mut().skip(1) {
        let delta_ticks = r.read_packed_u32()?;
        let mut cmd = T::decode_delta(r, &baseline)?;
        cmd.set_tick(baseline_tick.subtract(delta_ticks));
        *slot = cmd;
    }

    if server_tick.is_valid()
        && entries[0].tick().is_valid()
        && server_tick.is_newer_than(entries[0].tick())
    {
        entries[0].set_tick(server_tick);
    }

    for cmd in entries.iter().rev() {
        buffer.add(*cmd);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputButtons, PlayerInput};

    fn input(tick: u32, yaw: f32, buttons: InputButtons) -> PlayerInput {
        let mut i = PlayerInput::new(NetworkTick::new(tick));
        i.set_view_angles(yaw, 0.0);
        i.buttons = buttons;
        i
    }

    fn filled_buffer(ticks: &[u32]) -> CommandBuffer<PlayerInput> {
        let mut buffer = CommandBuffer::new();
        for &t in ticks {
            buffer.add(input(t, t as f32 * 0.01, InputButtons::empty()));
        }
        buffer
    }

    #[test]
    fn roundtrip_four_consecutive_inputs() {
        let send = filled_buffer(&[100, 101, 102, 103]);
        let mut w = ByteWriter::new();
        let wrote =
            encode_command_payload(&mut w, &send, NetworkTick::new(103), None).unwrap();
        assert!(wrote);

        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(r.read_u64().unwrap(), stable_type_hash(PlayerInput::STABLE_NAME));
        let len = r.read_u16().unwrap() as usize;
        let mut payload = r.sub_reader(len).unwrap();
        assert_eq!(payload.read_i32().unwrap(), 0);
        assert_eq!(payload.read_u32().unwrap(), 0);

        let mut recv = CommandBuffer::new();
        decode_command_payload::<PlayerInput>(&mut payload, &mut recv, NetworkTick::new(103))
            .unwrap();

        assert_eq!(recv.len(), 4);
        for t in [100u32, 101, 102, 103] {
            let got = recv.get_at(NetworkTick::new(t)).unwrap();
            assert_eq!(got.tick(), NetworkTick::new(t));
            assert_eq!(*got, *send.get_at(NetworkTick::new(t)).unwrap());
        }
    }

    #[test]
    fn sparse_buffer_repeats_last_known_input() {
        // Only ticks 100 and 103 exist; the two middle slots re-serialize
        // tick 100 and collapse into one entry on the receiving side.
        let send = filled_buffer(&[100, 103]);
        let mut w = ByteWriter::new();
        encode_command_payload(&mut w, &send, NetworkTick::new(103), None).unwrap();

        let mut r = ByteReader::new(w.as_slice());
        r.read_u64().unwrap();
        let len = r.read_u16().unwrap() as usize;
        let mut payload = r.sub_reader(len).unwrap();
        payload.read_i32().unwrap();
        payload.read_u32().unwrap();

        let mut recv = CommandBuffer::new();
        decode_command_payload::<PlayerInput>(&mut payload, &mut recv, NetworkTick::new(103))
            .unwrap();

        assert_eq!(recv.len(), 2);
        assert_eq!(
            recv.get_at(NetworkTick::new(102)).unwrap().tick(),
            NetworkTick::new(100)
        );
    }

    #[test]
    fn stale_newest_entry_is_rewritten_to_server_tick() {
        let send = filled_buffer(&[100, 101, 102, 103]);
        let mut w = ByteWriter::new();
        encode_command_payload(&mut w, &send, NetworkTick::new(103), None).unwrap();

        let mut r = ByteReader::new(w.as_slice());
        r.read_u64().unwrap();
        let len = r.read_u16().unwrap() as usize;
        let mut payload = r.sub_reader(len).unwrap();
        payload.read_i32().unwrap();
        payload.read_u32().unwrap();

        let mut recv = CommandBuffer::new();
        let server_tick = NetworkTick::new(110);
        decode_command_payload::<PlayerInput>(&mut payload, &mut recv, server_tick).unwrap();

        // The newest input is findable at the current server tick; the
        // older redundant entries keep their true ticks.
        let at_server = recv.get_at(server_tick).unwrap();
        assert_eq!(at_server.tick(), server_tick);
        assert_eq!(
            recv.get_at(NetworkTick::new(102)).unwrap().tick(),
            NetworkTick::new(102)
        );
    }

    #[test]
    fn ghost_routing_fields_are_encoded() {
        let send = filled_buffer(&[50]);
        let ghost = SpawnedGhostId {
            ghost_id: 17,
            spawn_tick: NetworkTick::new(3),
        };
        let mut w = ByteWriter::new();
        encode_command_payload(&mut w, &send, NetworkTick::new(50), Some(ghost)).unwrap();

        let mut r = ByteReader::new(w.as_slice());
        r.read_u64().unwrap();
        let len = r.read_u16().unwrap() as usize;
        let mut payload = r.sub_reader(len).unwrap();
        assert_eq!(payload.read_i32().unwrap(), 17);
        assert_eq!(payload.read_u32().unwrap(), 3);
    }

    #[test]
    fn nothing_to_send_is_not_an_error() {
        let send = filled_buffer(&[100]);
        let mut w = ByteWriter::new();
        let wrote =
            encode_command_payload(&mut w, &send, NetworkTick::new(99), None).unwrap();
        assert!(!wrote);
        assert!(w.is_empty());
    }
}
