use glam::Vec3;

use crate::ghost::SpawnedGhostId;
use crate::tick::NetworkTick;
use crate::wire::{ByteReader, ByteWriter, WireError};

pub const DEFAULT_PORT: u16 = 47815;
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Conservative datagram budget; payloads above `MTU - MAX_TRANSPORT_HEADER`
/// are routed through the fragmenting pipeline.
pub const MTU: usize = 1200;
pub const MAX_TRANSPORT_HEADER: usize = 64;

/// Fixed size of the command datagram header.
pub const COMMAND_HEADER_BYTES: usize = 29;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolId {
    Hello = 1,
    Challenge = 2,
    ChallengeReply = 3,
    Welcome = 4,
    Denied = 5,
    Command = 6,
    Snapshot = 7,
    Disconnect = 8,
}

impl ProtocolId {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Hello,
            2 => Self::Challenge,
            3 => Self::ChallengeReply,
            4 => Self::Welcome,
            5 => Self::Denied,
            6 => Self::Command,
            7 => Self::Snapshot,
            8 => Self::Disconnect,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Unfragmented,
    Fragmented,
}

pub fn select_pipeline(datagram_len: usize) -> PipelineKind {
    if datagram_len > MTU - MAX_TRANSPORT_HEADER {
        PipelineKind::Fragmented
    } else {
        PipelineKind::Unfragmented
    }
}

#[derive(Debug, Clone)]
pub struct OutgoingDatagram {
    pub pipeline: PipelineKind,
    pub data: Vec<u8>,
}

impl OutgoingDatagram {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            pipeline: select_pipeline(data.len()),
            data,
        }
    }
}

/// Header of every command datagram; snapshot-ack and time-sync fields ride
/// along with the inputs once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandHeader {
    pub last_received_snapshot: NetworkTick,
    pub received_mask: u32,
    pub local_time_ms: u32,
    pub echoed_remote_time: u32,
    pub interpolation_delay_ticks: u32,
    pub num_loaded_prefabs: u32,
    pub input_target_tick: NetworkTick,
}

impl CommandHeader {
    pub fn write(&self, w: &mut ByteWriter) {
        w.write_u8(ProtocolId::Command as u8);
        w.write_u32(self.last_received_snapshot.to_wire());
        w.write_u32(self.received_mask);
        w.write_u32(self.local_time_ms);
        w.write_u32(self.echoed_remote_time);
        w.write_u32(self.interpolation_delay_ticks);
        w.write_u32(self.num_loaded_prefabs);
        w.write_u32(self.input_target_tick.to_wire());
    }

    /// Reads the header fields; the protocol byte must already be consumed.
    pub fn read(r: &mut ByteReader) -> Result<Self, WireError> {
        Ok(Self {
            last_received_snapshot: NetworkTick::from_wire(r.read_u32()?),
            received_mask: r.read_u32()?,
            local_time_ms: r.read_u32()?,
            echoed_remote_time: r.read_u32()?,
            interpolation_delay_ticks: r.read_u32()?,
            num_loaded_prefabs: r.read_u32()?,
            input_target_tick: NetworkTick::from_wire(r.read_u32()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotGhost {
    pub ghost: SpawnedGhostId,
    pub ghost_type: u8,
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Server-authored world state broadcast. Contents are deliberately plain;
/// the telemetry pipeline only observes its byte size and tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMessage {
    pub tick: NetworkTick,
    pub server_time_ms: u32,
    pub last_processed_input_tick: NetworkTick,
    pub ghosts: Vec<SnapshotGhost>,
}

impl SnapshotMessage {
    pub fn write(&self, w: &mut ByteWriter) {
        w.write_u8(ProtocolId::Snapshot as u8);
        w.write_u32(self.tick.to_wire());
        w.write_u32(self.server_time_ms);
        w.write_u32(self.last_processed_input_tick.to_wire());
        w.write_u8(self.ghosts.len().min(u8::MAX as usize) as u8);
        for ghost in self.ghosts.iter().take(u8::MAX as usize) {
            w.write_i32(ghost.ghost.ghost_id);
            w.write_u32(ghost.ghost.spawn_tick.to_wire());
            w.write_u8(ghost.ghost_type);
            for v in [ghost.position, ghost.velocity] {
                w.write_f32(v.x);
                w.write_f32(v.y);
                w.write_f32(v.z);
            }
        }
    }

    /// Reads the message body; the protocol byte must already be consumed.
    pub fn read(r: &mut ByteReader) -> Result<Self, WireError> {
        let tick = NetworkTick::from_wire(r.read_u32()?);
        let server_time_ms = r.read_u32()?;
        let last_processed_input_tick = NetworkTick::from_wire(r.read_u32()?);
        let count = r.read_u8()? as usize;
        let mut ghosts = Vec::with_capacity(count);
        for _ in 0..count {
            let ghost = SpawnedGhostId {
                ghost_id: r.read_i32()?,
                spawn_tick: NetworkTick::from_wire(r.read_u32()?),
            };
            let ghost_type = r.read_u8()?;
            let position = Vec3::new(r.read_f32()?, r.read_f32()?, r.read_f32()?);
            let velocity = Vec3::new(r.read_f32()?, r.read_f32()?, r.read_f32()?);
            ghosts.push(SnapshotGhost {
                ghost,
                ghost_type,
                position,
                velocity,
            });
        }
        Ok(Self {
            tick,
            server_time_ms,
            last_processed_input_tick,
            ghosts,
        })
    }
}

/// Connection-control messages (handshake and teardown).
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Hello { client_salt: u64 },
    Challenge { server_salt: u64 },
    ChallengeReply { combined_salt: u64 },
    Welcome {
        network_id: u32,
        ghost_id: i32,
        spawn_tick: NetworkTick,
        tick_rate: u32,
    },
    Denied { reason: String },
    Disconnect,
}

impl ControlMessage {
    pub fn write(&self, w: &mut ByteWriter) {
        match self {
            Self::Hello { client_salt } => {
                w.write_u8(ProtocolId::Hello as u8);
                w.write_u64(*client_salt);
            }
            Self::Challenge { server_salt } => {
                w.write_u8(ProtocolId::Challenge as u8);
                w.write_u64(*server_salt);
            }
            Self::ChallengeReply { combined_salt } => {
                w.write_u8(ProtocolId::ChallengeReply as u8);
                w.write_u64(*combined_salt);
            }
            Self::Welcome {
                network_id,
                ghost_id,
                spawn_tick,
                tick_rate,
            } => {
                w.write_u8(ProtocolId::Welcome as u8);
                w.write_u32(*network_id);
                w.write_i32(*ghost_id);
                w.write_u32(spawn_tick.to_wire());
                w.write_u32(*tick_rate);
            }
            Self::Denied { reason } => {
                w.write_u8(ProtocolId::Denied as u8);
                let bytes = reason.as_bytes();
                let len = bytes.len().min(u8::MAX as usize);
                w.write_u8(len as u8);
                w.write_bytes(&bytes[..len]);
            }
            Self::Disconnect => w.write_u8(ProtocolId::Disconnect as u8),
        }
    }

    /// Reads one control message given its already-consumed protocol byte.
    pub fn read(proto: ProtocolId, r: &mut ByteReader) -> Result<Self, WireError> {
        Ok(match proto {
            ProtocolId::Hello => Self::Hello {
                client_salt: r.read_u64()?,
            },
            ProtocolId::Challenge => Self::Challenge {
                server_salt: r.read_u64()?,
            },
            ProtocolId::ChallengeReply => Self::ChallengeReply {
                combined_salt: r.read_u64()?,
            },
            ProtocolId::Welcome => Self::Welcome {
                network_id: r.read_u32()?,
                ghost_id: r.read_i32()?,
                spawn_tick: NetworkTick::from_wire(r.read_u32()?),
                tick_rate: r.read_u32()?,
            },
            ProtocolId::Denied => {
                let len = r.read_u8()? as usize;
                let mut bytes = Vec::with_capacity(len);
                for _ in 0..len {
                    bytes.push(r.read_u8()?);
                }
                Self::Denied {
                    reason: String::from_utf8_lossy(&bytes).into_owned(),
                }
            }
            ProtocolId::Disconnect => Self::Disconnect,
            ProtocolId::Command | ProtocolId::Snapshot => {
                return Err(WireError::InvalidValue("not a control message"));
            }
        })
    }
}
