mod buffer;
mod codec;
mod receive;
mod registry;
mod routing;
mod send;

pub use buffer::{CMD_BUFFER_CAP, CommandBuffer};
pub use codec::{
    CodecError, INPUT_REDUNDANCY, MAX_PAYLOAD_BYTES, decode_command_payload,
    encode_command_payload,
};
pub use receive::{CommandReceivePipeline, ReceiveSummary, update_command_age};
pub use registry::{CommandRegistry, stable_type_hash};
pub use routing::resolve_command_target;
pub use send::CommandSendPipeline;

use crate::tick::NetworkTick;
use crate::wire::{ByteReader, ByteWriter, WireError};

/// A small, value-like player input tagged with the tick it is intended to
/// execute on.
///
/// The tick is carried by the transport layout (baseline tick plus packed
/// per-entry deltas), so `encode`/`decode` cover every field except the tick
/// and the codec calls `set_tick` after decoding.
pub trait Command: Copy + PartialEq + Default + 'static {
    /// Stable name hashed into the 64-bit wire identifier. Renaming a type
    /// without keeping this constant breaks wire compatibility.
    const STABLE_NAME: &'static str;

    fn tick(&self) -> NetworkTick;
    fn set_tick(&mut self, tick: NetworkTick);

    fn encode(&self, w: &mut ByteWriter);
    fn encode_delta(&self, w: &mut ByteWriter, baseline: &Self);
    fn decode(r: &mut ByteReader) -> Result<Self, WireError>;
    fn decode_delta(r: &mut ByteReader, baseline: &Self) -> Result<Self, WireError>;
}
