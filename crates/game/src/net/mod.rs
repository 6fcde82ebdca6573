mod conditioner;
mod connection;
mod datagram;
mod endpoint;
mod time;

pub use conditioner::{DelayQueue, LinkConditioner, rand_u64};
pub use connection::{
    Connection, ConnectionManager, ConnectionState, NetworkId, NetworkSnapshotAck,
};
pub use datagram::{
    COMMAND_HEADER_BYTES, CommandHeader, ControlMessage, DEFAULT_PORT, DEFAULT_TICK_RATE, MTU,
    MAX_TRANSPORT_HEADER, OutgoingDatagram, PipelineKind, ProtocolId, SnapshotGhost,
    SnapshotMessage, select_pipeline,
};
pub use endpoint::{EndpointStats, UdpEndpoint};
pub use time::NetworkTime;
