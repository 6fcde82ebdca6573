pub mod command;
pub mod ghost;
pub mod input;
pub mod net;
pub mod physics;
pub mod stats;
pub mod tick;
pub mod timestep;
pub mod wire;

pub use command::{
    CMD_BUFFER_CAP, Command, CommandBuffer, CommandReceivePipeline, CommandRegistry,
    CommandSendPipeline, INPUT_REDUNDANCY, MAX_PAYLOAD_BYTES, resolve_command_target,
    stable_type_hash, update_command_age,
};
pub use ghost::{EntityId, GhostEntity, GhostWorld, SpawnedGhostId};
pub use input::{InputButtons, PlayerInput};
pub use net::{
    CommandHeader, Connection, ConnectionManager, ConnectionState, ControlMessage, DEFAULT_PORT,
    DEFAULT_TICK_RATE, EndpointStats, LinkConditioner, NetworkId, NetworkSnapshotAck, NetworkTime,
    OutgoingDatagram, PipelineKind, ProtocolId, SnapshotGhost, SnapshotMessage, UdpEndpoint,
};
pub use physics::{
    BodyDesc, BuildPhysicsWorld, MultiWorldGroup, PhysicsScene, PhysicsStep, PhysicsWorld,
    PhysicsWorldSingleton, SimulationKind, SimulationSingleton, export_physics_world,
};
pub use stats::{BridgeWorld, DEBUG_STATS_PORT, DebugStatsBridge, StatsCollector, TimeSample};
pub use tick::NetworkTick;
pub use timestep::FixedTimestep;
pub use wire::{ByteReader, ByteWriter, WireError};
