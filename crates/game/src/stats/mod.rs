mod bridge;
mod collector;
mod packet;

pub use bridge::{BridgeWorld, DEBUG_STATS_PORT, DebugStatsBridge};
pub use collector::{
    GhostMetrics, MAX_FRAME_ENTRIES, STATS_PER_GHOST_TYPE, StatsCollector, TimeSample,
};
pub use packet::{PacketPool, PacketQueue, StatPacket};
