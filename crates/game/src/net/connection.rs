use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::ghost::EntityId;
use crate::tick::NetworkTick;

use super::datagram::OutgoingDatagram;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

// RTT estimator constants, RFC 6298 style.
const RTT_ALPHA: f32 = 0.125;
const RTT_BETA: f32 = 0.25;

/// Identity of one remote peer; assigned by the server, never 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkId(u32);

impl NetworkId {
    pub fn new(id: u32) -> Self {
        debug_assert_ne!(id, 0);
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Challenged,
    Connected,
}

/// Snapshot receipt and time-sync state carried per connection. The mask
/// covers the 32 ticks preceding `last_received_snapshot`; command age is
/// fixed-point with 8 fractional bits.
#[derive(Debug, Clone)]
pub struct NetworkSnapshotAck {
    pub last_received_snapshot: NetworkTick,
    pub received_mask: u32,
    pub remote_time: u32,
    pub local_time_at_receipt: u32,
    pub estimated_rtt: f32,
    pub estimated_jitter: f32,
    pub server_command_age: i32,
}

impl Default for NetworkSnapshotAck {
    fn default() -> Self {
        Self {
            last_received_snapshot: NetworkTick::INVALID,
            received_mask: 0,
            remote_time: 0,
            local_time_at_receipt: 0,
            estimated_rtt: 100.0,
            estimated_jitter: 50.0,
            server_command_age: 0,
        }
    }
}

impl NetworkSnapshotAck {
    /// Records receipt of a snapshot tick, shifting the 32-tick mask.
    /// Returns false for duplicates.
    pub fn record_snapshot(&mut self, tick: NetworkTick) -> bool {
        if !tick.is_valid() {
            return false;
        }
        if !self.last_received_snapshot.is_valid() {
            self.last_received_snapshot = tick;
            self.received_mask = 1;
            return true;
        }
        if tick.is_newer_than(self.last_received_snapshot) {
            let diff = tick.ticks_since(self.last_received_snapshot) as u32;
            self.received_mask = if diff < 32 {
                (self.received_mask << diff) | 1
            } else {
                1
            };
            self.last_received_snapshot = tick;
            return true;
        }
        let diff = self.last_received_snapshot.ticks_since(tick);
        if diff > 0 && diff < 32 {
            let bit = 1u32 << diff;
            if self.received_mask & bit != 0 {
                return false;
            }
            self.received_mask |= bit;
            return true;
        }
        false
    }

    /// Captures the remote clock for later echoing.
    pub fn record_remote_time(&mut self, remote_time: u32, local_now: u32) {
        self.remote_time = remote_time;
        self.local_time_at_receipt = local_now;
    }

    /// The remote timestamp advanced by our local hold time, so the peer can
    /// subtract it from its clock to sample RTT.
    pub fn echo_time(&self, local_now: u32) -> u32 {
        if self.remote_time == 0 {
            return 0;
        }
        self.remote_time
            .wrapping_add(local_now.wrapping_sub(self.local_time_at_receipt))
    }

    pub fn update_rtt(&mut self, sample_ms: f32) {
        let diff = (sample_ms - self.estimated_rtt).abs();
        self.estimated_jitter = (1.0 - RTT_BETA) * self.estimated_jitter + RTT_BETA * diff;
        self.estimated_rtt = (1.0 - RTT_ALPHA) * self.estimated_rtt + RTT_ALPHA * sample_ms;
    }

    /// Command age in ticks as a float (the stored value is /256 fixed
    /// point).
    pub fn command_age_ticks(&self) -> f32 {
        self.server_command_age as f32 / 256.0
    }
}

#[derive(Debug)]
pub struct Connection {
    pub network_id: NetworkId,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    pub client_salt: u64,
    pub server_salt: u64,
    pub ack: NetworkSnapshotAck,
    /// Explicit command routing fallback, used when a payload carries
    /// ghost id 0.
    pub command_target: Option<EntityId>,
    /// The player ghost spawned for this connection (server side).
    pub player_entity: Option<EntityId>,
    pub last_receive_time: Instant,
    incoming: Vec<Vec<u8>>,
    outgoing: Vec<OutgoingDatagram>,
}

impl Connection {
    pub fn new(addr: SocketAddr, network_id: NetworkId, client_salt: u64) -> Self {
        Self {
            network_id,
            addr,
            state: ConnectionState::Connecting,
            client_salt,
            server_salt: super::conditioner::rand_u64(),
            ack: NetworkSnapshotAck::default(),
            command_target: None,
            player_entity: None,
            last_receive_time: Instant::now(),
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    pub fn combined_salt(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn push_incoming(&mut self, datagram: Vec<u8>) {
        self.incoming.push(datagram);
    }

    /// Drains this frame's received command datagrams. Called exactly once
    /// per frame; the buffer is left empty either way.
    pub fn take_incoming(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.incoming)
    }

    pub fn queue_datagram(&mut self, data: Vec<u8>) {
        self.outgoing.push(OutgoingDatagram::new(data));
    }

    pub fn take_outgoing(&mut self) -> Vec<OutgoingDatagram> {
        std::mem::take(&mut self.outgoing)
    }

    /// Drops buffered traffic in both directions (disconnect path).
    pub fn clear_buffers(&mut self) {
        self.incoming.clear();
        self.outgoing.clear();
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    by_addr: HashMap<SocketAddr, u32>,
    connections: HashMap<u32, Connection>,
    next_network_id: u32,
    max_connections: usize,
    timeout: Duration,
}

impl ConnectionManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            by_addr: HashMap::new(),
            connections: HashMap::new(),
            next_network_id: 1,
            max_connections,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(max_connections: usize, timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::new(max_connections)
        }
    }

    pub fn get_or_create_pending(
        &mut self,
        addr: SocketAddr,
        client_salt: u64,
    ) -> Result<&mut Connection, &'static str> {
        if let Some(&id) = self.by_addr.get(&addr) {
            return Ok(self.connections.get_mut(&id).unwrap());
        }

        if self.connections.len() >= self.max_connections {
            return Err("server full");
        }

        let network_id = NetworkId::new(self.next_network_id);
        self.next_network_id += 1;

        let connection = Connection::new(addr, network_id, client_salt);
        self.connections.insert(network_id.get(), connection);
        self.by_addr.insert(addr, network_id.get());
        Ok(self.connections.get_mut(&network_id.get()).unwrap())
    }

    pub fn get(&self, id: NetworkId) -> Option<&Connection> {
        self.connections.get(&id.get())
    }

    pub fn get_mut(&mut self, id: NetworkId) -> Option<&mut Connection> {
        self.connections.get_mut(&id.get())
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&Connection> {
        self.by_addr.get(addr).and_then(|id| self.connections.get(id))
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut Connection> {
        if let Some(&id) = self.by_addr.get(addr) {
            self.connections.get_mut(&id)
        } else {
            None
        }
    }

    pub fn remove(&mut self, id: NetworkId) -> Option<Connection> {
        if let Some(mut conn) = self.connections.remove(&id.get()) {
            self.by_addr.remove(&conn.addr);
            conn.clear_buffers();
            Some(conn)
        } else {
            None
        }
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<Connection> {
        if let Some(id) = self.by_addr.get(addr).copied() {
            self.remove(NetworkId::new(id))
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    /// Removes and returns every connection that exceeded the receive
    /// timeout, so callers can tear down whatever the connection owned.
    pub fn cleanup_timed_out(&mut self) -> Vec<Connection> {
        let timed_out: Vec<NetworkId> = self
            .connections
            .values()
            .filter(|c| c.is_timed_out(self.timeout))
            .map(|c| c.network_id)
            .collect();
        timed_out
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.connections.len()
    }
}
