use std::collections::VecDeque;

const INITIAL_PACKET_CAPACITY: usize = 256;

/// One framed message bound for the debug visualiser. Text packets carry the
/// name tables; binary packets carry per-tick stat frames.
#[derive(Debug, Default)]
pub struct StatPacket {
    pub is_string: bool,
    pub data: Vec<u8>,
}

/// Reuse pool for stat packets. Allocation capacity doubles each time the
/// pool has to grow, so steady-state emission never allocates.
#[derive(Debug)]
pub struct PacketPool {
    free: Vec<StatPacket>,
    next_capacity: usize,
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketPool {
    pub fn new() -> Self {
        Self {
            free: Vec::new(),
            next_capacity: INITIAL_PACKET_CAPACITY,
        }
    }

    /// Hands out a cleared packet with at least `min_capacity` bytes of
    /// backing storage.
    pub fn acquire(&mut self, min_capacity: usize) -> StatPacket {
        let mut packet = self.free.pop().unwrap_or_else(|| {
            while self.next_capacity < min_capacity {
                self.next_capacity *= 2;
            }
            StatPacket {
                is_string: false,
                data: Vec::with_capacity(self.next_capacity),
            }
        });
        packet.is_string = false;
        packet.data.clear();
        if packet.data.capacity() < min_capacity {
            packet.data.reserve(min_capacity - packet.data.len());
        }
        packet
    }

    pub fn release(&mut self, mut packet: StatPacket) {
        packet.data.clear();
        self.free.push(packet);
    }
}

/// FIFO of packets awaiting transmission to the visualiser.
#[derive(Debug, Default)]
pub struct PacketQueue {
    packets: VecDeque<StatPacket>,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: StatPacket) {
        self.packets.push_back(packet);
    }

    pub fn pop(&mut self) -> Option<StatPacket> {
        self.packets.pop_front()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn drain_into(&mut self, pool: &mut PacketPool) {
        while let Some(packet) = self.packets.pop_front() {
            pool.release(packet);
        }
    }
}
