use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::conditioner::{DelayQueue, LinkConditioner};
use super::datagram::MTU;

#[derive(Debug, Clone, Default)]
pub struct EndpointStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub datagrams_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Non-blocking UDP endpoint: the unreliable-ordered send/receive primitive
/// everything above is built on. An optional link conditioner drops or
/// delays outgoing datagrams.
pub struct UdpEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
    recv_buffer: [u8; MTU],
    stats: EndpointStats,
    conditioner: Option<LinkConditioner>,
    delayed: DelayQueue,
}

impl UdpEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            remote_addr: None,
            recv_buffer: [0u8; MTU],
            stats: EndpointStats::default(),
            conditioner: None,
            delayed: DelayQueue::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    pub fn set_conditioner(&mut self, conditioner: Option<LinkConditioner>) {
        self.conditioner = conditioner;
    }

    pub fn stats(&self) -> &EndpointStats {
        &self.stats
    }

    pub fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if let Some(conditioner) = &self.conditioner {
            if conditioner.should_drop() {
                self.stats.datagrams_dropped += 1;
                return Ok(data.len());
            }
            let delay = conditioner.delay();
            if !delay.is_zero() {
                self.delayed.push(data.to_vec(), addr, delay);
                return Ok(data.len());
            }
        }
        self.send_now(data, addr)
    }

    pub fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let addr = self
            .remote_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no remote address set"))?;
        self.send_to(data, addr)
    }

    fn send_now(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let bytes = self.socket.send_to(data, addr)?;
        self.stats.datagrams_sent += 1;
        self.stats.bytes_sent += bytes as u64;
        Ok(bytes)
    }

    /// Flushes conditioner-delayed datagrams that are due. Call once per
    /// frame when a conditioner is installed.
    pub fn pump(&mut self) -> io::Result<()> {
        for (data, addr) in self.delayed.take_due() {
            self.send_now(&data, addr)?;
        }
        Ok(())
    }

    /// Drains every datagram waiting on the socket.
    pub fn receive(&mut self) -> io::Result<Vec<(Vec<u8>, SocketAddr)>> {
        let mut datagrams = Vec::new();
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    if size == 0 {
                        continue;
                    }
                    self.stats.datagrams_received += 1;
                    self.stats.bytes_received += size as u64;
                    datagrams.push((self.recv_buffer[..size].to_vec(), addr));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(datagrams)
    }
}
