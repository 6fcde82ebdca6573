use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};

use super::collector::StatsCollector;

/// Default port the debugging visualiser connects to.
pub const DEBUG_STATS_PORT: u16 = 8787;

const FRAME_TEXT: u8 = 1;
const FRAME_BINARY: u8 = 2;

/// One world's stat stream as presented to the bridge each update.
pub struct BridgeWorld<'a> {
    pub thin_client: bool,
    pub collector: &'a mut StatsCollector,
}

/// Local socket bridge multiplexing per-world stat streams to a single
/// visualiser connection.
///
/// Frames are `[u8 opcode][u32 length][payload]`: opcode 1 is a text frame
/// (name tables), opcode 2 a binary frame (per-tick stats, whose first four
/// bytes are the collection tick and fifth the stat index of the source
/// world).
pub struct DebugStatsBridge {
    listener: TcpListener,
    client: Option<TcpStream>,
    outbox: Vec<u8>,
    next_stat_index: i32,
}

impl DebugStatsBridge {
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            client: None,
            outbox: Vec::new(),
            next_stat_index: 0,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// One bridge update: accept/teardown the visualiser connection, bind
    /// any new world streams, then drain every collector queue into the
    /// socket.
    pub fn update(&mut self, worlds: &mut [BridgeWorld<'_>]) {
        self.accept_pending(worlds);

        if self.client.is_none() {
            return;
        }

        for world in worlds.iter_mut() {
            if world.thin_client {
                continue;
            }
            if world.collector.stat_index() < 0 {
                world.collector.bind(self.next_stat_index);
                self.next_stat_index += 1;
            }
            while let Some(packet) = world.collector.pop_packet() {
                let opcode = if packet.is_string { FRAME_TEXT } else { FRAME_BINARY };
                self.outbox.push(opcode);
                self.outbox
                    .extend_from_slice(&(packet.data.len() as u32).to_le_bytes());
                self.outbox.extend_from_slice(&packet.data);
                world.collector.recycle(packet);
            }
        }

        if let Err(err) = self.flush() {
            log::info!("debug bridge client dropped: {err}");
            self.disconnect(worlds);
        }
    }

    fn accept_pending(&mut self, worlds: &mut [BridgeWorld<'_>]) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.client.is_some() {
                        // One visualiser at a time; surplus connections are
                        // dropped on the floor.
                        continue;
                    }
                    if stream.set_nonblocking(true).is_err() {
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    log::info!("debug bridge client connected from {addr}");
                    self.client = Some(stream);
                    self.outbox.clear();
                    self.next_stat_index = 0;
                    for world in worlds.iter_mut() {
                        // Stream indices restart per connection.
                        if world.collector.stat_index() >= 0 {
                            world.collector.unbind();
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }

        // A closed peer surfaces as EOF on read.
        if let Some(stream) = &mut self.client {
            let mut probe = [0u8; 64];
            match stream.read(&mut probe) {
                Ok(0) => {
                    log::info!("debug bridge client disconnected");
                    self.disconnect(worlds);
                }
                Ok(_) => {} // Control channel input is ignored.
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(_) => self.disconnect(worlds),
            }
        }
    }

    fn disconnect(&mut self, worlds: &mut [BridgeWorld<'_>]) {
        self.client = None;
        self.outbox.clear();
        for world in worlds.iter_mut() {
            world.collector.unbind();
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let Some(stream) = &mut self.client else {
            return Ok(());
        };
        while !self.outbox.is_empty() {
            match stream.write(&self.outbox) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "socket closed"));
                }
                Ok(written) => {
                    self.outbox.drain(..written);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
