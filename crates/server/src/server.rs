use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use glam::Vec3;

use ghostwire::physics::{
    ColliderShape, PhysicsCollider, PhysicsMass, PhysicsVelocity, export_physics_world,
};
use ghostwire::stats::TimeSample;
use ghostwire::wire::{ByteReader, ByteWriter};
use ghostwire::{
    BodyDesc, BridgeWorld, BuildPhysicsWorld, Command, CommandReceivePipeline, CommandRegistry,
    Connection, ConnectionManager, ConnectionState, ControlMessage, DebugStatsBridge,
    EndpointStats, FixedTimestep, GhostWorld, NetworkId, NetworkTick, PhysicsScene, PhysicsStep,
    PhysicsWorldSingleton, PlayerInput, ProtocolId, SimulationSingleton, SnapshotGhost,
    SnapshotMessage, StatsCollector, UdpEndpoint, update_command_age,
};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};

pub const GHOST_TYPE_PLAYER: u8 = 0;
pub const GHOST_TYPE_PROP: u8 = 1;

const PROP_BOUNDS: f32 = 20.0;

pub struct GameServer {
    endpoint: UdpEndpoint,
    connections: ConnectionManager,
    config: ServerConfig,
    world: GhostWorld,
    scene: PhysicsScene,
    physics: PhysicsWorldSingleton,
    simulation: SimulationSingleton,
    builder: BuildPhysicsWorld,
    step: PhysicsStep,
    registry: CommandRegistry,
    receive: CommandReceivePipeline,
    stats: StatsCollector,
    bridge: Option<DebugStatsBridge>,
    bridge_was_connected: bool,
    tick: NetworkTick,
    timestep: FixedTimestep,
    last_update: Instant,
    start_time: Instant,
    last_input: HashMap<u32, NetworkTick>,
    running: Arc<AtomicBool>,
    pending_events: VecDeque<ServerEvent>,
}

impl GameServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let mut endpoint = UdpEndpoint::bind(bind_addr)?;
        endpoint.set_conditioner(config.link_conditioner.clone());

        let mut registry = CommandRegistry::new();
        registry.register::<PlayerInput>();

        let mut stats = StatsCollector::new("server");
        stats.set_ghost_names(vec!["Player".into(), "Prop".into()]);

        let bridge = match DebugStatsBridge::bind(config.debug_stats_port) {
            Ok(bridge) => Some(bridge),
            Err(err) => {
                log::warn!(
                    "debug stats bridge unavailable on port {}: {err}",
                    config.debug_stats_port
                );
                None
            }
        };

        let step = PhysicsStep::default();
        let mut server = Self {
            endpoint,
            connections: ConnectionManager::new(config.max_clients),
            world: GhostWorld::new(),
            scene: PhysicsScene::new(),
            physics: PhysicsWorldSingleton::new(0),
            simulation: SimulationSingleton::new(step.simulation),
            builder: BuildPhysicsWorld::new(),
            step,
            registry,
            receive: CommandReceivePipeline::new(),
            stats,
            bridge,
            bridge_was_connected: false,
            tick: NetworkTick::new(1),
            timestep: FixedTimestep::new(config.tick_rate),
            last_update: Instant::now(),
            start_time: Instant::now(),
            last_input: HashMap::new(),
            running: Arc::new(AtomicBool::new(true)),
            pending_events: VecDeque::new(),
            config,
        };
        server.spawn_props();
        Ok(server)
    }

    fn spawn_props(&mut self) {
        for i in 0..self.config.prop_count {
            let (entity, _) = self.world.spawn_ghost(GHOST_TYPE_PROP, self.tick, None);
            let angle = i as f32 / self.config.prop_count.max(1) as f32 * std::f32::consts::TAU;

            let mut desc = BodyDesc::new(entity);
            desc.local_transform.as_mut().unwrap().position =
                Vec3::new(angle.cos() * 8.0, 1.0 + i as f32 * 0.5, angle.sin() * 8.0);
            desc.collider = Some(PhysicsCollider::new(ColliderShape::Box {
                half_extents: Vec3::splat(0.5),
            }));
            desc.velocity = Some(PhysicsVelocity {
                linear: Vec3::new(-angle.sin(), 0.0, angle.cos()) * 2.0,
                angular: Vec3::new(0.0, 0.5, 0.0),
            });
            desc.mass = Some(PhysicsMass::sphere(10.0, 0.5));
            desc.gravity_factor = Some(0.0);
            self.scene.add_body(desc);
        }

        // Static arena floor.
        let floor = self.world.spawn(GHOST_TYPE_PROP);
        let mut desc = BodyDesc::new(floor);
        desc.collider = Some(PhysicsCollider::new(ColliderShape::Box {
            half_extents: Vec3::new(PROP_BOUNDS, 0.1, PROP_BOUNDS),
        }));
        self.scene.add_body(desc);
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn run(&mut self) {
        while self.running.load(std::sync::atomic::Ordering::SeqCst) {
            self.update();
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        self.shutdown_connections();
    }

    /// One outer-loop iteration: network in, zero or more fixed ticks,
    /// bridge out.
    pub fn update(&mut self) {
        let now = Instant::now();
        let delta = (now - self.last_update).as_secs_f32();
        self.last_update = now;

        if let Err(err) = self.process_network() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("network error: {err}"),
            });
        }

        self.timestep.accumulate(delta);
        while self.timestep.consume_tick() {
            self.tick();
        }

        self.update_bridge();
        let _ = self.endpoint.pump();
    }

    fn tick(&mut self) {
        self.tick = self.tick.increment();
        let tick = self.tick;
        self.stats.advance_tick(tick);
        let now_ms = self.elapsed_ms();

        // Command receive, per connection.
        for conn in self.connections.iter_mut() {
            if conn.state != ConnectionState::Connected {
                continue;
            }
            let summary = self.receive.process_connection(
                &self.registry,
                &mut self.world,
                conn,
                tick,
                now_ms,
            );
            if summary.bytes > 0 {
                self.stats.add_command_stats(tick, summary.bytes);
            }
            if summary.discarded > 0 {
                self.stats.add_discarded_packets(summary.discarded);
            }
        }

        self.apply_player_inputs();
        self.wrap_props();

        // Physics: build, simulate, export.
        self.simulation.ensure_kind(self.step.simulation);
        self.builder
            .run(&self.scene, &mut self.physics, &self.step, false);
        self.simulation
            .step(&mut self.physics.world, &self.step, self.timestep.dt());
        export_physics_world(&mut self.builder, &self.physics, &mut self.scene);

        self.broadcast_snapshots(now_ms);

        // End-of-frame ack bookkeeping and per-connection time samples.
        let fraction = self.timestep.alpha();
        let mut samples = Vec::new();
        for conn in self.connections.iter_mut() {
            if conn.state != ConnectionState::Connected {
                continue;
            }
            update_command_age(conn, tick);
            let age = if conn.ack.last_received_snapshot.is_valid() {
                tick.ticks_since(conn.ack.last_received_snapshot) as f32
            } else {
                0.0
            };
            let delay = self
                .world
                .get(conn.player_entity.unwrap_or(0))
                .and_then(|g| g.interpolation_delay)
                .unwrap_or(0) as f32;
            samples.push(TimeSample {
                fraction,
                timescale: 1.0,
                interpolation_offset: delay,
                interpolation_scale: 1.0,
                command_age: conn.ack.command_age_ticks(),
                rtt: conn.ack.estimated_rtt,
                jitter: conn.ack.estimated_jitter,
                snapshot_age_min: age,
                snapshot_age_max: age,
            });
        }
        for sample in samples {
            self.stats.add_time_sample(sample);
        }

        for conn in self.connections.cleanup_timed_out() {
            self.despawn_player_entity(&conn);
            self.pending_events
                .push_back(ServerEvent::ClientDisconnected {
                    network_id: conn.network_id.get(),
                    reason: DisconnectReason::Timeout,
                });
        }
    }

    fn apply_player_inputs(&mut self) {
        let tick = self.tick;
        let mut moves = Vec::new();
        for conn in self.connections.iter() {
            if conn.state != ConnectionState::Connected {
                continue;
            }
            let Some(entity) = conn.player_entity else {
                continue;
            };
            let Some(buffer) = self.world.command_buffer::<PlayerInput>(entity) else {
                continue;
            };
            if let Some(input) = buffer.get_at(tick) {
                moves.push((conn.network_id.get(), entity, *input));
            }
        }

        for (network_id, entity, input) in moves {
            self.last_input.insert(network_id, input.tick());
            let Some(desc) = self.scene.get(entity) else {
                continue;
            };
            let transform = desc.local_transform.unwrap_or_default();
            let mut orientation = transform.rotation;
            let mut velocity = desc.velocity.unwrap_or_default().linear;
            input.steer(&mut orientation, &mut velocity, self.config.move_speed);
            self.scene.write_motion(
                entity,
                transform.position,
                orientation,
                Some(PhysicsVelocity {
                    linear: velocity,
                    angular: Vec3::ZERO,
                }),
            );
        }
    }

    /// Keeps the drifting props inside the arena by reflecting their
    /// velocity at the bounds.
    fn wrap_props(&mut self) {
        let mut updates = Vec::new();
        for body in self.scene.bodies() {
            let Some(transform) = body.local_transform else {
                continue;
            };
            let Some(velocity) = body.velocity else {
                continue;
            };
            let p = transform.position;
            if p.x.abs() > PROP_BOUNDS || p.z.abs() > PROP_BOUNDS {
                let mut v = velocity.linear;
                if p.x.abs() > PROP_BOUNDS {
                    v.x = -v.x;
                }
                if p.z.abs() > PROP_BOUNDS {
                    v.z = -v.z;
                }
                updates.push((body.entity, transform, velocity, v));
            }
        }
        for (entity, transform, velocity, v) in updates {
            self.scene.write_motion(
                entity,
                transform.position,
                transform.rotation,
                Some(PhysicsVelocity {
                    linear: v,
                    angular: velocity.angular,
                }),
            );
        }
    }

    fn broadcast_snapshots(&mut self, now_ms: u32) {
        let tick = self.tick;

        let mut ghosts = Vec::new();
        for entity in self.world.entities() {
            let Some(ghost) = entity.ghost else {
                continue;
            };
            let Some(desc) = self.scene.get(entity.id) else {
                continue;
            };
            let transform = desc.local_transform.unwrap_or_default();
            ghosts.push(SnapshotGhost {
                ghost,
                ghost_type: entity.ghost_type,
                position: transform.position,
                velocity: desc.velocity.unwrap_or_default().linear,
            });
        }

        let targets: Vec<(SocketAddr, u32)> = self
            .connections
            .iter()
            .filter(|c| c.state == ConnectionState::Connected)
            .map(|c| (c.addr, c.network_id.get()))
            .collect();

        let mut per_type_bytes = [0u32; 2];
        let mut per_type_count = [0u32; 2];
        for ghost in &ghosts {
            let index = (ghost.ghost_type as usize).min(1);
            per_type_count[index] += 1;
            // 9-byte identity plus two packed vectors.
            per_type_bytes[index] += 9 + 24;
        }

        for (addr, network_id) in &targets {
            let message = SnapshotMessage {
                tick,
                server_time_ms: now_ms,
                last_processed_input_tick: self
                    .last_input
                    .get(network_id)
                    .copied()
                    .unwrap_or(NetworkTick::INVALID),
                ghosts: ghosts.clone(),
            };
            let mut w = ByteWriter::with_capacity(64 + ghosts.len() * 33);
            message.write(&mut w);
            if let Err(err) = self.endpoint.send_to(w.as_slice(), *addr) {
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!("snapshot send to {addr} failed: {err}"),
                });
            }
        }

        if !targets.is_empty() {
            let triples = [
                per_type_count[0],
                per_type_bytes[0] * 8,
                1,
                per_type_count[1],
                per_type_bytes[1] * 8,
                1,
            ];
            self.stats.add_snapshot_stats(tick, &triples);
        }
    }

    fn process_network(&mut self) -> io::Result<()> {
        for (datagram, addr) in self.endpoint.receive()? {
            self.handle_datagram(datagram, addr)?;
        }
        Ok(())
    }

    fn handle_datagram(&mut self, datagram: Vec<u8>, addr: SocketAddr) -> io::Result<()> {
        let Some(&proto_byte) = datagram.first() else {
            return Ok(());
        };
        let Some(proto) = ProtocolId::from_u8(proto_byte) else {
            return Ok(());
        };

        match proto {
            ProtocolId::Command => {
                if let Some(conn) = self.connections.get_by_addr_mut(&addr) {
                    if conn.state == ConnectionState::Connected {
                        conn.push_incoming(datagram);
                    }
                }
                return Ok(());
            }
            ProtocolId::Snapshot | ProtocolId::Challenge | ProtocolId::Welcome => {
                // Server-to-client traffic; ignore if echoed back.
                return Ok(());
            }
            _ => {}
        }

        let mut r = ByteReader::new(&datagram[1..]);
        let Ok(message) = ControlMessage::read(proto, &mut r) else {
            return Ok(());
        };

        match message {
            ControlMessage::Hello { client_salt } => {
                self.handle_hello(addr, client_salt)?;
            }
            ControlMessage::ChallengeReply { combined_salt } => {
                self.handle_challenge_reply(addr, combined_salt)?;
            }
            ControlMessage::Disconnect => {
                if let Some(conn) = self.connections.remove_by_addr(&addr) {
                    self.despawn_player_entity(&conn);
                    self.pending_events
                        .push_back(ServerEvent::ClientDisconnected {
                            network_id: conn.network_id.get(),
                            reason: DisconnectReason::Graceful,
                        });
                }
            }
            _ => {}
        }

        if let Some(conn) = self.connections.get_by_addr_mut(&addr) {
            conn.touch();
        }
        Ok(())
    }

    fn handle_hello(&mut self, addr: SocketAddr, client_salt: u64) -> io::Result<()> {
        self.pending_events
            .push_back(ServerEvent::ClientConnecting { addr });

        let conn = match self.connections.get_or_create_pending(addr, client_salt) {
            Ok(conn) => conn,
            Err(reason) => {
                let mut w = ByteWriter::new();
                ControlMessage::Denied {
                    reason: reason.to_string(),
                }
                .write(&mut w);
                self.endpoint.send_to(w.as_slice(), addr)?;
                self.pending_events.push_back(ServerEvent::ConnectionDenied {
                    addr,
                    reason: reason.to_string(),
                });
                return Ok(());
            }
        };

        let server_salt = conn.server_salt;
        conn.state = ConnectionState::Challenged;
        let mut w = ByteWriter::new();
        ControlMessage::Challenge { server_salt }.write(&mut w);
        self.endpoint.send_to(w.as_slice(), addr)?;
        Ok(())
    }

    fn handle_challenge_reply(&mut self, addr: SocketAddr, combined_salt: u64) -> io::Result<()> {
        let (network_id, existing) = {
            let Some(conn) = self.connections.get_by_addr_mut(&addr) else {
                return Ok(());
            };
            if combined_salt != conn.combined_salt() {
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!("invalid challenge reply from {addr}"),
                });
                return Ok(());
            }
            // A duplicate reply just re-sends the welcome.
            conn.state = ConnectionState::Connected;
            (conn.network_id, conn.player_entity)
        };

        let (entity, ghost) = match existing {
            Some(entity) => (entity, self.world.get(entity).unwrap().ghost.unwrap()),
            None => self.spawn_player(network_id),
        };

        let conn = self.connections.get_by_addr_mut(&addr).unwrap();
        conn.player_entity = Some(entity);
        conn.command_target = Some(entity);

        let mut w = ByteWriter::new();
        ControlMessage::Welcome {
            network_id: network_id.get(),
            ghost_id: ghost.ghost_id,
            spawn_tick: ghost.spawn_tick,
            tick_rate: self.config.tick_rate,
        }
        .write(&mut w);
        self.endpoint.send_to(w.as_slice(), addr)?;

        self.pending_events.push_back(ServerEvent::ClientConnected {
            network_id: network_id.get(),
            addr,
            ghost_id: ghost.ghost_id,
        });
        Ok(())
    }

    fn spawn_player(&mut self, owner: NetworkId) -> (ghostwire::EntityId, ghostwire::SpawnedGhostId) {
        let (entity, ghost) = self
            .world
            .spawn_ghost(GHOST_TYPE_PLAYER, self.tick, Some(owner));
        {
            let player = self.world.get_mut(entity).unwrap();
            player.auto_command_target = true;
            player.interpolation_delay = Some(0);
        }
        self.world.attach_command_buffer::<PlayerInput>(entity);

        // Players are kinematic capsules steered by their command stream.
        let mut desc = BodyDesc::new(entity);
        desc.local_transform.as_mut().unwrap().position = Vec3::new(0.0, 1.0, 0.0);
        desc.collider = Some(PhysicsCollider::new(ColliderShape::Capsule {
            radius: 0.3,
            half_height: 0.6,
        }));
        desc.velocity = Some(PhysicsVelocity::default());
        self.scene.add_body(desc);

        (entity, ghost)
    }

    fn despawn_player(&mut self, network_id: NetworkId) {
        let entity = self
            .connections
            .get(network_id)
            .and_then(|c| c.player_entity);
        if let Some(entity) = entity {
            self.scene.remove_body(entity);
            self.world.despawn(entity);
        }
        self.last_input.remove(&network_id.get());
    }

    fn despawn_player_entity(&mut self, conn: &Connection) {
        if let Some(entity) = conn.player_entity {
            self.scene.remove_body(entity);
            self.world.despawn(entity);
        }
        self.last_input.remove(&conn.network_id.get());
    }

    fn update_bridge(&mut self) {
        let Some(bridge) = &mut self.bridge else {
            return;
        };
        let mut worlds = [BridgeWorld {
            thin_client: false,
            collector: &mut self.stats,
        }];
        bridge.update(&mut worlds);

        if bridge.is_connected() && !self.bridge_was_connected {
            self.pending_events.push_back(ServerEvent::DebuggerAttached);
        }
        self.bridge_was_connected = bridge.is_connected();
    }

    pub fn shutdown_connections(&mut self) {
        let ids: Vec<NetworkId> = self.connections.iter().map(|c| c.network_id).collect();
        for id in ids {
            self.kick_client(id);
        }
    }

    pub fn kick_client(&mut self, network_id: NetworkId) {
        if let Some(conn) = self.connections.get(network_id) {
            let addr = conn.addr;
            let mut w = ByteWriter::new();
            ControlMessage::Disconnect.write(&mut w);
            let _ = self.endpoint.send_to(w.as_slice(), addr);
        }
        self.despawn_player(network_id);
        if self.connections.remove(network_id).is_some() {
            self.pending_events
                .push_back(ServerEvent::ClientDisconnected {
                    network_id: network_id.get(),
                    reason: DisconnectReason::Kicked,
                });
        }
    }

    fn elapsed_ms(&self) -> u32 {
        self.start_time.elapsed().as_millis() as u32
    }

    pub fn stats_snapshot(&self) -> ServerStats {
        let mut rtt_sum = 0.0;
        let mut age_sum = 0.0;
        let mut connected = 0usize;
        for conn in self.connections.iter() {
            if conn.state == ConnectionState::Connected {
                connected += 1;
                rtt_sum += conn.ack.estimated_rtt;
                age_sum += conn.ack.command_age_ticks();
            }
        }
        let divisor = connected.max(1) as f32;

        ServerStats {
            tick: self.tick,
            uptime_secs: self.start_time.elapsed().as_secs(),
            client_count: connected,
            max_clients: self.config.max_clients,
            ghost_count: self.world.entity_count(),
            body_count: self.physics.world.num_bodies(),
            avg_rtt_ms: rtt_sum / divisor,
            avg_command_age: age_sum / divisor,
            debugger_attached: self
                .bridge
                .as_ref()
                .is_some_and(|b| b.is_connected()),
            endpoint: self.endpoint.stats().clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: NetworkTick,
    pub uptime_secs: u64,
    pub client_count: usize,
    pub max_clients: usize,
    pub ghost_count: usize,
    pub body_count: usize,
    pub avg_rtt_ms: f32,
    pub avg_command_age: f32,
    pub debugger_attached: bool,
    pub endpoint: EndpointStats,
}
