use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use ghostwire::stats::TimeSample;
use ghostwire::wire::{ByteReader, ByteWriter};
use ghostwire::net::rand_u64;
use ghostwire::{
    BridgeWorld, CommandRegistry, CommandSendPipeline, Connection, ConnectionState,
    ControlMessage, DebugStatsBridge, EntityId, FixedTimestep, GhostWorld, NetworkId, NetworkTick,
    NetworkTime, PlayerInput, ProtocolId, SnapshotMessage, SpawnedGhostId, StatsCollector,
    UdpEndpoint,
};

use crate::bot::BotDriver;
use crate::prediction::Prediction;

const HELLO_RETRY: Duration = Duration::from_millis(500);
const NUM_LOADED_PREFABS: u32 = 2;

pub struct ClientConfig {
    pub server: SocketAddr,
    pub move_speed: f32,
    pub debug_stats_port: Option<u16>,
}

/// Headless game client: performs the handshake, synchronises its clock to
/// server snapshots, predicts the local player, and ships the redundant
/// command stream every tick.
pub struct GameClient {
    endpoint: UdpEndpoint,
    config: ClientConfig,
    state: ConnectionState,
    client_salt: u64,
    hello_sent_at: Option<Instant>,
    last_hello: Instant,
    connection: Option<Connection>,
    world: GhostWorld,
    registry: CommandRegistry,
    send_pipeline: CommandSendPipeline,
    time: NetworkTime,
    timestep: Option<FixedTimestep>,
    player_entity: Option<EntityId>,
    own_ghost: Option<SpawnedGhostId>,
    prediction: Option<Prediction>,
    bot: BotDriver,
    stats: StatsCollector,
    bridge: Option<DebugStatsBridge>,
    start: Instant,
    snapshots_received: u64,
    last_prediction_error: f32,
}

impl GameClient {
    pub fn connect(config: ClientConfig, bot: BotDriver) -> io::Result<Self> {
        let mut endpoint = UdpEndpoint::bind("0.0.0.0:0")?;
        endpoint.set_remote(config.server);

        let mut registry = CommandRegistry::new();
        registry.register::<PlayerInput>();

        let mut stats = StatsCollector::new("client");
        stats.set_ghost_names(vec!["Player".into(), "Prop".into()]);
        stats.set_prediction_error_names(vec!["Position".into(), "Velocity".into()]);

        let bridge = match config.debug_stats_port {
            Some(port) => match DebugStatsBridge::bind(port) {
                Ok(bridge) => Some(bridge),
                Err(err) => {
                    log::warn!("debug stats bridge unavailable on port {port}: {err}");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            endpoint,
            state: ConnectionState::Disconnected,
            client_salt: rand_u64(),
            hello_sent_at: None,
            last_hello: Instant::now() - HELLO_RETRY,
            connection: None,
            world: GhostWorld::new(),
            registry,
            send_pipeline: CommandSendPipeline::new(),
            time: NetworkTime::new(ghostwire::DEFAULT_TICK_RATE),
            timestep: None,
            player_entity: None,
            own_ghost: None,
            prediction: None,
            bot,
            stats,
            bridge,
            start: Instant::now(),
            snapshots_received: 0,
            last_prediction_error: 0.0,
            config,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn snapshots_received(&self) -> u64 {
        self.snapshots_received
    }

    pub fn last_prediction_error(&self) -> f32 {
        self.last_prediction_error
    }

    pub fn predicted_tick(&self) -> NetworkTick {
        self.time.input_target_tick()
    }

    pub fn rtt_ms(&self) -> f32 {
        self.connection
            .as_ref()
            .map_or(0.0, |c| c.ack.estimated_rtt)
    }

    pub fn update(&mut self, delta: f32) -> io::Result<()> {
        self.drive_handshake()?;
        self.process_network()?;

        if self.is_connected() && self.time.is_synchronized() {
            if let Some(timestep) = &mut self.timestep {
                timestep.accumulate(delta);
            }
            while self
                .timestep
                .as_mut()
                .is_some_and(|ts| ts.consume_tick())
            {
                self.tick()?;
            }
        }

        self.update_bridge();
        self.endpoint.pump()?;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            let mut w = ByteWriter::new();
            ControlMessage::Disconnect.write(&mut w);
            let _ = self.endpoint.send(w.as_slice());
            self.state = ConnectionState::Disconnected;
        }
    }

    fn drive_handshake(&mut self) -> io::Result<()> {
        match self.state {
            ConnectionState::Disconnected => {
                self.send_hello()?;
                self.state = ConnectionState::Connecting;
            }
            ConnectionState::Connecting if self.last_hello.elapsed() > HELLO_RETRY => {
                self.send_hello()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn send_hello(&mut self) -> io::Result<()> {
        let mut w = ByteWriter::new();
        ControlMessage::Hello {
            client_salt: self.client_salt,
        }
        .write(&mut w);
        self.endpoint.send(w.as_slice())?;
        self.last_hello = Instant::now();
        if self.hello_sent_at.is_none() {
            self.hello_sent_at = Some(Instant::now());
        }
        Ok(())
    }

    fn process_network(&mut self) -> io::Result<()> {
        for (datagram, addr) in self.endpoint.receive()? {
            if addr != self.config.server {
                continue;
            }
            let Some(&proto_byte) = datagram.first() else {
                continue;
            };
            let Some(proto) = ProtocolId::from_u8(proto_byte) else {
                continue;
            };
            let mut r = ByteReader::new(&datagram[1..]);

            match proto {
                ProtocolId::Snapshot => {
                    if let Ok(message) = SnapshotMessage::read(&mut r) {
                        self.handle_snapshot(message);
                    }
                }
                ProtocolId::Challenge | ProtocolId::Welcome | ProtocolId::Denied
                | ProtocolId::Disconnect => {
                    if let Ok(message) = ControlMessage::read(proto, &mut r) {
                        self.handle_control(message)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_control(&mut self, message: ControlMessage) -> io::Result<()> {
        match message {
            ControlMessage::Challenge { server_salt } => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Challenged;
                }
                let mut w = ByteWriter::new();
                ControlMessage::ChallengeReply {
                    combined_salt: self.client_salt ^ server_salt,
                }
                .write(&mut w);
                self.endpoint.send(w.as_slice())?;
            }
            ControlMessage::Welcome {
                network_id,
                ghost_id,
                spawn_tick,
                tick_rate,
            } => {
                if self.state != ConnectionState::Connected {
                    self.finish_handshake(network_id, ghost_id, spawn_tick, tick_rate);
                }
            }
            ControlMessage::Denied { reason } => {
                log::warn!("connection denied: {reason}");
                self.state = ConnectionState::Disconnected;
            }
            ControlMessage::Disconnect => {
                log::info!("server closed the connection");
                self.state = ConnectionState::Disconnected;
            }
            _ => {}
        }
        Ok(())
    }

    fn finish_handshake(
        &mut self,
        network_id: u32,
        ghost_id: i32,
        spawn_tick: NetworkTick,
        tick_rate: u32,
    ) {
        let network_id = NetworkId::new(network_id);
        let mut connection = Connection::new(self.config.server, network_id, self.client_salt);
        connection.state = ConnectionState::Connected;
        if let Some(sent) = self.hello_sent_at {
            connection
                .ack
                .update_rtt(sent.elapsed().as_secs_f32() * 1000.0);
        }

        let ghost = SpawnedGhostId {
            ghost_id,
            spawn_tick,
        };
        let entity = self
            .world
            .insert_ghost(ghost, crate::GHOST_TYPE_PLAYER, Some(network_id));
        self.world.get_mut(entity).unwrap().auto_command_target = true;
        self.world.attach_command_buffer::<PlayerInput>(entity);
        connection.command_target = Some(entity);

        self.time = NetworkTime::new(tick_rate);
        self.timestep = Some(FixedTimestep::new(tick_rate));
        self.prediction = Some(Prediction::new(self.config.move_speed, tick_rate));
        self.player_entity = Some(entity);
        self.own_ghost = Some(ghost);
        self.connection = Some(connection);
        self.state = ConnectionState::Connected;

        log::info!(
            "connected as client {} (ghost {ghost_id}, tick rate {tick_rate})",
            network_id.get()
        );
    }

    fn handle_snapshot(&mut self, message: SnapshotMessage) {
        let Some(connection) = &mut self.connection else {
            return;
        };
        self.snapshots_received += 1;
        let now_ms = self.start.elapsed().as_millis() as u32;

        if connection.ack.record_snapshot(message.tick) {
            connection.ack.record_remote_time(message.server_time_ms, now_ms);
        }
        self.time
            .observe_snapshot(message.tick, connection.ack.estimated_rtt);

        // Prediction reconciliation against our own ghost.
        let (Some(own), Some(prediction), Some(entity)) = (
            self.own_ghost,
            self.prediction.as_mut(),
            self.player_entity,
        ) else {
            return;
        };
        let Some(snapshot_ghost) = message.ghosts.iter().find(|g| g.ghost == own) else {
            return;
        };
        let Some(buffer) = self.world.command_buffer::<PlayerInput>(entity) else {
            return;
        };
        let compare_tick = if message.last_processed_input_tick.is_valid() {
            message.last_processed_input_tick
        } else {
            message.tick
        };
        if let Some(errors) = prediction.reconcile(
            compare_tick,
            snapshot_ghost.position,
            snapshot_ghost.velocity,
            buffer,
        ) {
            self.last_prediction_error = errors[0];
            self.stats.add_prediction_error_stats(&errors);
        }
    }

    fn tick(&mut self) -> io::Result<()> {
        self.time.advance_tick();
        let alpha = self.timestep.as_ref().map_or(0.0, |ts| ts.alpha());
        self.time.set_fractions(alpha, alpha);

        let target = self.time.input_target_tick();
        if !target.is_valid() {
            return Ok(());
        }
        self.stats.advance_tick(target);

        let (Some(entity), Some(connection)) = (self.player_entity, self.connection.as_mut())
        else {
            return Ok(());
        };

        let input = self.bot.sample(target);
        if let Some(buffer) = self.world.command_buffer_mut::<PlayerInput>(entity) {
            buffer.add(input);
        }
        if let Some(prediction) = self.prediction.as_mut() {
            prediction.advance(&input, target);
        }

        let now_ms = self.start.elapsed().as_millis() as u32;
        if let Some(bytes) = self.send_pipeline.run(
            &self.world,
            &self.registry,
            connection,
            &self.time,
            now_ms,
            NUM_LOADED_PREFABS,
        ) {
            self.stats.add_command_stats(target, bytes as u32);
            for datagram in connection.take_outgoing() {
                self.endpoint.send(&datagram.data)?;
            }
        }

        let snapshot_age = if connection.ack.last_received_snapshot.is_valid() {
            target.ticks_since(connection.ack.last_received_snapshot) as f32
        } else {
            0.0
        };
        let sample = TimeSample {
            fraction: alpha,
            timescale: 1.0,
            interpolation_offset: self.time.interpolation_delay_ticks() as f32,
            interpolation_scale: 1.0,
            command_age: 0.0,
            rtt: connection.ack.estimated_rtt,
            jitter: connection.ack.estimated_jitter,
            snapshot_age_min: snapshot_age,
            snapshot_age_max: snapshot_age,
        };
        self.stats.add_time_sample(sample);
        Ok(())
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
    }
}
