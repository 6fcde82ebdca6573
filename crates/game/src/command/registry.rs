use std::collections::HashMap;

use crate::ghost::{EntityId, GhostWorld, SpawnedGhostId};
use crate::tick::NetworkTick;
use crate::wire::{ByteReader, ByteWriter, WireError};

use super::codec::{decode_command_payload, encode_command_payload, CodecError};
use super::Command;

/// FNV-1a 64-bit hash of a command's stable name; the wire identifier of
/// the type.
pub fn stable_type_hash(name: &str) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for byte in name.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

type EncodeFn = fn(
    &GhostWorld,
    EntityId,
    NetworkTick,
    Option<SpawnedGhostId>,
    &mut ByteWriter,
) -> Result<bool, CodecError>;

type DecodeFn = fn(&mut ByteReader, &mut GhostWorld, EntityId, NetworkTick) -> Result<(), WireError>;

type HasBufferFn = fn(&GhostWorld, EntityId) -> bool;

type NewestTickFn = fn(&GhostWorld, EntityId) -> NetworkTick;

/// One registered command type: the wire hash plus monomorphised accessors,
/// so the transport never needs the concrete type again.
pub struct RegisteredCommand {
    pub stable_hash: u64,
    pub type_name: &'static str,
    pub size_hint: usize,
    encode: EncodeFn,
    decode: DecodeFn,
    has_buffer: HasBufferFn,
    newest_tick: NewestTickFn,
}

impl RegisteredCommand {
    pub fn encode(
        &self,
        world: &GhostWorld,
        entity: EntityId,
        target_tick: NetworkTick,
        ghost: Option<SpawnedGhostId>,
        w: &mut ByteWriter,
    ) -> Result<bool, CodecError> {
        (self.encode)(world, entity, target_tick, ghost, w)
    }

    pub fn decode(
        &self,
        r: &mut ByteReader,
        world: &mut GhostWorld,
        entity: EntityId,
        server_tick: NetworkTick,
    ) -> Result<(), WireError> {
        (self.decode)(r, world, entity, server_tick)
    }

    pub fn has_buffer(&self, world: &GhostWorld, entity: EntityId) -> bool {
        (self.has_buffer)(world, entity)
    }

    pub fn newest_buffered_tick(&self, world: &GhostWorld, entity: EntityId) -> NetworkTick {
        (self.newest_tick)(world, entity)
    }
}

fn encode_entity<T: Command>(
    world: &GhostWorld,
    entity: EntityId,
    target_tick: NetworkTick,
    ghost: Option<SpawnedGhostId>,
    w: &mut ByteWriter,
) -> Result<bool, CodecError> {
    match world.command_buffer::<T>(entity) {
        Some(buffer) => encode_command_payload(w, buffer, target_tick, ghost),
        None => Ok(false),
    }
}

fn decode_entity<T: Command>(
    r: &mut ByteReader,
    world: &mut GhostWorld,
    entity: EntityId,
    server_tick: NetworkTick,
) -> Result<(), WireError> {
    match world.command_buffer_mut::<T>(entity) {
        Some(buffer) => decode_command_payload(r, buffer, server_tick),
        // Target has no buffer for this type; the payload is dropped.
        None => Ok(()),
    }
}

fn entity_has_buffer<T: Command>(world: &GhostWorld, entity: EntityId) -> bool {
    world.has_command_buffer::<T>(entity)
}

fn entity_newest_tick<T: Command>(world: &GhostWorld, entity: EntityId) -> NetworkTick {
    world
        .command_buffer::<T>(entity)
        .map_or(NetworkTick::INVALID, |b| b.newest_tick())
}

/// Runtime registry of command serializers keyed by stable type hash.
#[derive(Default)]
pub struct CommandRegistry {
    by_hash: HashMap<u64, RegisteredCommand>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Command>(&mut self) {
        let hash = stable_type_hash(T::STABLE_NAME);
        self.by_hash.insert(
            hash,
            RegisteredCommand {
                stable_hash: hash,
                type_name: T::STABLE_NAME,
                size_hint: std::mem::size_of::<T>(),
                encode: encode_entity::<T>,
                decode: decode_entity::<T>,
                has_buffer: entity_has_buffer::<T>,
                newest_tick: entity_newest_tick::<T>,
            },
        );
    }

    pub fn get(&self, hash: u64) -> Option<&RegisteredCommand> {
        self.by_hash.get(&hash)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegisteredCommand> {
        self.by_hash.values()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}
