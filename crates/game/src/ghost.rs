use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::command::{Command, CommandBuffer};
use crate::net::NetworkId;
use crate::tick::NetworkTick;

pub type EntityId = u32;

/// Wire identity of a replicated entity, unique across its whole lifetime:
/// ghost ids are recycled, (ghost_id, spawn_tick) pairs are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpawnedGhostId {
    pub ghost_id: i32,
    pub spawn_tick: NetworkTick,
}

#[derive(Debug, Clone)]
pub struct GhostEntity {
    pub id: EntityId,
    pub ghost: Option<SpawnedGhostId>,
    pub ghost_type: u8,
    pub owner: Option<NetworkId>,
    /// Marks an owned ghost as an implicit command sink for its owning
    /// connection.
    pub auto_command_target: bool,
    /// Sender-reported interpolation delay in ticks, mirrored from the
    /// command datagram header.
    pub interpolation_delay: Option<u32>,
}

trait BufferColumn: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn remove_entity(&mut self, id: EntityId);
}

impl<T: Command> BufferColumn for HashMap<EntityId, CommandBuffer<T>> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn remove_entity(&mut self, id: EntityId) {
        self.remove(&id);
    }
}

/// Registry of replicated entities plus their per-type command buffers.
///
/// Command buffers live in type-erased columns so the wire registry can
/// decode into the right buffer from a 64-bit type hash alone.
pub struct GhostWorld {
    entities: HashMap<EntityId, GhostEntity>,
    ghost_map: HashMap<SpawnedGhostId, EntityId>,
    next_entity_id: EntityId,
    next_ghost_id: i32,
    buffers: HashMap<TypeId, Box<dyn BufferColumn>>,
}

impl Default for GhostWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl GhostWorld {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            ghost_map: HashMap::new(),
            next_entity_id: 1,
            next_ghost_id: 1,
            buffers: HashMap::new(),
        }
    }

    pub fn spawn(&mut self, ghost_type: u8) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        self.entities.insert(
            id,
            GhostEntity {
                id,
                ghost: None,
                ghost_type,
                owner: None,
                auto_command_target: false,
                interpolation_delay: None,
            },
        );
        id
    }

    /// Spawns an entity with a fresh ghost identity registered in the
    /// routing map.
    pub fn spawn_ghost(
        &mut self,
        ghost_type: u8,
        spawn_tick: NetworkTick,
        owner: Option<NetworkId>,
    ) -> (EntityId, SpawnedGhostId) {
        let id = self.spawn(ghost_type);
        let ghost = SpawnedGhostId {
            ghost_id: self.next_ghost_id,
            spawn_tick,
        };
        self.next_ghost_id += 1;

        let entity = self.entities.get_mut(&id).unwrap();
        entity.ghost = Some(ghost);
        entity.owner = owner;
        self.ghost_map.insert(ghost, id);
        (id, ghost)
    }

    /// Mirrors a remotely spawned ghost under a known identity (client side).
    pub fn insert_ghost(
        &mut self,
        ghost: SpawnedGhostId,
        ghost_type: u8,
        owner: Option<NetworkId>,
    ) -> EntityId {
        let id = self.spawn(ghost_type);
        let entity = self.entities.get_mut(&id).unwrap();
        entity.ghost = Some(ghost);
        entity.owner = owner;
        self.ghost_map.insert(ghost, id);
        id
    }

    pub fn despawn(&mut self, id: EntityId) {
        if let Some(entity) = self.entities.remove(&id) {
            if let Some(ghost) = entity.ghost {
                self.ghost_map.remove(&ghost);
            }
            for column in self.buffers.values_mut() {
                column.remove_entity(id);
            }
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&GhostEntity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut GhostEntity> {
        self.entities.get_mut(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &GhostEntity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn resolve_ghost(&self, ghost: SpawnedGhostId) -> Option<EntityId> {
        self.ghost_map.get(&ghost).copied()
    }

    /// Entities routable by the auto-target mechanism for one connection,
    /// in stable id order so payload layout is deterministic per tick.
    pub fn auto_targets_for(&self, owner: NetworkId) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.auto_command_target && e.owner == Some(owner))
            .map(|e| e.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn attach_command_buffer<T: Command>(&mut self, id: EntityId) {
        let column = self
            .buffers
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(HashMap::<EntityId, CommandBuffer<T>>::new()));
        column
            .as_any_mut()
            .downcast_mut::<HashMap<EntityId, CommandBuffer<T>>>()
            .unwrap()
            .insert(id, CommandBuffer::new());
    }

    pub fn has_command_buffer<T: Command>(&self, id: EntityId) -> bool {
        self.command_buffer::<T>(id).is_some()
    }

    pub fn command_buffer<T: Command>(&self, id: EntityId) -> Option<&CommandBuffer<T>> {
        self.buffers
            .get(&TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<HashMap<EntityId, CommandBuffer<T>>>()?
            .get(&id)
    }

    pub fn command_buffer_mut<T: Command>(
        &mut self,
        id: EntityId,
    ) -> Option<&mut CommandBuffer<T>> {
        self.buffers
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<HashMap<EntityId, CommandBuffer<T>>>()?
            .get_mut(&id)
    }
}
