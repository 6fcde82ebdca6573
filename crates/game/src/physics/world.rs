use std::collections::HashMap;

use glam::Vec3;

use crate::ghost::EntityId;

use super::broadphase::Broadphase;
use super::components::{PhysicsCollider, RigidTransform};

/// One packed body: dynamic bodies occupy `[0, num_dynamic)`, statics the
/// rest, so motion arrays stay 1:1 with the dynamic range by construction.
#[derive(Debug, Clone, Copy)]
pub struct RigidBody {
    pub entity: Option<EntityId>,
    pub world_from_body: RigidTransform,
    pub scale: f32,
    pub collider: Option<PhysicsCollider>,
}

impl RigidBody {
    pub fn sentinel() -> Self {
        Self {
            entity: None,
            world_from_body: RigidTransform::IDENTITY,
            scale: 1.0,
            collider: None,
        }
    }
}

/// Integrator frame of one dynamic body.
#[derive(Debug, Clone, Copy)]
pub struct MotionData {
    pub world_from_motion: RigidTransform,
    pub gravity_factor: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MotionVelocity {
    pub linear: Vec3,
    pub angular: Vec3,
    pub inverse_mass: f32,
    pub inverse_inertia: Vec3,
}

impl MotionVelocity {
    pub fn is_kinematic(&self) -> bool {
        self.inverse_mass == 0.0
    }
}

/// A joint with both attachment points resolved to body indices.
#[derive(Debug, Clone, Copy)]
pub struct Joint {
    pub entity: EntityId,
    pub body_a: i32,
    pub body_b: i32,
    pub anchor_a: Vec3,
    pub anchor_b: Vec3,
}

/// The packed per-tick physics world: body array, motion arrays, joint
/// table, broadphase, and the transient entity-to-body map used to resolve
/// joints and external lookups.
#[derive(Debug, Default)]
pub struct PhysicsWorld {
    pub bodies: Vec<RigidBody>,
    pub motion_datas: Vec<MotionData>,
    pub motion_velocities: Vec<MotionVelocity>,
    pub joints: Vec<Joint>,
    pub broadphase: Broadphase,
    num_dynamic: usize,
    entity_body_index: HashMap<EntityId, i32>,
}

impl PhysicsWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    pub fn num_dynamic_bodies(&self) -> usize {
        self.num_dynamic
    }

    pub fn num_static_bodies(&self) -> usize {
        self.bodies.len() - self.num_dynamic
    }

    pub fn dynamic_bodies(&self) -> &[RigidBody] {
        &self.bodies[..self.num_dynamic]
    }

    pub fn static_bodies(&self) -> &[RigidBody] {
        &self.bodies[self.num_dynamic..]
    }

    pub fn body_index(&self, entity: EntityId) -> Option<i32> {
        self.entity_body_index.get(&entity).copied()
    }

    /// Clears the world and sizes the arrays for a fresh build. Allocations
    /// are reused when counts are stable.
    pub(super) fn reset(&mut self, num_dynamic: usize, num_static: usize) {
        let total = num_dynamic + num_static;
        self.num_dynamic = num_dynamic;

        self.bodies.clear();
        self.bodies.resize(total, RigidBody::sentinel());
        self.motion_datas.clear();
        self.motion_datas.resize(
            num_dynamic,
            MotionData {
                world_from_motion: RigidTransform::IDENTITY,
                gravity_factor: 0.0,
            },
        );
        self.motion_velocities.clear();
        self.motion_velocities
            .resize(num_dynamic, MotionVelocity::default());
        self.joints.clear();
        self.entity_body_index.clear();
    }

    pub(super) fn map_entity(&mut self, entity: EntityId, body_index: i32) {
        self.entity_body_index.insert(entity, body_index);
    }
}

#[derive(Debug)]
pub struct PhysicsWorldSingleton {
    pub world: PhysicsWorld,
    pub world_index: u32,
}

impl PhysicsWorldSingleton {
    pub fn new(world_index: u32) -> Self {
        Self {
            world: PhysicsWorld::new(),
            world_index,
        }
    }
}
