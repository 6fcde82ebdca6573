use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};

use crate::ghost::EntityId;

use super::components::{
    LocalTransform, PhysicsCollider, PhysicsMass, PhysicsMassOverride, PhysicsVelocity,
    SmoothingMethod,
};

/// Authoring description of one physics entity; the build scheduler turns
/// these into packed body arrays every tick.
#[derive(Debug, Clone)]
pub struct BodyDesc {
    pub entity: EntityId,
    /// World membership; unindexed bodies are excluded from every build.
    pub world_index: Option<u32>,
    pub parent: Option<EntityId>,
    pub local_transform: Option<LocalTransform>,
    pub local_to_world: Option<Mat4>,
    pub collider: Option<PhysicsCollider>,
    pub disable_collider: bool,
    /// Present ⇒ the entity lands in the dynamic body range.
    pub velocity: Option<PhysicsVelocity>,
    pub mass: Option<PhysicsMass>,
    pub mass_override: Option<PhysicsMassOverride>,
    pub gravity_factor: Option<f32>,
    pub simulate: bool,
    pub smoothing: Option<SmoothingMethod>,
}

impl BodyDesc {
    pub fn new(entity: EntityId) -> Self {
        Self {
            entity,
            world_index: Some(0),
            parent: None,
            local_transform: Some(LocalTransform::default()),
            local_to_world: None,
            collider: None,
            disable_collider: false,
            velocity: None,
            mass: None,
            mass_override: None,
            gravity_factor: None,
            simulate: true,
            smoothing: None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.velocity.is_some()
    }
}

/// A joint authored between two entities; `body_b` of `None` attaches to the
/// sentinel static body.
#[derive(Debug, Clone)]
pub struct JointDesc {
    pub entity: EntityId,
    pub body_a: EntityId,
    pub body_b: Option<EntityId>,
    pub anchor_a: Vec3,
    pub anchor_b: Vec3,
}

/// Structure/change counters standing in for per-chunk change versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SceneVersions {
    pub order: u32,
    pub static_change: u32,
    pub change: u32,
}

/// The store the build scheduler reads: body descriptions in stable
/// insertion order plus version counters for change tracking.
#[derive(Debug, Default)]
pub struct PhysicsScene {
    bodies: Vec<BodyDesc>,
    by_entity: HashMap<EntityId, usize>,
    joints: Vec<JointDesc>,
    versions: SceneVersions,
}

impl PhysicsScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn versions(&self) -> SceneVersions {
        self.versions
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn add_body(&mut self, desc: BodyDesc) {
        self.versions.order += 1;
        self.versions.change += 1;
        if !desc.is_dynamic() {
            self.versions.static_change += 1;
        }
        self.by_entity.insert(desc.entity, self.bodies.len());
        self.bodies.push(desc);
    }

    pub fn remove_body(&mut self, entity: EntityId) -> Option<BodyDesc> {
        let index = self.by_entity.remove(&entity)?;
        let removed = self.bodies.swap_remove(index);
        if let Some(moved) = self.bodies.get(index) {
            self.by_entity.insert(moved.entity, index);
        }
        self.versions.order += 1;
        self.versions.change += 1;
        if !removed.is_dynamic() {
            self.versions.static_change += 1;
        }
        Some(removed)
    }

    pub fn get(&self, entity: EntityId) -> Option<&BodyDesc> {
        self.by_entity.get(&entity).map(|&i| &self.bodies[i])
    }

    /// Structural mutation: bumps the change versions (the static counter
    /// too when a static body is touched). Not for per-tick motion updates.
    pub fn update_body(&mut self, entity: EntityId, f: impl FnOnce(&mut BodyDesc)) -> bool {
        let Some(&index) = self.by_entity.get(&entity) else {
            return false;
        };
        let was_static = !self.bodies[index].is_dynamic();
        f(&mut self.bodies[index]);
        let is_static = !self.bodies[index].is_dynamic();
        self.versions.change += 1;
        if was_static || is_static {
            self.versions.static_change += 1;
        }
        true
    }

    /// Per-tick motion write-back (gameplay input, simulation export).
    /// Deliberately does not touch the change versions.
    pub fn write_motion(
        &mut self,
        entity: EntityId,
        position: Vec3,
        rotation: Quat,
        velocity: Option<PhysicsVelocity>,
    ) -> bool {
        let Some(&index) = self.by_entity.get(&entity) else {
            return false;
        };
        let body = &mut self.bodies[index];
        if let Some(transform) = &mut body.local_transform {
            transform.position = position;
            transform.rotation = rotation;
        } else {
            body.local_transform = Some(LocalTransform {
                position,
                rotation,
                scale: 1.0,
            });
        }
        if let (Some(stored), Some(new)) = (&mut body.velocity, velocity) {
            *stored = new;
        }
        true
    }

    pub fn bodies(&self) -> impl Iterator<Item = &BodyDesc> {
        self.bodies.iter()
    }

    pub fn add_joint(&mut self, joint: JointDesc) {
        self.versions.order += 1;
        self.versions.change += 1;
        self.joints.push(joint);
    }

    pub fn joints(&self) -> &[JointDesc] {
        &self.joints
    }
}
