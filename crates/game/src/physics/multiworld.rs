use super::build::{BuildPhysicsWorld, export_physics_world};
use super::scene::PhysicsScene;
use super::step::{PhysicsStep, SimulationSingleton};
use super::world::PhysicsWorldSingleton;

/// Runs a secondary physics world through the standard build → user systems
/// → simulate → export pipeline by temporarily swapping it in as the active
/// singleton.
///
/// The alternate world keeps its own solver instance, chosen once from the
/// step configuration; the simulation picker does not run during the swap.
/// `share_static_colliders` drops the static query's world filter so static
/// geometry authored without a world index lands in every world.
pub struct MultiWorldGroup {
    alternate: PhysicsWorldSingleton,
    simulation: SimulationSingleton,
    builder: BuildPhysicsWorld,
    pub share_static_colliders: bool,
}

impl MultiWorldGroup {
    pub fn new(world_index: u32, step: &PhysicsStep, share_static_colliders: bool) -> Self {
        Self {
            alternate: PhysicsWorldSingleton::new(world_index),
            simulation: SimulationSingleton::new(step.simulation),
            builder: BuildPhysicsWorld::new(),
            share_static_colliders,
        }
    }

    pub fn world_index(&self) -> u32 {
        self.alternate.world_index
    }

    pub fn alternate(&self) -> &PhysicsWorldSingleton {
        &self.alternate
    }

    /// Swap-run-restore: after this returns, `active` again holds the world
    /// it came in with, and the alternate world carries the stepped state.
    pub fn run(
        &mut self,
        active: &mut PhysicsWorldSingleton,
        scene: &mut PhysicsScene,
        step: &PhysicsStep,
        dt: f32,
        user_systems: impl FnOnce(&mut PhysicsWorldSingleton, &mut PhysicsScene),
    ) {
        std::mem::swap(active, &mut self.alternate);

        self.builder
            .run(scene, active, step, self.share_static_colliders);
        user_systems(active, scene);
        self.simulation.step(&mut active.world, step, dt);
        export_physics_world(&mut self.builder, active, scene);

        std::mem::swap(active, &mut self.alternate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::components::{
        ColliderShape, PhysicsCollider, PhysicsMass, PhysicsVelocity,
    };
    use crate::physics::scene::BodyDesc;
    use glam::Vec3;

    fn scene_with_two_worlds() -> PhysicsScene {
        let mut scene = PhysicsScene::new();

        let mut main_body = BodyDesc::new(1);
        main_body.collider = Some(PhysicsCollider::new(ColliderShape::Sphere { radius: 0.5 }));
        main_body.velocity = Some(PhysicsVelocity::default());
        main_body.mass = Some(PhysicsMass::sphere(1.0, 0.5));
        scene.add_body(main_body);

        let mut alt_body = BodyDesc::new(2);
        alt_body.world_index = Some(1);
        alt_body.collider = Some(PhysicsCollider::new(ColliderShape::Sphere { radius: 0.5 }));
        alt_body.velocity = Some(PhysicsVelocity::default());
        alt_body.mass = Some(PhysicsMass::sphere(1.0, 0.5));
        scene.add_body(alt_body);

        // Shared static floor with no world index.
        let mut floor = BodyDesc::new(3);
        floor.world_index = None;
        floor.collider = Some(PhysicsCollider::new(ColliderShape::Box {
            half_extents: Vec3::new(10.0, 0.1, 10.0),
        }));
        scene.add_body(floor);

        scene
    }

    #[test]
    fn swap_restores_the_active_world() {
        let mut scene = scene_with_two_worlds();
        let step = PhysicsStep::default();
        let mut active = PhysicsWorldSingleton::new(0);
        let mut group = MultiWorldGroup::new(1, &step, true);

        group.run(&mut active, &mut scene, &step, 1.0 / 60.0, |world, _| {
            assert_eq!(world.world_index, 1);
        });

        assert_eq!(active.world_index, 0);
        assert_eq!(group.world_index(), 1);
        // The alternate world kept its built state across the restore.
        assert_eq!(group.alternate().world.num_dynamic_bodies(), 1);
    }

    #[test]
    fn shared_statics_appear_in_both_worlds() {
        let mut scene = scene_with_two_worlds();
        let step = PhysicsStep::default();

        let mut main_builder = BuildPhysicsWorld::new();
        let mut active = PhysicsWorldSingleton::new(0);
        main_builder.run(&scene, &mut active, &step, true);

        let mut group = MultiWorldGroup::new(1, &step, true);
        group.run(&mut active, &mut scene, &step, 1.0 / 60.0, |_, _| {});

        // sentinel + shared floor in both; each world only its own dynamic.
        assert_eq!(active.world.num_static_bodies(), 2);
        assert_eq!(active.world.num_dynamic_bodies(), 1);
        assert_eq!(active.world.bodies[0].entity, Some(1));

        let alt = group.alternate();
        assert_eq!(alt.world.num_static_bodies(), 2);
        assert_eq!(alt.world.num_dynamic_bodies(), 1);
        assert_eq!(alt.world.bodies[0].entity, Some(2));
        assert!(alt.world.body_index(3).is_some());
        assert!(active.world.body_index(3).is_some());
    }

    #[test]
    fn alternate_world_steps_its_own_bodies() {
        let mut scene = scene_with_two_worlds();
        let step = PhysicsStep::default();
        let mut active = PhysicsWorldSingleton::new(0);
        let mut group = MultiWorldGroup::new(1, &step, true);

        let before = scene.get(2).unwrap().local_transform.unwrap().position;
        group.run(&mut active, &mut scene, &step, 1.0, |_, _| {});
        let after = scene.get(2).unwrap().local_transform.unwrap().position;

        // Gravity moved the alternate-world body; the main-world body is
        // untouched because its world never stepped.
        assert!(after.y < before.y);
        assert_eq!(
            scene.get(1).unwrap().local_transform.unwrap().position.y,
            0.0
        );
    }
}
