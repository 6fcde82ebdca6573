use glam::{Mat4, Vec3};

use super::components::RigidTransform;
use super::scene::{BodyDesc, PhysicsScene, SceneVersions};
use super::step::PhysicsStep;
use super::world::{Joint, MotionData, MotionVelocity, PhysicsWorldSingleton, RigidBody};

const PARALLEL_FILL_THRESHOLD: usize = 64;
const PARALLEL_FILL_CHUNK: usize = 32;

#[derive(Debug, Clone, Copy)]
struct IntegrityToken {
    versions: SceneVersions,
    body_count: usize,
}

/// Per-tick physics world builder.
///
/// Packs the scene's body descriptions into the singleton's arrays (dynamic
/// range first, then an optional sentinel static body, then statics),
/// resolves joints through the transient entity map, and rebuilds the
/// broadphase, skipping its static half when no static body changed since
/// the previous build.
#[derive(Debug)]
pub struct BuildPhysicsWorld {
    pub include_static_sentinel: bool,
    last_static_count: Option<usize>,
    last_static_version: u32,
    last_order_version: u32,
    integrity: Option<IntegrityToken>,
}

impl Default for BuildPhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildPhysicsWorld {
    pub fn new() -> Self {
        Self {
            include_static_sentinel: true,
            last_static_count: None,
            last_static_version: 0,
            last_order_version: 0,
            integrity: None,
        }
    }

    /// Builds the world for the singleton's index. Returns whether the
    /// static bodies changed since the previous build.
    pub fn run(
        &mut self,
        scene: &PhysicsScene,
        singleton: &mut PhysicsWorldSingleton,
        step: &PhysicsStep,
        share_static_colliders: bool,
    ) -> bool {
        let world_index = singleton.world_index;

        let dynamic: Vec<&BodyDesc> = scene
            .bodies()
            .filter(|b| b.is_dynamic() && b.world_index == Some(world_index))
            .collect();
        // `share_static_colliders` clears the static query's world filter.
        let statics: Vec<&BodyDesc> = scene
            .bodies()
            .filter(|b| {
                !b.is_dynamic()
                    && (share_static_colliders || b.world_index == Some(world_index))
            })
            .collect();

        let versions = scene.versions();
        let static_changed = self.last_static_count != Some(statics.len())
            || versions.static_change != self.last_static_version
            || versions.order != self.last_order_version;
        self.last_static_count = Some(statics.len());
        self.last_static_version = versions.static_change;
        self.last_order_version = versions.order;

        let sentinel = self.include_static_sentinel as usize;
        let world = &mut singleton.world;
        world.reset(dynamic.len(), statics.len() + sentinel);

        {
            let (bodies, _) = world.bodies.split_at_mut(dynamic.len());
            let datas = &mut world.motion_datas[..];
            let velocities = &mut world.motion_velocities[..];
            if step.multi_threaded && dynamic.len() >= PARALLEL_FILL_THRESHOLD {
                parallel_fill_dynamic(&dynamic, bodies, datas, velocities);
            } else {
                fill_dynamic(&dynamic, bodies, datas, velocities);
            }
        }
        for (i, desc) in dynamic.iter().enumerate() {
            world.map_entity(desc.entity, i as i32);
        }

        // Index `dynamic.len()` stays the sentinel body from reset.
        for (i, desc) in statics.iter().enumerate() {
            let index = dynamic.len() + sentinel + i;
            world.bodies[index] = build_static_body(desc);
            world.map_entity(desc.entity, index as i32);
        }

        let sentinel_index = (sentinel == 1).then_some(dynamic.len() as i32);
        for joint in scene.joints() {
            let Some(body_a) = world.body_index(joint.body_a) else {
                continue;
            };
            let body_b = match joint.body_b.map(|e| world.body_index(e)) {
                Some(Some(index)) => index,
                Some(None) | None => match sentinel_index {
                    Some(index) => index,
                    None => continue,
                },
            };
            world.joints.push(Joint {
                entity: joint.entity,
                body_a,
                body_b,
                anchor_a: joint.anchor_a,
                anchor_b: joint.anchor_b,
            });
        }

        let num_dynamic = world.num_dynamic_bodies();
        let (bodies, broadphase) = (&world.bodies, &mut world.broadphase);
        broadphase.build(bodies, num_dynamic, static_changed);

        self.integrity = Some(IntegrityToken {
            versions,
            body_count: scene.len(),
        });
        static_changed
    }
}

/// Writes simulated motion back into the scene. In development builds a
/// structural scene mutation between build and export is fatal.
pub fn export_physics_world(
    builder: &mut BuildPhysicsWorld,
    singleton: &PhysicsWorldSingleton,
    scene: &mut PhysicsScene,
) {
    if let Some(token) = builder.integrity.take() {
        if cfg!(debug_assertions)
            && (scene.versions() != token.versions || scene.len() != token.body_count)
        {
            panic!(
                "physics scene mutated structurally between build and export \
                 (world {})",
                singleton.world_index
            );
        }
    }

    let world = &singleton.world;
    for i in 0..world.num_dynamic_bodies() {
        let Some(entity) = world.bodies[i].entity else {
            continue;
        };
        let motion = &world.motion_datas[i];
        let velocity = &world.motion_velocities[i];
        // Kinematic velocities are build products; only true dynamics write
        // their velocity back.
        let new_velocity = (!velocity.is_kinematic()).then_some(
            super::components::PhysicsVelocity {
                linear: velocity.linear,
                angular: velocity.angular,
            },
        );
        scene.write_motion(
            entity,
            motion.world_from_motion.position,
            motion.world_from_motion.rotation,
            new_velocity,
        );
    }
}

fn fill_dynamic(
    descs: &[&BodyDesc],
    bodies: &mut [RigidBody],
    datas: &mut [MotionData],
    velocities: &mut [MotionVelocity],
) {
    for (((desc, body), data), velocity) in descs
        .iter()
        .zip(bodies.iter_mut())
        .zip(datas.iter_mut())
        .zip(velocities.iter_mut())
    {
        let (b, d, v) = build_dynamic_body(desc);
        *body = b;
        *data = d;
        *velocity = v;
    }
}

fn parallel_fill_dynamic(
    descs: &[&BodyDesc],
    bodies: &mut [RigidBody],
    datas: &mut [MotionData],
    velocities: &mut [MotionVelocity],
) {
    std::thread::scope(|scope| {
        let iter = descs
            .chunks(PARALLEL_FILL_CHUNK)
            .zip(bodies.chunks_mut(PARALLEL_FILL_CHUNK))
            .zip(datas.chunks_mut(PARALLEL_FILL_CHUNK))
            .zip(velocities.chunks_mut(PARALLEL_FILL_CHUNK));
        for (((desc_chunk, body_chunk), data_chunk), velocity_chunk) in iter {
            scope.spawn(move || {
                fill_dynamic(desc_chunk, body_chunk, data_chunk, velocity_chunk);
            });
        }
    });
}

fn build_dynamic_body(desc: &BodyDesc) -> (RigidBody, MotionData, MotionVelocity) {
    let (transform, scale) = body_transform(desc);

    let kinematic = desc.mass.is_none()
        || desc.mass_override.is_some_and(|o| o.is_kinematic)
        || !desc.simulate;

    let stored = desc.velocity.unwrap_or_default();
    let (mut linear, mut angular) = (stored.linear, stored.angular);
    if !desc.simulate
        || (kinematic && desc.mass_override.is_some_and(|o| o.set_velocity_to_zero))
    {
        linear = Vec3::ZERO;
        angular = Vec3::ZERO;
    }

    let (inverse_mass, inverse_inertia, gravity_factor) = match (kinematic, desc.mass) {
        (false, Some(mass)) => (
            mass.inverse_mass / scale.powi(3),
            mass.inverse_inertia / scale.powi(5),
            desc.gravity_factor.unwrap_or(1.0),
        ),
        _ => (0.0, Vec3::ZERO, 0.0),
    };

    let body = RigidBody {
        entity: Some(desc.entity),
        world_from_body: transform,
        scale,
        collider: if desc.disable_collider {
            None
        } else {
            desc.collider
        },
    };
    let data = MotionData {
        world_from_motion: transform,
        gravity_factor,
    };
    let velocity = MotionVelocity {
        linear,
        angular,
        inverse_mass,
        inverse_inertia,
    };
    (body, data, velocity)
}

fn build_static_body(desc: &BodyDesc) -> RigidBody {
    let (transform, scale) = body_transform(desc);
    RigidBody {
        entity: Some(desc.entity),
        world_from_body: transform,
        scale,
        collider: if desc.disable_collider {
            None
        } else {
            desc.collider
        },
    }
}

/// Parented bodies (and bodies without an authoring transform) take their
/// pose from the world matrix, scale and shear discarded; otherwise the
/// authoring transform is used directly and its uniform scale propagates to
/// the body.
fn body_transform(desc: &BodyDesc) -> (RigidTransform, f32) {
    if desc.parent.is_some() || desc.local_transform.is_none() {
        let matrix = desc.local_to_world.unwrap_or(Mat4::IDENTITY);
        (RigidTransform::from_matrix(&matrix), 1.0)
    } else {
        let transform = desc.local_transform.unwrap();
        (
            RigidTransform::new(transform.rotation, transform.position),
            transform.scale,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::components::{
        ColliderShape, PhysicsCollider, PhysicsMass, PhysicsMassOverride, PhysicsVelocity,
    };
    use glam::Quat;

    fn dynamic_desc(entity: u32, position: Vec3) -> BodyDesc {
        let mut desc = BodyDesc::new(entity);
        desc.local_transform.as_mut().unwrap().position = position;
        desc.collider = Some(PhysicsCollider::new(ColliderShape::Sphere { radius: 0.5 }));
        desc.velocity = Some(PhysicsVelocity {
            linear: Vec3::new(1.0, 0.0, 0.0),
            angular: Vec3::ZERO,
        });
        desc.mass = Some(PhysicsMass::sphere(2.0, 0.5));
        desc
    }

    fn static_desc(entity: u32, position: Vec3) -> BodyDesc {
        let mut desc = BodyDesc::new(entity);
        desc.local_transform.as_mut().unwrap().position = position;
        desc.collider = Some(PhysicsCollider::new(ColliderShape::Box {
            half_extents: Vec3::ONE,
        }));
        desc
    }

    fn build_once(scene: &PhysicsScene) -> (BuildPhysicsWorld, PhysicsWorldSingleton) {
        let mut builder = BuildPhysicsWorld::new();
        let mut singleton = PhysicsWorldSingleton::new(0);
        builder.run(scene, &mut singleton, &PhysicsStep::default(), false);
        (builder, singleton)
    }

    #[test]
    fn dynamic_bodies_precede_sentinel_and_statics() {
        let mut scene = PhysicsScene::new();
        scene.add_body(static_desc(10, Vec3::ZERO));
        scene.add_body(dynamic_desc(20, Vec3::Y));

        let (_, singleton) = build_once(&scene);
        let world = &singleton.world;

        assert_eq!(world.num_dynamic_bodies(), 1);
        assert_eq!(world.num_static_bodies(), 2);
        assert_eq!(world.bodies[0].entity, Some(20));
        assert_eq!(world.bodies[1].entity, None); // sentinel
        assert_eq!(world.bodies[2].entity, Some(10));
        assert_eq!(world.body_index(20), Some(0));
        assert_eq!(world.body_index(10), Some(2));
        assert_eq!(world.motion_datas.len(), 1);
        assert_eq!(world.motion_velocities.len(), 1);
    }

    #[test]
    fn unindexed_bodies_are_excluded() {
        let mut scene = PhysicsScene::new();
        let mut desc = dynamic_desc(1, Vec3::ZERO);
        desc.world_index = None;
        scene.add_body(desc);

        let (_, singleton) = build_once(&scene);
        assert_eq!(singleton.world.num_dynamic_bodies(), 0);
    }

    #[test]
    fn shared_statics_ignore_the_world_filter() {
        let mut scene = PhysicsScene::new();
        let mut shared = static_desc(1, Vec3::ZERO);
        shared.world_index = None;
        scene.add_body(shared);
        let mut unshared_dynamic = dynamic_desc(2, Vec3::ZERO);
        unshared_dynamic.world_index = None;
        scene.add_body(unshared_dynamic);

        let mut builder = BuildPhysicsWorld::new();
        for world_index in [0u32, 1] {
            let mut singleton = PhysicsWorldSingleton::new(world_index);
            builder.run(&scene, &mut singleton, &PhysicsStep::default(), true);
            assert_eq!(singleton.world.num_static_bodies(), 2); // sentinel + shared
            assert_eq!(singleton.world.num_dynamic_bodies(), 0);
        }
    }

    #[test]
    fn parented_body_pose_comes_from_world_matrix() {
        let mut scene = PhysicsScene::new();
        let mut desc = dynamic_desc(1, Vec3::ZERO);
        desc.parent = Some(99);
        desc.local_to_world = Some(Mat4::from_scale_rotation_translation(
            Vec3::splat(3.0),
            Quat::from_rotation_y(0.5),
            Vec3::new(7.0, 0.0, 0.0),
        ));
        scene.add_body(desc);

        let (_, singleton) = build_once(&scene);
        let body = &singleton.world.bodies[0];
        assert!((body.world_from_body.position.x - 7.0).abs() < 1e-5);
        // Scale is discarded on the matrix path.
        assert_eq!(body.scale, 1.0);
    }

    #[test]
    fn uniform_scale_propagates_to_mass_properties() {
        let mut scene = PhysicsScene::new();
        let mut desc = dynamic_desc(1, Vec3::ZERO);
        desc.local_transform.as_mut().unwrap().scale = 2.0;
        scene.add_body(desc);

        let (_, singleton) = build_once(&scene);
        let velocity = &singleton.world.motion_velocities[0];
        let unscaled = PhysicsMass::sphere(2.0, 0.5);
        assert!((velocity.inverse_mass - unscaled.inverse_mass / 8.0).abs() < 1e-6);
        assert_eq!(singleton.world.bodies[0].scale, 2.0);
    }

    #[test]
    fn kinematic_rules() {
        let mut scene = PhysicsScene::new();

        // No mass component.
        let mut massless = dynamic_desc(1, Vec3::ZERO);
        massless.mass = None;
        scene.add_body(massless);

        // Kinematic override with velocity zeroing.
        let mut overridden = dynamic_desc(2, Vec3::ZERO);
        overridden.mass_override = Some(PhysicsMassOverride {
            is_kinematic: true,
            set_velocity_to_zero: true,
        });
        scene.add_body(overridden);

        // Simulate disabled.
        let mut disabled = dynamic_desc(3, Vec3::ZERO);
        disabled.simulate = false;
        scene.add_body(disabled);

        let (_, singleton) = build_once(&scene);
        let world = &singleton.world;

        let massless_v = &world.motion_velocities[world.body_index(1).unwrap() as usize];
        assert!(massless_v.is_kinematic());
        // Kinematic but keeps its stored velocity.
        assert_eq!(massless_v.linear, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(
            world.motion_datas[world.body_index(1).unwrap() as usize].gravity_factor,
            0.0
        );

        let overridden_v = &world.motion_velocities[world.body_index(2).unwrap() as usize];
        assert!(overridden_v.is_kinematic());
        assert_eq!(overridden_v.linear, Vec3::ZERO);

        let disabled_v = &world.motion_velocities[world.body_index(3).unwrap() as usize];
        assert!(disabled_v.is_kinematic());
        assert_eq!(disabled_v.linear, Vec3::ZERO);
    }

    #[test]
    fn disabled_collider_builds_an_empty_collider() {
        let mut scene = PhysicsScene::new();
        let mut desc = static_desc(1, Vec3::ZERO);
        desc.disable_collider = true;
        scene.add_body(desc);

        let (_, singleton) = build_once(&scene);
        let body = singleton.world.static_bodies().last().unwrap();
        assert_eq!(body.entity, Some(1));
        assert!(body.collider.is_none());
    }

    #[test]
    fn static_change_tracking_goes_quiet_between_builds() {
        let mut scene = PhysicsScene::new();
        scene.add_body(static_desc(1, Vec3::ZERO));
        scene.add_body(dynamic_desc(2, Vec3::Y));

        let mut builder = BuildPhysicsWorld::new();
        let mut singleton = PhysicsWorldSingleton::new(0);
        let step = PhysicsStep::default();

        assert!(builder.run(&scene, &mut singleton, &step, false));
        // Nothing changed: the static half may be kept.
        assert!(!builder.run(&scene, &mut singleton, &step, false));

        // Motion write-back does not count as a static change.
        scene.write_motion(2, Vec3::new(0.0, 2.0, 0.0), Quat::IDENTITY, None);
        assert!(!builder.run(&scene, &mut singleton, &step, false));

        scene.update_body(1, |b| b.disable_collider = true);
        assert!(builder.run(&scene, &mut singleton, &step, false));
    }

    #[test]
    fn joints_resolve_through_the_entity_map() {
        let mut scene = PhysicsScene::new();
        scene.add_body(dynamic_desc(1, Vec3::ZERO));
        scene.add_body(static_desc(2, Vec3::ZERO));
        scene.add_joint(crate::physics::JointDesc {
            entity: 50,
            body_a: 1,
            body_b: Some(2),
            anchor_a: Vec3::ZERO,
            anchor_b: Vec3::Y,
        });
        scene.add_joint(crate::physics::JointDesc {
            entity: 51,
            body_a: 1,
            body_b: None,
            anchor_a: Vec3::ZERO,
            anchor_b: Vec3::ZERO,
        });

        let (_, singleton) = build_once(&scene);
        let world = &singleton.world;
        assert_eq!(world.joints.len(), 2);
        assert_eq!(world.joints[0].body_a, 0);
        assert_eq!(world.joints[0].body_b, 2);
        // Unattached side lands on the sentinel.
        assert_eq!(world.joints[1].body_b, 1);
    }

    #[test]
    fn export_writes_dynamic_motion_back() {
        let mut scene = PhysicsScene::new();
        scene.add_body(dynamic_desc(1, Vec3::ZERO));

        let (mut builder, mut singleton) = build_once(&scene);
        singleton.world.motion_datas[0].world_from_motion.position = Vec3::new(0.5, 1.0, 0.0);
        singleton.world.motion_velocities[0].linear = Vec3::new(0.0, -1.0, 0.0);

        export_physics_world(&mut builder, &singleton, &mut scene);
        let body = scene.get(1).unwrap();
        assert_eq!(
            body.local_transform.unwrap().position,
            Vec3::new(0.5, 1.0, 0.0)
        );
        assert_eq!(body.velocity.unwrap().linear, Vec3::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn export_keeps_stored_velocity_of_disabled_bodies() {
        let mut scene = PhysicsScene::new();
        let mut desc = dynamic_desc(1, Vec3::ZERO);
        desc.simulate = false;
        scene.add_body(desc);

        let (mut builder, singleton) = build_once(&scene);
        export_physics_world(&mut builder, &singleton, &mut scene);
        // The authored velocity survives the disabled tick.
        assert_eq!(
            scene.get(1).unwrap().velocity.unwrap().linear,
            Vec3::new(1.0, 0.0, 0.0)
        );
    }

    #[test]
    #[cfg_attr(not(debug_assertions), ignore)]
    #[should_panic(expected = "between build and export")]
    fn structural_mutation_between_build_and_export_is_fatal() {
        let mut scene = PhysicsScene::new();
        scene.add_body(dynamic_desc(1, Vec3::ZERO));

        let (mut builder, singleton) = build_once(&scene);
        scene.add_body(static_desc(9, Vec3::ZERO));
        export_physics_world(&mut builder, &singleton, &mut scene);
    }

    #[test]
    fn parallel_fill_matches_sequential() {
        let mut scene = PhysicsScene::new();
        for i in 0..128u32 {
            scene.add_body(dynamic_desc(i + 1, Vec3::new(i as f32, 0.0, 0.0)));
        }

        let mut builder = BuildPhysicsWorld::new();
        let mut sequential = PhysicsWorldSingleton::new(0);
        builder.run(&scene, &mut sequential, &PhysicsStep::default(), false);

        let mut parallel = PhysicsWorldSingleton::new(0);
        let step = PhysicsStep {
            multi_threaded: true,
            ..Default::default()
        };
        builder.run(&scene, &mut parallel, &step, false);

        assert_eq!(
            sequential.world.num_bodies(),
            parallel.world.num_bodies()
        );
        for (a, b) in sequential
            .world
            .bodies
            .iter()
            .zip(parallel.world.bodies.iter())
        {
            assert_eq!(a.entity, b.entity);
            assert_eq!(a.world_from_body.position, b.world_from_body.position);
        }
    }
}
