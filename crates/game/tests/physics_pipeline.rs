use glam::{Quat, Vec3};

use ghostwire::physics::{
    BodyDesc, BuildPhysicsWorld, ColliderShape, PhysicsCollider, PhysicsMass, PhysicsScene,
    PhysicsStep, PhysicsVelocity, PhysicsWorldSingleton, SimulationKind, SimulationSingleton,
    export_physics_world,
};

const DT: f32 = 1.0 / 60.0;

fn falling_box(entity: u32, position: Vec3) -> BodyDesc {
    let mut desc = BodyDesc::new(entity);
    desc.local_transform.as_mut().unwrap().position = position;
    desc.collider = Some(PhysicsCollider::new(ColliderShape::Box {
        half_extents: Vec3::splat(0.5),
    }));
    desc.velocity = Some(PhysicsVelocity::default());
    desc.mass = Some(PhysicsMass::sphere(1.0, 0.5));
    desc
}

struct Pipeline {
    builder: BuildPhysicsWorld,
    singleton: PhysicsWorldSingleton,
    simulation: SimulationSingleton,
    step: PhysicsStep,
}

impl Pipeline {
    fn new(step: PhysicsStep) -> Self {
        Self {
            builder: BuildPhysicsWorld::new(),
            singleton: PhysicsWorldSingleton::new(0),
            simulation: SimulationSingleton::new(step.simulation),
            step,
        }
    }

    fn tick(&mut self, scene: &mut PhysicsScene) {
        self.builder
            .run(scene, &mut self.singleton, &self.step, false);
        self.simulation
            .step(&mut self.singleton.world, &self.step, DT);
        export_physics_world(&mut self.builder, &self.singleton, scene);
    }
}

#[test]
fn gravity_integrates_across_ticks() {
    let mut scene = PhysicsScene::new();
    scene.add_body(falling_box(1, Vec3::new(0.0, 10.0, 0.0)));

    let mut pipeline = Pipeline::new(PhysicsStep::default());
    for _ in 0..60 {
        pipeline.tick(&mut scene);
    }

    let body = scene.get(1).unwrap();
    let position = body.local_transform.unwrap().position;
    // One second of free fall from rest is roughly g/2 metres.
    assert!(position.y < 10.0 - 3.5);
    assert!(position.y > 10.0 - 6.5);
    assert!(body.velocity.unwrap().linear.y < -9.0);
}

#[test]
fn simulate_toggle_pauses_and_resumes() {
    let mut scene = PhysicsScene::new();
    let mut desc = falling_box(1, Vec3::new(0.0, 5.0, 0.0));
    desc.gravity_factor = Some(0.0);
    desc.velocity = Some(PhysicsVelocity {
        linear: Vec3::new(1.0, 0.0, 0.0),
        angular: Vec3::ZERO,
    });
    scene.add_body(desc);

    let mut pipeline = Pipeline::new(PhysicsStep::default());

    // Healthy tick: the body moves by its velocity.
    pipeline.tick(&mut scene);
    let after_first = scene.get(1).unwrap().local_transform.unwrap().position;
    assert!((after_first.x - DT).abs() < 1e-5);

    // Disable simulation for one tick: the world-side velocity is zeroed
    // (and gravity factor with it), so the body holds position, while the
    // authored velocity survives.
    scene.update_body(1, |b| b.simulate = false);
    pipeline.tick(&mut scene);
    let during_disabled = scene.get(1).unwrap().local_transform.unwrap().position;
    assert_eq!(during_disabled, after_first);
    assert_eq!(
        scene.get(1).unwrap().velocity.unwrap().linear,
        Vec3::new(1.0, 0.0, 0.0)
    );

    // Re-enable: the stored velocity drives motion again.
    scene.update_body(1, |b| b.simulate = true);
    pipeline.tick(&mut scene);
    let after_resume = scene.get(1).unwrap().local_transform.unwrap().position;
    assert!(after_resume.x > during_disabled.x);
}

#[test]
fn no_physics_simulation_leaves_the_scene_untouched() {
    let mut scene = PhysicsScene::new();
    scene.add_body(falling_box(1, Vec3::new(0.0, 5.0, 0.0)));

    let step = PhysicsStep {
        simulation: SimulationKind::NoPhysics,
        ..Default::default()
    };
    let mut pipeline = Pipeline::new(step);
    for _ in 0..10 {
        pipeline.tick(&mut scene);
    }

    let body = scene.get(1).unwrap();
    assert_eq!(body.local_transform.unwrap().position, Vec3::new(0.0, 5.0, 0.0));
    assert_eq!(body.velocity.unwrap().linear, Vec3::ZERO);
    // The world itself is still built and published.
    assert_eq!(pipeline.singleton.world.num_dynamic_bodies(), 1);
}

#[test]
fn kinematic_player_motion_matches_prediction_math() {
    use ghostwire::{NetworkTick, PlayerInput};

    let mut scene = PhysicsScene::new();
    let mut desc = BodyDesc::new(1);
    desc.local_transform.as_mut().unwrap().position = Vec3::new(0.0, 1.0, 0.0);
    desc.collider = Some(PhysicsCollider::new(ColliderShape::Capsule {
        radius: 0.3,
        half_height: 0.6,
    }));
    desc.velocity = Some(PhysicsVelocity::default());
    scene.add_body(desc);

    let mut input = PlayerInput::new(NetworkTick::new(1));
    input.set_move_direction([0.0, 0.0, 1.0]);
    input.set_view_angles(0.0, 0.0);

    // Server path: steer the scene body, then let the physics step
    // integrate it as a kinematic body.
    let mut pipeline = Pipeline::new(PhysicsStep::default());
    let mut predicted_position = Vec3::new(0.0, 1.0, 0.0);
    let mut predicted_orientation = Quat::IDENTITY;
    let mut predicted_velocity = Vec3::ZERO;

    for _ in 0..30 {
        let body = scene.get(1).unwrap();
        let transform = body.local_transform.unwrap();
        let mut orientation = transform.rotation;
        let mut velocity = body.velocity.unwrap().linear;
        input.steer(&mut orientation, &mut velocity, 5.0);
        scene.write_motion(
            1,
            transform.position,
            orientation,
            Some(PhysicsVelocity {
                linear: velocity,
                angular: Vec3::ZERO,
            }),
        );
        pipeline.tick(&mut scene);

        // Client path: the shared apply helper.
        input.apply(
            &mut predicted_position,
            &mut predicted_orientation,
            &mut predicted_velocity,
            5.0,
            DT,
        );
    }

    let server_position = scene.get(1).unwrap().local_transform.unwrap().position;
    assert!((server_position - predicted_position).length() < 1e-3);
}

#[test]
fn per_body_smoothing_selection_drives_display_transforms() {
    use ghostwire::physics::{RigidTransform, SmoothingMethod, rebuild_local_to_world, smooth_body};

    let mut scene = PhysicsScene::new();
    let mut desc = falling_box(1, Vec3::ZERO);
    desc.gravity_factor = Some(0.0);
    desc.velocity = Some(PhysicsVelocity {
        linear: Vec3::new(2.0, 0.0, 0.0),
        angular: Vec3::ZERO,
    });
    desc.smoothing = Some(SmoothingMethod::Interpolate);
    scene.add_body(desc);

    let mut pipeline = Pipeline::new(PhysicsStep::default());

    let before = scene.get(1).unwrap().local_transform.unwrap();
    let prev = RigidTransform::new(before.rotation, before.position);
    pipeline.tick(&mut scene);
    let after = scene.get(1).unwrap().local_transform.unwrap();
    let current = RigidTransform::new(after.rotation, after.position);

    let method = scene.get(1).unwrap().smoothing.unwrap();
    let halfway = smooth_body(
        method,
        prev,
        current,
        Vec3::new(2.0, 0.0, 0.0),
        Vec3::ZERO,
        Vec3::new(2.0, 0.0, 0.0),
        Vec3::ZERO,
        0.5,
        DT,
    );
    let expected = (prev.position.x + current.position.x) * 0.5;
    assert!((halfway.position.x - expected).abs() < 1e-5);

    let display = rebuild_local_to_world(halfway, 1.0, None);
    assert!((display.transform_point3(Vec3::ZERO).x - expected).abs() < 1e-5);
}
