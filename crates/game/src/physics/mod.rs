mod broadphase;
mod build;
mod components;
mod multiworld;
mod scene;
mod smoothing;
mod step;
mod world;

pub use broadphase::{Broadphase, BroadphaseEntry};
pub use build::{BuildPhysicsWorld, export_physics_world};
pub use components::{
    Aabb, ColliderShape, CollisionFilter, LocalTransform, PhysicsCollider, PhysicsMass,
    PhysicsMassOverride, PhysicsVelocity, RigidTransform, SmoothingMethod,
};
pub use multiworld::MultiWorldGroup;
pub use scene::{BodyDesc, JointDesc, PhysicsScene, SceneVersions};
pub use smoothing::{
    extrapolate, interpolate, interpolate_using_velocity, rebuild_local_to_world, smooth_body,
};
pub use step::{
    NoPhysicsSimulation, PhysicsStep, Simulation, SimulationKind, SimulationSingleton,
    SolverStabilization, StandardSimulation,
};
pub use world::{Joint, MotionData, MotionVelocity, PhysicsWorld, PhysicsWorldSingleton, RigidBody};
