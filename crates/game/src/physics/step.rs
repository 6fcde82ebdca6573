use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::world::PhysicsWorld;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SimulationKind {
    /// Installs a dummy simulation that satisfies the singleton contract
    /// without doing any work.
    NoPhysics,
    #[default]
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverStabilization {
    pub enabled: bool,
    /// Velocities below this magnitude are clipped to zero.
    pub velocity_clipping_factor: f32,
    pub inertia_scaling_factor: f32,
}

impl Default for SolverStabilization {
    fn default() -> Self {
        Self {
            enabled: false,
            velocity_clipping_factor: 0.01,
            inertia_scaling_factor: 1.0,
        }
    }
}

/// Simulation-wide step configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsStep {
    pub simulation: SimulationKind,
    pub gravity: Vec3,
    pub solver_iterations: u32,
    pub multi_threaded: bool,
    pub stabilization: SolverStabilization,
    /// Requests a post-step refresh of the dynamic broadphase.
    pub synchronize_collision_world: bool,
}

impl Default for PhysicsStep {
    fn default() -> Self {
        Self {
            simulation: SimulationKind::Standard,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            solver_iterations: 4,
            multi_threaded: false,
            stabilization: SolverStabilization::default(),
            synchronize_collision_world: false,
        }
    }
}

/// The solver seam: steps the packed body arrays in place. Internals are
/// interchangeable; everything upstream only depends on this contract.
pub trait Simulation {
    fn kind(&self) -> SimulationKind;
    fn step(&mut self, world: &mut PhysicsWorld, step: &PhysicsStep, dt: f32);
}

pub struct NoPhysicsSimulation;

impl Simulation for NoPhysicsSimulation {
    fn kind(&self) -> SimulationKind {
        SimulationKind::NoPhysics
    }

    fn step(&mut self, _world: &mut PhysicsWorld, _step: &PhysicsStep, _dt: f32) {}
}

/// Velocity/position integrator over the motion arrays: gravity scaled per
/// body, velocity integration in substeps, optional low-velocity clipping.
pub struct StandardSimulation;

impl Simulation for StandardSimulation {
    fn kind(&self) -> SimulationKind {
        SimulationKind::Standard
    }

    fn step(&mut self, world: &mut PhysicsWorld, step: &PhysicsStep, dt: f32) {
        let substeps = step.solver_iterations.max(1);
        let sub_dt = dt / substeps as f32;

        for _ in 0..substeps {
            for i in 0..world.num_dynamic_bodies() {
                let velocity = &mut world.motion_velocities[i];
                let motion = &mut world.motion_datas[i];

                if !velocity.is_kinematic() {
                    velocity.linear += step.gravity * motion.gravity_factor * sub_dt;
                    if step.stabilization.enabled
                        && velocity.linear.length_squared()
                            < step.stabilization.velocity_clipping_factor
                                * step.stabilization.velocity_clipping_factor
                    {
                        velocity.linear = Vec3::ZERO;
                    }
                }

                motion.world_from_motion.position += velocity.linear * sub_dt;
                if velocity.angular != Vec3::ZERO {
                    let spin = Quat::from_scaled_axis(velocity.angular * sub_dt);
                    motion.world_from_motion.rotation =
                        (spin * motion.world_from_motion.rotation).normalize();
                }
            }
        }

        for i in 0..world.num_dynamic_bodies() {
            world.bodies[i].world_from_body = world.motion_datas[i].world_from_motion;
        }

        if step.synchronize_collision_world {
            let num_dynamic = world.num_dynamic_bodies();
            let (bodies, broadphase) = (&world.bodies, &mut world.broadphase);
            broadphase.refresh_dynamic(bodies, num_dynamic);
        }
    }
}

/// Owns the solver chosen by `PhysicsStep::simulation`.
pub struct SimulationSingleton {
    simulation: Box<dyn Simulation>,
}

impl SimulationSingleton {
    pub fn new(kind: SimulationKind) -> Self {
        let simulation: Box<dyn Simulation> = match kind {
            SimulationKind::NoPhysics => Box::new(NoPhysicsSimulation),
            SimulationKind::Standard => Box::new(StandardSimulation),
        };
        Self { simulation }
    }

    pub fn kind(&self) -> SimulationKind {
        self.simulation.kind()
    }

    /// Swaps the solver when the configured kind changed.
    pub fn ensure_kind(&mut self, kind: SimulationKind) {
        if self.kind() != kind {
            *self = Self::new(kind);
        }
    }

    pub fn step(&mut self, world: &mut PhysicsWorld, step: &PhysicsStep, dt: f32) {
        self.simulation.step(world, step, dt);
    }
}
