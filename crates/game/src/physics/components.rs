use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Rotation plus translation; scale and shear live outside the physics
/// representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub rotation: Quat,
    pub position: Vec3,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidTransform {
    pub const IDENTITY: RigidTransform = RigidTransform {
        rotation: Quat::IDENTITY,
        position: Vec3::ZERO,
    };

    pub fn new(rotation: Quat, position: Vec3) -> Self {
        Self { rotation, position }
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * point + self.position
    }

    /// Extracts rotation and translation out of an affine matrix; scale and
    /// shear are discarded.
    pub fn from_matrix(matrix: &Mat4) -> Self {
        let translation = matrix.w_axis.truncate();
        let x = matrix.x_axis.truncate().normalize_or_zero();
        let y = matrix.y_axis.truncate().normalize_or_zero();
        let z = matrix.z_axis.truncate().normalize_or_zero();
        let rotation = Quat::from_mat3(&glam::Mat3::from_cols(x, y, z)).normalize();
        Self {
            rotation,
            position: translation,
        }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn expanded(&self, margin: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ColliderShape {
    Sphere { radius: f32 },
    Capsule { radius: f32, half_height: f32 },
    Box { half_extents: Vec3 },
}

impl ColliderShape {
    pub fn local_aabb(&self) -> Aabb {
        match self {
            Self::Sphere { radius } => {
                Aabb::new(Vec3::splat(-radius), Vec3::splat(*radius))
            }
            Self::Capsule {
                radius,
                half_height,
            } => {
                let extent = Vec3::new(*radius, half_height + radius, *radius);
                Aabb::new(-extent, extent)
            }
            Self::Box { half_extents } => Aabb::new(-*half_extents, *half_extents),
        }
    }

    /// Conservative world-space bounds: the local box is swept through the
    /// rotation by taking the eight transformed corners.
    pub fn world_aabb(&self, transform: &RigidTransform, uniform_scale: f32) -> Aabb {
        let local = self.local_aabb();
        let mut result = Aabb::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { local.min.x } else { local.max.x },
                if i & 2 == 0 { local.min.y } else { local.max.y },
                if i & 4 == 0 { local.min.z } else { local.max.z },
            ) * uniform_scale;
            let world = transform.transform_point(corner);
            result.min = result.min.min(world);
            result.max = result.max.max(world);
        }
        result
    }
}

/// Category mask pair; bodies collide when each belongs to a category the
/// other accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionFilter {
    pub belongs_to: u32,
    pub collides_with: u32,
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self {
            belongs_to: u32::MAX,
            collides_with: u32::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsCollider {
    pub shape: ColliderShape,
    pub filter: CollisionFilter,
}

impl PhysicsCollider {
    pub fn new(shape: ColliderShape) -> Self {
        Self {
            shape,
            filter: CollisionFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhysicsVelocity {
    pub linear: Vec3,
    pub angular: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsMass {
    pub inverse_mass: f32,
    pub inverse_inertia: Vec3,
    pub center_of_mass: Vec3,
}

impl PhysicsMass {
    /// Mass properties of a solid sphere of the given mass and radius.
    pub fn sphere(mass: f32, radius: f32) -> Self {
        let inertia = 0.4 * mass * radius * radius;
        Self {
            inverse_mass: 1.0 / mass,
            inverse_inertia: Vec3::splat(1.0 / inertia),
            center_of_mass: Vec3::ZERO,
        }
    }

    /// Infinite-mass properties; the body ignores forces entirely.
    pub fn kinematic() -> Self {
        Self {
            inverse_mass: 0.0,
            inverse_inertia: Vec3::ZERO,
            center_of_mass: Vec3::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhysicsMassOverride {
    pub is_kinematic: bool,
    pub set_velocity_to_zero: bool,
}

/// Per-body display smoothing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmoothingMethod {
    Extrapolate,
    Interpolate,
    InterpolateVelocity,
}

/// Authoring-space transform; `scale` is uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTransform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: f32,
}

impl Default for LocalTransform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rigid_decomposition_ignores_scale() {
        let rotation = Quat::from_rotation_y(0.7);
        let translation = Vec3::new(1.0, 2.0, 3.0);
        let matrix = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 3.0, 0.5),
            rotation,
            translation,
        );

        let rigid = RigidTransform::from_matrix(&matrix);
        assert!((rigid.position - translation).length() < 1e-5);
        assert!(rigid.rotation.dot(rotation).abs() > 0.9999);
    }

    #[test]
    fn world_aabb_covers_rotated_box() {
        let shape = ColliderShape::Box {
            half_extents: Vec3::new(1.0, 0.1, 0.1),
        };
        let transform = RigidTransform::new(
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            Vec3::ZERO,
        );
        let aabb = shape.world_aabb(&transform, 1.0);
        // The long axis now points along z.
        assert!(aabb.max.z > 0.9);
        assert!(aabb.max.x < 0.2);
    }

    #[test]
    fn aabb_overlap() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(0.5), Vec3::splat(2.0));
        let c = Aabb::new(Vec3::splat(1.5), Vec3::splat(2.0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn capsule_aabb_includes_caps() {
        let shape = ColliderShape::Capsule {
            radius: 0.5,
            half_height: 1.0,
        };
        let aabb = shape.local_aabb();
        assert_eq!(aabb.max.y, 1.5);
        assert_eq!(aabb.max.x, 0.5);
    }
}
