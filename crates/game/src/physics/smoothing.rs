use glam::{Mat4, Quat, Vec3};

use super::components::{RigidTransform, SmoothingMethod};

/// Advances the current transform along its velocities; used when the render
/// clock runs ahead of the last physics tick.
pub fn extrapolate(
    current: RigidTransform,
    linear: Vec3,
    angular: Vec3,
    dt: f32,
) -> RigidTransform {
    let position = current.position + linear * dt;
    let rotation = if angular == Vec3::ZERO {
        current.rotation
    } else {
        (Quat::from_scaled_axis(angular * dt) * current.rotation).normalize()
    };
    RigidTransform::new(rotation, position)
}

/// Nlerp between the previous and current tick's transforms by the
/// normalized time-ahead in [0, 1].
pub fn interpolate(prev: RigidTransform, current: RigidTransform, alpha: f32) -> RigidTransform {
    let alpha = alpha.clamp(0.0, 1.0);
    let position = prev.position.lerp(current.position, alpha);
    let rotation = nlerp(prev.rotation, current.rotation, alpha);
    RigidTransform::new(rotation, position)
}

/// Integrates the previous transform with the previous velocity for the
/// first `(1 - alpha)·dt`, then with the linearly blended velocity for the
/// remaining `alpha·dt`. Smoother than plain interpolation when velocities
/// change sharply between ticks.
pub fn interpolate_using_velocity(
    prev: RigidTransform,
    prev_linear: Vec3,
    prev_angular: Vec3,
    current_linear: Vec3,
    current_angular: Vec3,
    alpha: f32,
    dt: f32,
) -> RigidTransform {
    let alpha = alpha.clamp(0.0, 1.0);
    let first = extrapolate(prev, prev_linear, prev_angular, (1.0 - alpha) * dt);
    let blended_linear = prev_linear.lerp(current_linear, alpha);
    let blended_angular = prev_angular.lerp(current_angular, alpha);
    extrapolate(first, blended_linear, blended_angular, alpha * dt)
}

/// Applies the per-body strategy selection.
#[allow(clippy::too_many_arguments)]
pub fn smooth_body(
    method: SmoothingMethod,
    prev: RigidTransform,
    current: RigidTransform,
    prev_linear: Vec3,
    prev_angular: Vec3,
    current_linear: Vec3,
    current_angular: Vec3,
    alpha: f32,
    dt: f32,
) -> RigidTransform {
    match method {
        SmoothingMethod::Extrapolate => {
            extrapolate(current, current_linear, current_angular, alpha * dt)
        }
        SmoothingMethod::Interpolate => interpolate(prev, current, alpha),
        SmoothingMethod::InterpolateVelocity => interpolate_using_velocity(
            prev,
            prev_linear,
            prev_angular,
            current_linear,
            current_angular,
            alpha,
            dt,
        ),
    }
}

/// Recomposes a display matrix from the smoothed transform, preserving any
/// post-transform matrix (render-only scale or offset).
pub fn rebuild_local_to_world(
    smoothed: RigidTransform,
    uniform_scale: f32,
    post_transform: Option<Mat4>,
) -> Mat4 {
    let rigid = Mat4::from_scale_rotation_translation(
        Vec3::splat(uniform_scale),
        smoothed.rotation,
        smoothed.position,
    );
    match post_transform {
        Some(post) => rigid * post,
        None => rigid,
    }
}

fn nlerp(a: Quat, b: Quat, t: f32) -> Quat {
    let b = if a.dot(b) < 0.0 { -b } else { b };
    (a * (1.0 - t) + b * t).normalize()
}
