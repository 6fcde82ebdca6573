use bitflags::bitflags;
use glam::{Quat, Vec3};

use crate::command::Command;
use crate::tick::NetworkTick;
use crate::wire::{ByteReader, ByteWriter, WireError};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputButtons: u16 {
        const SPRINT = 1 << 0;
        const JUMP = 1 << 1;
        const CROUCH = 1 << 2;
        const FIRE1 = 1 << 3;
        const FIRE2 = 1 << 4;
        const USE = 1 << 5;
        const RELOAD = 1 << 6;
    }
}

// Delta change-mask bits: one per field group.
const DELTA_MOVE: u8 = 1 << 0;
const DELTA_VIEW: u8 = 1 << 1;
const DELTA_BUTTONS: u8 = 1 << 2;

/// One tick of player intent: quantised movement axes, view angles, and a
/// button set. Small and value-like; the full body is nine bytes, an
/// unchanged delta is one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerInput {
    pub tick: NetworkTick,
    move_axes: [i8; 3],
    view_angles: [i16; 2],
    pub buttons: InputButtons,
}

impl PlayerInput {
    pub fn new(tick: NetworkTick) -> Self {
        Self {
            tick,
            ..Default::default()
        }
    }

    pub fn set_move_direction(&mut self, dir: [f32; 3]) {
        self.move_axes = [
            (dir[0].clamp(-1.0, 1.0) * 127.0) as i8,
            (dir[1].clamp(-1.0, 1.0) * 127.0) as i8,
            (dir[2].clamp(-1.0, 1.0) * 127.0) as i8,
        ];
    }

    pub fn move_direction(&self) -> [f32; 3] {
        [
            self.move_axes[0] as f32 / 127.0,
            self.move_axes[1] as f32 / 127.0,
            self.move_axes[2] as f32 / 127.0,
        ]
    }

    pub fn set_view_angles(&mut self, yaw: f32, pitch: f32) {
        self.view_angles = [
            (wrap_angle(yaw) * 10000.0) as i16,
            (pitch * 10000.0) as i16,
        ];
    }

    pub fn view_angles(&self) -> (f32, f32) {
        (
            self.view_angles[0] as f32 / 10000.0,
            self.view_angles[1] as f32 / 10000.0,
        )
    }

    /// Turns this input into a velocity and facing. The position itself is
    /// integrated by the physics step (the body is kinematic), so steering
    /// touches only velocity and orientation.
    pub fn steer(&self, orientation: &mut Quat, velocity: &mut Vec3, move_speed: f32) {
        let (yaw, pitch) = self.view_angles();
        let dir = self.move_direction();

        let speed = if self.buttons.contains(InputButtons::SPRINT) {
            move_speed * 2.0
        } else {
            move_speed
        };

        let planar = Vec3::new(dir[0], 0.0, dir[2]);
        if planar.length_squared() > 0.001 {
            let normalized = planar.normalize();
            let (sin_yaw, cos_yaw) = yaw.sin_cos();
            let world_move = Vec3::new(
                normalized.x * cos_yaw + normalized.z * sin_yaw,
                0.0,
                -normalized.x * sin_yaw + normalized.z * cos_yaw,
            );
            velocity.x = world_move.x * speed;
            velocity.z = world_move.z * speed;
        } else {
            velocity.x = 0.0;
            velocity.z = 0.0;
        }

        *orientation = Quat::from_euler(glam::EulerRot::YXZ, yaw, -pitch, 0.0);
    }

    /// Steering plus the kinematic position integration the physics step
    /// performs; client prediction uses this to mirror the server exactly.
    pub fn apply(
        &self,
        position: &mut Vec3,
        orientation: &mut Quat,
        velocity: &mut Vec3,
        move_speed: f32,
        dt: f32,
    ) {
        self.steer(orientation, velocity, move_speed);
        *position += *velocity * dt;
    }
}

/// Maps an angle into `[-π, π)` so the i16 quantisation never saturates.
fn wrap_angle(angle: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    (angle + PI).rem_euclid(TAU) - PI
}

impl Command for PlayerInput {
    const STABLE_NAME: &'static str = "ghostwire.PlayerInput";

    fn tick(&self) -> NetworkTick {
        self.tick
    }

    fn set_tick(&mut self, tick: NetworkTick) {
        self.tick = tick;
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.write_i8(self.move_axes[0]);
        w.write_i8(self.move_axes[1]);
        w.write_i8(self.move_axes[2]);
        w.write_i16(self.view_angles[0]);
        w.write_i16(self.view_angles[1]);
        w.write_u16(self.buttons.bits());
    }

    fn encode_delta(&self, w: &mut ByteWriter, baseline: &Self) {
        let mut mask = 0u8;
        if self.move_axes != baseline.move_axes {
            mask |= DELTA_MOVE;
        }
        if self.view_angles != baseline.view_angles {
            mask |= DELTA_VIEW;
        }
        if self.buttons != baseline.buttons {
            mask |= DELTA_BUTTONS;
        }
        w.write_u8(mask);

        if mask & DELTA_MOVE != 0 {
            w.write_i8(self.move_axes[0]);
            w.write_i8(self.move_axes[1]);
            w.write_i8(self.move_axes[2]);
        }
        if mask & DELTA_VIEW != 0 {
            w.write_i16(self.view_angles[0]);
            w.write_i16(self.view_angles[1]);
        }
        if mask & DELTA_BUTTONS != 0 {
            w.write_u16(self.buttons.bits());
        }
    }

    fn decode(r: &mut ByteReader) -> Result<Self, WireError> {
        Ok(Self {
            tick: NetworkTick::INVALID,
            move_axes: [r.read_i8()?, r.read_i8()?, r.read_i8()?],
            view_angles: [r.read_i16()?, r.read_i16()?],
            buttons: InputButtons::from_bits_truncate(r.read_u16()?),
        })
    }

    fn decode_delta(r: &mut ByteReader, baseline: &Self) -> Result<Self, WireError> {
        let mut input = *baseline;
        input.tick = NetworkTick::INVALID;

        let mask = r.read_u8()?;
        if mask & DELTA_MOVE != 0 {
            input.move_axes = [r.read_i8()?, r.read_i8()?, r.read_i8()?];
        }
        if mask & DELTA_VIEW != 0 {
            input.view_angles = [r.read_i16()?, r.read_i16()?];
        }
        if mask & DELTA_BUTTONS != 0 {
            input.buttons = InputButtons::from_bits_truncate(r.read_u16()?);
        }
        Ok(input)
    }
}
