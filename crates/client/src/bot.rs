use clap::ValueEnum;

use ghostwire::{InputButtons, NetworkTick, PlayerInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BotPattern {
    /// Run forward while slowly turning.
    Circle,
    /// Strafe left and right on a fixed period.
    Strafe,
    /// Send empty inputs (heartbeat only).
    Idle,
}

/// Deterministic input source standing in for a human player; the pattern
/// only depends on the tick, so reconnects and replays produce identical
/// streams.
pub struct BotDriver {
    pattern: BotPattern,
}

impl BotDriver {
    pub fn new(pattern: BotPattern) -> Self {
        Self { pattern }
    }

    pub fn sample(&self, tick: NetworkTick) -> PlayerInput {
        let mut input = PlayerInput::new(tick);
        let t = tick.to_wire();

        match self.pattern {
            BotPattern::Circle => {
                input.set_move_direction([0.0, 0.0, 1.0]);
                input.set_view_angles(t as f32 * 0.02, 0.0);
                if t % 256 < 64 {
                    input.buttons |= InputButtons::SPRINT;
                }
            }
            BotPattern::Strafe => {
                let side = if t % 120 < 60 { 1.0 } else { -1.0 };
                input.set_move_direction([side, 0.0, 0.0]);
                if t % 300 == 0 {
                    input.buttons |= InputButtons::JUMP;
                }
            }
            BotPattern::Idle => {}
        }
        input
    }
}
