use glam::{Quat, Vec3};

use ghostwire::{CommandBuffer, NetworkTick, PlayerInput};

const HISTORY_CAP: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedState {
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
}

impl Default for PredictedState {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1.0, 0.0),
            orientation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
        }
    }
}

impl PredictedState {
    fn advance(&mut self, input: &PlayerInput, move_speed: f32, dt: f32) {
        input.apply(
            &mut self.position,
            &mut self.orientation,
            &mut self.velocity,
            move_speed,
            dt,
        );
    }
}

/// Client-side prediction of the local player: a tick-keyed ring of
/// predicted states, compared against authoritative snapshots and rewound
/// when they disagree.
pub struct Prediction {
    history: Vec<Option<(NetworkTick, PredictedState)>>,
    current: PredictedState,
    last_tick: NetworkTick,
    move_speed: f32,
    dt: f32,
}

impl Prediction {
    pub fn new(move_speed: f32, tick_rate: u32) -> Self {
        Self {
            history: vec![None; HISTORY_CAP],
            current: PredictedState::default(),
            last_tick: NetworkTick::INVALID,
            move_speed,
            dt: 1.0 / tick_rate as f32,
        }
    }

    pub fn current(&self) -> &PredictedState {
        &self.current
    }

    /// Predicts one tick forward with the freshly gathered input.
    pub fn advance(&mut self, input: &PlayerInput, tick: NetworkTick) {
        self.current.advance(input, self.move_speed, self.dt);
        self.store(tick, self.current);
        self.last_tick = tick;
    }

    pub fn get(&self, tick: NetworkTick) -> Option<PredictedState> {
        if !tick.is_valid() {
            return None;
        }
        let slot = self.history[tick.to_wire() as usize % HISTORY_CAP];
        slot.filter(|(t, _)| *t == tick).map(|(_, state)| state)
    }

    /// Measures prediction error against an authoritative state, then
    /// rewinds to it and replays the buffered inputs up to the present.
    /// Returns `[position_error, velocity_error]` when the compared tick was
    /// still in the history.
    pub fn reconcile(
        &mut self,
        tick: NetworkTick,
        server_position: Vec3,
        server_velocity: Vec3,
        buffer: &CommandBuffer<PlayerInput>,
    ) -> Option<[f32; 2]> {
        let predicted = self.get(tick)?;
        let errors = [
            (predicted.position - server_position).length(),
            (predicted.velocity - server_velocity).length(),
        ];

        let mut state = PredictedState {
            position: server_position,
            orientation: predicted.orientation,
            velocity: server_velocity,
        };
        self.store(tick, state);

        if self.last_tick.is_valid() && self.last_tick.is_newer_than(tick) {
            let mut t = tick.increment();
            loop {
                if let Some(input) = buffer.get_at(t) {
                    state.advance(input, self.move_speed, self.dt);
                }
                self.store(t, state);
                if t == self.last_tick {
                    break;
                }
                t = t.increment();
                if !t.is_valid() {
                    break;
                }
            }
        }
        self.current = state;
        Some(errors)
    }

    fn store(&mut self, tick: NetworkTick, state: PredictedState) {
        self.history[tick.to_wire() as usize % HISTORY_CAP] = Some((tick, state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward_input(tick: u32) -> PlayerInput {
        let mut input = PlayerInput::new(NetworkTick::new(tick));
        input.set_move_direction([0.0, 0.0, 1.0]);
        input
    }

    #[test]
    fn perfect_server_agreement_measures_zero_error() {
        let mut prediction = Prediction::new(5.0, 60);
        let mut buffer = CommandBuffer::new();

        for t in 1..=10u32 {
            let input = forward_input(t);
            buffer.add(input);
            prediction.advance(&input, NetworkTick::new(t));
        }

        // Server agrees exactly with what we predicted at tick 5.
        let predicted = prediction.get(NetworkTick::new(5)).unwrap();
        let errors = prediction
            .reconcile(
                NetworkTick::new(5),
                predicted.position,
                predicted.velocity,
                &buffer,
            )
            .unwrap();
        assert!(errors[0] < 1e-6);
        assert!(errors[1] < 1e-6);

        // Replay reproduces the same present.
        let replayed = prediction.get(NetworkTick::new(10)).unwrap();
        assert!((replayed.position - prediction.current().position).length() < 1e-6);
    }

    #[test]
    fn divergence_is_measured_and_corrected() {
        let mut prediction = Prediction::new(5.0, 60);
        let mut buffer = CommandBuffer::new();

        for t in 1..=6u32 {
            let input = forward_input(t);
            buffer.add(input);
            prediction.advance(&input, NetworkTick::new(t));
        }

        let predicted = prediction.get(NetworkTick::new(3)).unwrap();
        let server_position = predicted.position + Vec3::new(1.0, 0.0, 0.0);
        let errors = prediction
            .reconcile(
                NetworkTick::new(3),
                server_position,
                predicted.velocity,
                &buffer,
            )
            .unwrap();
        assert!((errors[0] - 1.0).abs() < 1e-5);

        // The correction carries through the replayed ticks.
        let corrected = prediction.get(NetworkTick::new(6)).unwrap();
        assert!((corrected.position.x - 1.0).abs() < 1e-4);
    }

    #[test]
    fn stale_ticks_fall_out_of_history() {
        let mut prediction = Prediction::new(5.0, 60);
        let buffer = CommandBuffer::new();
        for t in 1..=(HISTORY_CAP as u32 + 10) {
            prediction.advance(&forward_input(t), NetworkTick::new(t));
        }
        assert!(
            prediction
                .reconcile(NetworkTick::new(2), Vec3::ZERO, Vec3::ZERO, &buffer)
                .is_none()
        );
    }
}
