use crate::tick::NetworkTick;

/// Extra ticks of command lead the client keeps over its RTT estimate, so
/// inputs still land in time when the link degrades between snapshots.
const COMMAND_SLACK_TICKS: u32 = 2;

const DEFAULT_INTERPOLATION_DELAY_TICKS: u32 = 2;

/// Client-side clock: the predicted server tick inputs should target, and
/// the delayed tick remote ghosts are displayed at.
#[derive(Debug, Clone)]
pub struct NetworkTime {
    tick_rate: u32,
    server_tick: NetworkTick,
    server_tick_fraction: f32,
    interpolation_tick: NetworkTick,
    interpolation_fraction: f32,
    last_full_server_tick: NetworkTick,
    interpolation_delay_config: u32,
}

impl NetworkTime {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick_rate,
            server_tick: NetworkTick::INVALID,
            server_tick_fraction: 0.0,
            interpolation_tick: NetworkTick::INVALID,
            interpolation_fraction: 0.0,
            last_full_server_tick: NetworkTick::INVALID,
            interpolation_delay_config: DEFAULT_INTERPOLATION_DELAY_TICKS,
        }
    }

    pub fn with_interpolation_delay(tick_rate: u32, delay_ticks: u32) -> Self {
        Self {
            interpolation_delay_config: delay_ticks,
            ..Self::new(tick_rate)
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// The tick newly gathered inputs should execute on.
    pub fn input_target_tick(&self) -> NetworkTick {
        self.server_tick
    }

    pub fn interpolation_tick(&self) -> NetworkTick {
        self.interpolation_tick
    }

    /// Newest full tick reported by the server.
    pub fn last_full_server_tick(&self) -> NetworkTick {
        self.last_full_server_tick
    }

    pub fn is_synchronized(&self) -> bool {
        self.server_tick.is_valid()
    }

    /// Re-aims the predicted target tick from a freshly received snapshot:
    /// the server is at `tick`, our commands take about half an RTT to
    /// arrive, plus a fixed slack margin.
    pub fn observe_snapshot(&mut self, tick: NetworkTick, rtt_ms: f32) {
        if !tick.is_valid() {
            return;
        }
        if self.last_full_server_tick.is_valid()
            && !tick.is_newer_than(self.last_full_server_tick)
        {
            return;
        }
        self.last_full_server_tick = tick;

        let rtt_ticks = ((rtt_ms / 1000.0) * self.tick_rate as f32 * 0.5).ceil() as u32;
        self.server_tick = tick.advance(rtt_ticks + COMMAND_SLACK_TICKS);
        self.interpolation_tick = tick.subtract(self.interpolation_delay_config);
        if !self.interpolation_tick.is_valid() {
            self.interpolation_tick = tick;
        }
    }

    /// Steps both clocks by one full simulation tick.
    pub fn advance_tick(&mut self) {
        self.server_tick = self.server_tick.increment();
        self.interpolation_tick = self.interpolation_tick.increment();
    }

    /// Updates the sub-tick fractions; both in [0, 1).
    pub fn set_fractions(&mut self, server_fraction: f32, interpolation_fraction: f32) {
        self.server_tick_fraction = server_fraction.clamp(0.0, 1.0);
        self.interpolation_fraction = interpolation_fraction.clamp(0.0, 1.0);
    }

    /// The delay reported in every command header: whole ticks between the
    /// predicted and the interpolated timeline, corrected by the fractional
    /// remainder of both clocks.
    pub fn interpolation_delay_ticks(&self) -> u32 {
        if !self.server_tick.is_valid() || !self.interpolation_tick.is_valid() {
            return 0;
        }
        let mut delay = self.server_tick.ticks_since(self.interpolation_tick);
        let rem = (1.0 - self.interpolation_fraction) - (1.0 - self.server_tick_fraction);
        if rem >= 1.0 {
            delay += 1;
        } else if rem < 0.0 {
            delay -= 1;
        }
        delay.max(0) as u32
    }
}
