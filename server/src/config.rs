//! Tuning for the simulation and the room lifecycle.

use crate::slots::Slot;
use shared::{
    BALL_RADIUS, DEADZONE_HEIGHT, DEADZONE_WIDTH, DEADZONE_X, DEFAULT_TICK_RATE, LANE_X,
    MAX_BALL_SPEED, PADDLE_HEIGHT, PADDLE_SPEED, PADDLE_WIDTH, RECONNECT_GRACE_SECS,
    SEAT_RESERVATION_SECS, WALL_HEIGHT, WALL_WIDTH, WALL_Y,
};
use std::time::Duration;

/// Arena geometry and speeds for one game engine.
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub paddle_speed: f32,
    pub max_ball_speed: f32,
    pub lane_x: f32,
    pub paddle_width: f32,
    pub paddle_height: f32,
    /// Paddles are much denser than the ball so a hit reflects the ball
    /// instead of handing its momentum to the paddle.
    pub paddle_density: f32,
    pub ball_radius: f32,
    pub wall_y: f32,
    pub wall_width: f32,
    pub wall_height: f32,
    pub deadzone_x: f32,
    pub deadzone_width: f32,
    pub deadzone_height: f32,
    /// Fixed seed for ball serves; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            paddle_speed: PADDLE_SPEED,
            max_ball_speed: MAX_BALL_SPEED,
            lane_x: LANE_X,
            paddle_width: PADDLE_WIDTH,
            paddle_height: PADDLE_HEIGHT,
            paddle_density: 1000.0,
            ball_radius: BALL_RADIUS,
            wall_y: WALL_Y,
            wall_width: WALL_WIDTH,
            wall_height: WALL_HEIGHT,
            deadzone_x: DEADZONE_X,
            deadzone_width: DEADZONE_WIDTH,
            deadzone_height: DEADZONE_HEIGHT,
            seed: None,
        }
    }
}

impl GameConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// X position of the paddle lane for a slot.
    pub fn lane_x(&self, slot: Slot) -> f32 {
        slot.lane_sign() * self.lane_x
    }
}

/// Timing of a room's scheduler and timers.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Period of the fixed-step tick.
    pub tick_interval: Duration,
    /// How long a non-consented leave keeps the session's seat.
    pub reconnect_grace: Duration,
    /// How long a freshly created room waits for its first participant.
    pub seat_reservation: Duration,
    pub game: GameConfig,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            tick_interval: tick_interval(DEFAULT_TICK_RATE),
            reconnect_grace: Duration::from_secs(RECONNECT_GRACE_SECS),
            seat_reservation: Duration::from_secs(SEAT_RESERVATION_SECS),
            game: GameConfig::default(),
        }
    }
}

impl RoomConfig {
    /// Fixed step length in seconds.
    pub fn dt(&self) -> f32 {
        self.tick_interval.as_secs_f32()
    }
}

/// Settings of the UDP front end.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_clients: usize,
    /// Silence after which a client counts as dropped.
    pub client_timeout: Duration,
    pub room: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 64,
            client_timeout: Duration::from_secs(10),
            room: RoomConfig::default(),
        }
    }
}

/// Converts a tick rate in Hz into a tick period. Zero is treated as 1 Hz.
pub fn tick_interval(tick_rate: u32) -> Duration {
    Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_lane_positions() {
        let config = GameConfig::new();
        assert_eq!(config.lane_x(Slot::Player0), -700.0);
        assert_eq!(config.lane_x(Slot::Player1), 700.0);
    }

    #[test]
    fn test_default_room_timing() {
        let config = RoomConfig::default();
        assert_approx_eq!(config.dt(), 1.0 / 60.0);
        assert_eq!(config.reconnect_grace, Duration::from_secs(5));
        assert_eq!(config.seat_reservation, Duration::from_secs(20));
    }

    #[test]
    fn test_tick_interval_guards_zero() {
        assert_eq!(tick_interval(0), Duration::from_secs(1));
        assert_eq!(tick_interval(20), Duration::from_millis(50));
    }

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_clients, 64);
        assert_eq!(config.client_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_seeded_config() {
        let config = GameConfig::new().with_seed(7);
        assert_eq!(config.seed, Some(7));
        assert_eq!(GameConfig::default().seed, None);
    }
}
