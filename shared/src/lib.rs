use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Paddle travel speed in world units per second (18 units per 60 Hz step).
pub const PADDLE_SPEED: f32 = 1080.0;
/// Ball speed in world units per second; the ball always travels at exactly this speed.
pub const MAX_BALL_SPEED: f32 = 720.0;
/// Horizontal distance of each paddle lane from the origin.
pub const LANE_X: f32 = 700.0;
pub const PADDLE_WIDTH: f32 = 35.0;
pub const PADDLE_HEIGHT: f32 = 200.0;
pub const BALL_RADIUS: f32 = 50.0;
pub const WALL_Y: f32 = 500.0;
pub const WALL_WIDTH: f32 = 2500.0;
pub const WALL_HEIGHT: f32 = 25.0;
pub const DEADZONE_X: f32 = 1000.0;
pub const DEADZONE_WIDTH: f32 = 100.0;
pub const DEADZONE_HEIGHT: f32 = 1000.0;

pub const DEFAULT_TICK_RATE: u32 = 60;
pub const RECONNECT_GRACE_SECS: u64 = 5;
pub const SEAT_RESERVATION_SECS: u64 = 20;

/// Receive buffer size on both ends of the socket. Large enough for the state
/// of a full server's worth of participants in one room.
pub const MAX_PACKET_SIZE: usize = 16384;

/// Longest accepted `userId` or `username`, in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// Message names understood by rooms and sent to clients.
pub mod messages {
    pub const PLAYER_POSITION: &str = "playerPosition";
    pub const SPECTATOR_CUBE_POSITION: &str = "spectatorCubePosition";
    pub const WELCOME_MESSAGE: &str = "welcomeMessage";
    pub const WELCOME_TEXT: &str = "Welcome!";
}

pub type SessionId = String;

/// Envelope exchanged over UDP. Option objects and message payloads are JSON
/// text, mirroring the host framework which hands rooms untyped objects.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    JoinOrCreate {
        options: String,
    },
    Reconnect {
        room_id: String,
        session_id: SessionId,
    },
    Message {
        kind: String,
        payload: String,
    },
    Leave,
    Heartbeat,

    Joined {
        room_id: String,
        session_id: SessionId,
        role: RoleKind,
    },
    State {
        state: RoomState,
    },
    Rejected {
        reason: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Player0,
    Player1,
    Spectator,
}

/// What a participant is allowed to occupy in the room.
///
/// Players only carry a vertical position (their lane is fixed by their slot),
/// spectators carry a free position reported by their client.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum Role {
    Player { y: f32 },
    Spectator { x: f32, y: f32 },
}

impl Role {
    pub fn is_player(&self) -> bool {
        matches!(self, Role::Player { .. })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Participant {
    pub user_id: String,
    pub connected: bool,
    pub role: Role,
}

impl Participant {
    pub fn player(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            connected: true,
            role: Role::Player { y: 0.0 },
        }
    }

    pub fn spectator(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            connected: true,
            role: Role::Spectator { x: 0.0, y: 0.0 },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BallState {
    pub x: f32,
    pub y: f32,
    pub is_new: bool,
    /// Session whose paddle touched the ball last; `None` after a fresh serve.
    pub last_hit_by: Option<SessionId>,
}

impl Default for BallState {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            is_new: true,
            last_hit_by: None,
        }
    }
}

/// The replicated state of one room. Every change is pushed to the room's
/// connected clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RoomState {
    pub tick: u32,
    pub participants: BTreeMap<SessionId, Participant>,
    pub ball: BallState,
    pub scoreboard: BTreeMap<SessionId, u32>,
    pub usernames: BTreeMap<SessionId, String>,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score_of(&self, session_id: &str) -> Option<u32> {
        self.scoreboard.get(session_id).copied()
    }

    pub fn player_count(&self) -> usize {
        self.participants
            .values()
            .filter(|p| p.role.is_player())
            .count()
    }
}

/// Paddle input direction. Only the exact values `1` and `-1` are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn from_value(value: &Value) -> Option<Self> {
        let n = value.as_f64()?;
        if n == 1.0 {
            Some(Direction::Up)
        } else if n == -1.0 {
            Some(Direction::Down)
        } else {
            None
        }
    }

    pub fn from_json(payload: &str) -> Option<Self> {
        serde_json::from_str::<Value>(payload)
            .ok()
            .and_then(|v| Self::from_value(&v))
    }

    pub fn sign(self) -> f32 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
        }
    }

    pub fn to_json(self) -> String {
        match self {
            Direction::Up => "1".to_string(),
            Direction::Down => "-1".to_string(),
        }
    }
}

/// Payload of `spectatorCubePosition`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct CubePosition {
    pub x: f32,
    pub y: f32,
}

impl CubePosition {
    pub fn from_json(payload: &str) -> Option<Self> {
        serde_json::from_str(payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_direction_accepts_unit_values() {
        assert_eq!(Direction::from_json("1"), Some(Direction::Up));
        assert_eq!(Direction::from_json("-1"), Some(Direction::Down));
        assert_eq!(Direction::from_json("1.0"), Some(Direction::Up));
    }

    #[test]
    fn test_direction_rejects_everything_else() {
        for payload in ["0", "2", "-2", "0.5", "\"up\"", "null", "{\"position\":1}", "[1]", ""] {
            assert_eq!(Direction::from_json(payload), None, "payload {payload}");
        }
    }

    #[test]
    fn test_direction_sign() {
        assert_approx_eq!(Direction::Up.sign(), 1.0);
        assert_approx_eq!(Direction::Down.sign(), -1.0);
        assert_eq!(Direction::from_json(&Direction::Down.to_json()), Some(Direction::Down));
    }

    #[test]
    fn test_cube_position_parsing() {
        let pos = CubePosition::from_json(r#"{"x": 12.5, "y": -3}"#).unwrap();
        assert_approx_eq!(pos.x, 12.5);
        assert_approx_eq!(pos.y, -3.0);

        assert!(CubePosition::from_json(r#"{"x": 1}"#).is_none());
        assert!(CubePosition::from_json(r#"{"x": "a", "y": 2}"#).is_none());
        assert!(CubePosition::from_json("garbage").is_none());
    }

    #[test]
    fn test_role_capabilities() {
        let player = Role::Player { y: 1.0 };
        let spectator = Role::Spectator { x: 0.0, y: 0.0 };

        assert!(player.is_player());
        assert!(!spectator.is_player());
    }

    #[test]
    fn test_new_ball_state() {
        let ball = BallState::default();
        assert!(ball.is_new);
        assert_eq!(ball.last_hit_by, None);
        assert_eq!((ball.x, ball.y), (0.0, 0.0));
    }

    #[test]
    fn test_room_state_player_count() {
        let mut state = RoomState::new();
        state.participants.insert("a".into(), Participant::player("u1"));
        state.participants.insert("b".into(), Participant::spectator("u2"));
        state.participants.insert("c".into(), Participant::player("u3"));

        assert_eq!(state.player_count(), 2);
        assert_eq!(state.score_of("a"), None);
    }

    #[test]
    fn test_packet_serialization_state() {
        let mut state = RoomState::new();
        state.tick = 42;
        state.participants.insert("abc".into(), Participant::player("user"));
        state.scoreboard.insert("abc".into(), 3);
        state.ball.last_hit_by = Some("abc".into());

        let packet = Packet::State { state: state.clone() };
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::State { state: decoded } => assert_eq!(decoded, state),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }
}
