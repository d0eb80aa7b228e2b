//! Realtime protocol message definitions
//! These are the wire types for client-server communication on a match socket

use serde::{Deserialize, Serialize};

/// Side of the field a slot plays on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opponent(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

/// Lifecycle status of a match session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStatus {
    /// Fewer than two players attached
    Waiting,
    /// Both players attached, pre-match countdown running
    Countdown,
    /// Ball in play
    Running,
    /// Terminal
    GameOver,
}

/// Whether an input starts or stops a paddle movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Move {
    Start,
    Stop,
}

/// Paddle movement direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// Paddle input sent from client to server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMsg {
    #[serde(rename = "move")]
    pub movement: Move,
    pub direction: Direction,
}

/// Low-frequency control messages, discriminated by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMsg {
    /// Sent once after a slot is attached
    Init { side: Side },

    /// Status change or score change
    State { status: MatchStatus, score: [u32; 2] },

    /// Rejection
    Error { message: String },
}

/// High-frequency positional snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFrame {
    /// Server timestamp (unix millis)
    pub t: u64,
    /// Ball position `[x, y]`
    pub b: [f32; 2],
    /// Paddle positions `[left_y, right_y]`
    pub p: [f32; 2],
}

/// Messages sent from server to client (discriminated by shape)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMsg {
    Control(ControlMsg),
    Frame(PositionFrame),
}

impl ServerMsg {
    pub fn init(side: Side) -> Self {
        Self::Control(ControlMsg::Init { side })
    }

    pub fn state(status: MatchStatus, score: [u32; 2]) -> Self {
        Self::Control(ControlMsg::State { status, score })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Control(ControlMsg::Error {
            message: message.into(),
        })
    }

    #[cfg(test)]
    pub fn is_frame(&self) -> bool {
        matches!(self, Self::Frame(_))
    }
}
