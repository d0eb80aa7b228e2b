//! Player slots: one user bound to one side of a match

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::ws::protocol::{ClientMsg, Direction, Move, ServerMsg, Side};

use super::physics::{Paddle, PADDLE_SPEED};

/// Outbound half of a player's realtime connection.
///
/// Dropping the last clone closes the socket on the connection task's side.
#[derive(Debug, Clone)]
pub struct SlotConnection {
    pub id: Uuid,
    tx: mpsc::Sender<ServerMsg>,
}

impl SlotConnection {
    pub fn new(tx: mpsc::Sender<ServerMsg>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a message; returns false if the connection is closed or its buffer is full
    pub fn send(&self, msg: ServerMsg) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(connection_id = %self.id, "Outbound buffer full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Held movement keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputFlags {
    pub up: bool,
    pub down: bool,
}

/// One occupied side of a match
#[derive(Debug)]
pub struct PlayerSlot {
    pub user_id: Uuid,
    pub paddle: Paddle,
    pub input: InputFlags,
    conn: SlotConnection,
}

impl PlayerSlot {
    /// Bind `user_id` and its connection to `side`
    pub fn attach(user_id: Uuid, conn: SlotConnection, side: Side) -> Self {
        Self {
            user_id,
            paddle: Paddle::new(side),
            input: InputFlags::default(),
            conn,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.conn.id
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    /// No-op when the connection is no longer open
    pub fn send_snapshot(&self, msg: ServerMsg) {
        if self.is_open() {
            self.conn.send(msg);
        }
    }

    /// Set or clear the input flag named by `action`
    pub fn apply_action(&mut self, action: ClientMsg) {
        let held = action.movement == Move::Start;
        match action.direction {
            Direction::Up => self.input.up = held,
            Direction::Down => self.input.down = held,
        }
    }

    /// Move the paddle for the held keys, clamped to the field
    pub fn advance_paddle(&mut self, dt: f32) {
        let mut dy = 0.0;
        if self.input.up {
            dy -= PADDLE_SPEED * dt;
        }
        if self.input.down {
            dy += PADDLE_SPEED * dt;
        }
        self.paddle.shift(dy);
    }
}
