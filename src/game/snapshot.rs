//! Snapshot building for network transmission

use serde::Serialize;
use uuid::Uuid;

use crate::util::time::unix_millis;
use crate::ws::protocol::{MatchStatus, PositionFrame, ServerMsg};

use super::physics::{Ball, Paddle, PADDLE_HEIGHT};

/// Decides which snapshots a tick should emit
pub struct SnapshotBuilder {
    /// Ticks since the last waiting heartbeat
    ticks_since_heartbeat: u32,
    /// Heartbeat interval in ticks
    heartbeat_interval: u32,
    /// Last status/score pair broadcast as a `state` message
    last_state: Option<(MatchStatus, [u32; 2])>,
}

impl SnapshotBuilder {
    pub fn new(heartbeat_interval: u32) -> Self {
        Self {
            // First waiting tick sends immediately
            ticks_since_heartbeat: heartbeat_interval,
            heartbeat_interval: heartbeat_interval.max(1),
            last_state: None,
        }
    }

    /// Check if it's time to repeat the waiting heartbeat
    pub fn should_send_heartbeat(&mut self) -> bool {
        self.ticks_since_heartbeat += 1;
        if self.ticks_since_heartbeat >= self.heartbeat_interval {
            self.ticks_since_heartbeat = 0;
            true
        } else {
            false
        }
    }

    /// Force the heartbeat on next check
    pub fn force_next(&mut self) {
        self.ticks_since_heartbeat = self.heartbeat_interval;
    }

    /// Build a `state` message, unless the same status and score were already broadcast
    pub fn state_if_changed(&mut self, status: MatchStatus, score: [u32; 2]) -> Option<ServerMsg> {
        if self.last_state == Some((status, score)) {
            return None;
        }
        self.last_state = Some((status, score));
        Some(ServerMsg::state(status, score))
    }

    /// Build a positional frame; absent paddles report their rest position
    pub fn frame(ball: &Ball, left: Option<&Paddle>, right: Option<&Paddle>) -> PositionFrame {
        let rest = (1.0 - PADDLE_HEIGHT) / 2.0;
        PositionFrame {
            t: unix_millis(),
            b: [ball.x, ball.y],
            p: [
                left.map(|p| p.y).unwrap_or(rest),
                right.map(|p| p.y).unwrap_or(rest),
            ],
        }
    }
}

/// Polled view of a match; positions are only present once two players joined
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchView {
    pub match_id: Uuid,
    pub status: MatchStatus,
    pub score: [u32; 2],
    #[serde(flatten)]
    pub frame: Option<PositionFrame>,
}
