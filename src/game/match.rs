//! Match state machine and authoritative tick loop

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::util::time::{tick_delta, tick_period, DEFAULT_TICK_RATE};
use crate::ws::protocol::{ClientMsg, MatchStatus, ServerMsg, Side};

use super::physics::{Ball, PhysicsSystem, StepEvent};
use super::registry::MatchHandle;
use super::slot::{PlayerSlot, SlotConnection};
use super::snapshot::{MatchView, SnapshotBuilder};

/// Tunables for one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Points needed to win
    pub win_score: u32,
    /// Pre-match countdown (seconds of tick time)
    pub countdown_secs: f32,
    /// Tick frequency (Hz)
    pub tick_rate: u32,
    /// Tear down an empty waiting session after this many seconds
    pub idle_timeout_secs: Option<f32>,
    /// When set, only these two users may take a slot
    pub entrants: Option<[Uuid; 2]>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            win_score: 5,
            countdown_secs: 3.0,
            tick_rate: DEFAULT_TICK_RATE,
            idle_timeout_secs: Some(300.0),
            entrants: None,
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            win_score: config.win_score,
            countdown_secs: config.countdown_secs,
            tick_rate: config.tick_rate,
            idle_timeout_secs: Some(config.idle_timeout_secs),
            entrants: None,
        }
    }
}

/// Result handed to the match-result recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub player1_id: Uuid,
    pub player2_id: Uuid,
    pub score1: u32,
    pub score2: u32,
    pub winner_id: Uuid,
}

/// Emitted by a session to whoever owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session reached `gameOver` and has stopped
    Ended {
        match_id: Uuid,
        /// Present only if two players were ever attached
        record: Option<MatchRecord>,
        winner_id: Option<Uuid>,
    },
}

/// Requests routed into a running session
#[derive(Debug)]
pub enum SessionCommand {
    Attach {
        user_id: Uuid,
        conn: SlotConnection,
        reply: oneshot::Sender<Result<Side, SessionError>>,
    },
    Detach {
        user_id: Uuid,
        connection_id: Uuid,
    },
    Input {
        user_id: Uuid,
        /// Side the caller claims; `None` means "whichever side I occupy"
        side: Option<Side>,
        action: ClientMsg,
        reply: Option<oneshot::Sender<Result<Side, SessionError>>>,
    },
    View {
        reply: oneshot::Sender<MatchView>,
    },
}

/// Session errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Match not found")]
    NotFound,

    #[error("Match already exists")]
    AlreadyExists,

    #[error("Match is not accepting players")]
    NotWaiting,

    #[error("User already occupies a slot in this match")]
    AlreadyJoined,

    #[error("User is not playing in this match")]
    NotInMatch,

    #[error("Match is reserved for other players")]
    NotEntrant,

    #[error("Not authorized to act for the {0:?} side")]
    Unauthorized(Side),

    #[error("Match has ended")]
    Closed,
}

/// Match state (owned by the session task)
pub struct MatchState {
    pub id: Uuid,
    pub config: SessionConfig,
    pub status: MatchStatus,
    pub ball: Ball,
    pub score: [u32; 2],
    pub countdown_remaining: f32,
    slots: [Option<PlayerSlot>; 2],
    /// Occupants at the moment the countdown began
    players: Option<[Uuid; 2]>,
    idle_secs: f32,
    rng: ChaCha8Rng,
    snapshots: SnapshotBuilder,
    status_tx: watch::Sender<MatchStatus>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl MatchState {
    pub fn new(
        id: Uuid,
        seed: u64,
        config: SessionConfig,
        status_tx: watch::Sender<MatchStatus>,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let ball = Ball::serve(1.0, &mut rng);
        let snapshots = SnapshotBuilder::new(config.tick_rate);

        Self {
            id,
            countdown_remaining: config.countdown_secs,
            config,
            status: MatchStatus::Waiting,
            ball,
            score: [0, 0],
            slots: [None, None],
            players: None,
            idle_secs: 0.0,
            rng,
            snapshots,
            status_tx,
            events_tx,
        }
    }

    pub fn slot(&self, side: Side) -> Option<&PlayerSlot> {
        self.slots[side.index()].as_ref()
    }

    fn side_of(&self, user_id: Uuid) -> Option<Side> {
        [Side::Left, Side::Right]
            .into_iter()
            .find(|side| self.slot(*side).map(|s| s.user_id) == Some(user_id))
    }

    fn set_status(&mut self, status: MatchStatus) {
        self.status = status;
        self.status_tx.send_replace(status);
    }

    fn broadcast(&self, msg: &ServerMsg) {
        for slot in self.slots.iter().flatten() {
            slot.send_snapshot(msg.clone());
        }
    }

    fn broadcast_state(&mut self) {
        if let Some(msg) = self.snapshots.state_if_changed(self.status, self.score) {
            self.broadcast(&msg);
        }
    }

    fn broadcast_frame(&self) {
        let frame = SnapshotBuilder::frame(
            &self.ball,
            self.slot(Side::Left).map(|s| &s.paddle),
            self.slot(Side::Right).map(|s| &s.paddle),
        );
        self.broadcast(&ServerMsg::Frame(frame));
    }

    /// Attach a user to the first open slot.
    ///
    /// On rejection the connection receives an error frame and is dropped.
    pub fn attach(&mut self, user_id: Uuid, conn: SlotConnection) -> Result<Side, SessionError> {
        let result = if self.status == MatchStatus::GameOver {
            Err(SessionError::Closed)
        } else if self.config.entrants.is_some_and(|e| !e.contains(&user_id)) {
            Err(SessionError::NotEntrant)
        } else if self.side_of(user_id).is_some() {
            Err(SessionError::AlreadyJoined)
        } else if self.status != MatchStatus::Waiting {
            Err(SessionError::NotWaiting)
        } else if self.slots[0].is_none() {
            Ok(Side::Left)
        } else if self.slots[1].is_none() {
            Ok(Side::Right)
        } else {
            Err(SessionError::NotWaiting)
        };

        let side = match result {
            Ok(side) => side,
            Err(e) => {
                warn!(match_id = %self.id, user_id = %user_id, error = %e, "Attach rejected");
                conn.send(ServerMsg::error(e.to_string()));
                return Err(e);
            }
        };

        let slot = PlayerSlot::attach(user_id, conn, side);
        slot.send_snapshot(ServerMsg::init(side));
        slot.send_snapshot(ServerMsg::state(self.status, self.score));
        self.slots[side.index()] = Some(slot);
        self.idle_secs = 0.0;

        info!(match_id = %self.id, user_id = %user_id, side = ?side, "Player attached");

        let occupants = match &self.slots {
            [Some(left), Some(right)] => Some([left.user_id, right.user_id]),
            _ => None,
        };
        if let Some(players) = occupants {
            self.players = Some(players);
            self.countdown_remaining = self.config.countdown_secs;
            self.set_status(MatchStatus::Countdown);
            self.broadcast_state();
            info!(match_id = %self.id, "Both players attached, countdown started");
        }

        Ok(side)
    }

    /// Handle a closed connection. Leaving mid-match forfeits.
    pub fn detach(&mut self, user_id: Uuid, connection_id: Uuid) {
        let Some(side) = self.side_of(user_id) else {
            return;
        };
        // A rejected duplicate connection closing must not evict the real occupant
        if self.slot(side).map(|s| s.connection_id()) != Some(connection_id) {
            return;
        }

        match self.status {
            MatchStatus::Waiting => {
                self.slots[side.index()] = None;
                self.snapshots.force_next();
                info!(match_id = %self.id, user_id = %user_id, "Player left waiting match");
            }
            MatchStatus::Countdown | MatchStatus::Running => {
                info!(match_id = %self.id, user_id = %user_id, side = ?side, "Player disconnected, forfeit");
                self.slots[side.index()] = None;
                let winner = side.opponent();
                self.score[winner.index()] = self.config.win_score;
                self.finish(Some(winner));
            }
            MatchStatus::GameOver => {}
        }
    }

    /// Route a paddle input. With an explicit `side`, only its occupant may act.
    pub fn handle_input(
        &mut self,
        user_id: Uuid,
        side: Option<Side>,
        action: ClientMsg,
    ) -> Result<Side, SessionError> {
        if self.status == MatchStatus::GameOver {
            return Err(SessionError::Closed);
        }
        let side = match side {
            Some(side) => side,
            None => self.side_of(user_id).ok_or(SessionError::NotInMatch)?,
        };
        match self.slots[side.index()].as_mut() {
            Some(slot) if slot.user_id == user_id => {
                slot.apply_action(action);
                Ok(side)
            }
            _ => Err(SessionError::Unauthorized(side)),
        }
    }

    pub fn view(&self) -> MatchView {
        let frame = self.players.map(|_| {
            SnapshotBuilder::frame(
                &self.ball,
                self.slot(Side::Left).map(|s| &s.paddle),
                self.slot(Side::Right).map(|s| &s.paddle),
            )
        });
        MatchView {
            match_id: self.id,
            status: self.status,
            score: self.score,
            frame,
        }
    }

    fn advance_paddles(&mut self, dt: f32) {
        for slot in self.slots.iter_mut().flatten() {
            slot.advance_paddle(dt);
        }
    }

    /// Run a single tick of `dt` seconds
    pub fn tick(&mut self, dt: f32) {
        match self.status {
            MatchStatus::Waiting => self.tick_waiting(dt),
            MatchStatus::Countdown => {
                self.countdown_remaining -= dt;
                self.advance_paddles(dt);
                if self.countdown_remaining <= 0.0 {
                    self.set_status(MatchStatus::Running);
                    self.broadcast_state();
                    info!(match_id = %self.id, "Match running");
                }
                self.broadcast_frame();
            }
            MatchStatus::Running => self.tick_running(dt),
            MatchStatus::GameOver => {}
        }
    }

    fn tick_waiting(&mut self, dt: f32) {
        if self.slots.iter().all(Option::is_none) {
            self.idle_secs += dt;
            if let Some(limit) = self.config.idle_timeout_secs {
                if self.idle_secs >= limit {
                    info!(match_id = %self.id, "Idle waiting match, tearing down");
                    self.finish(None);
                    return;
                }
            }
        }
        if self.snapshots.should_send_heartbeat() {
            self.broadcast(&ServerMsg::state(MatchStatus::Waiting, self.score));
        }
    }

    fn tick_running(&mut self, dt: f32) {
        self.advance_paddles(dt);

        let left = self.slots[0].as_ref().map(|s| s.paddle);
        let right = self.slots[1].as_ref().map(|s| s.paddle);
        let event = PhysicsSystem::advance(
            &mut self.ball,
            left.as_ref(),
            right.as_ref(),
            dt,
            &mut self.rng,
        );

        if let Some(StepEvent::Scored(side)) = event {
            self.score[side.index()] += 1;
            debug!(match_id = %self.id, score = ?self.score, "Point scored");
            if self.score[side.index()] >= self.config.win_score {
                self.finish(Some(side));
                return;
            }
            self.broadcast_state();
        }

        self.broadcast_frame();
    }

    /// Enter `gameOver`: final broadcast, report, close connections
    fn finish(&mut self, winner: Option<Side>) {
        if self.status == MatchStatus::GameOver {
            return;
        }
        self.set_status(MatchStatus::GameOver);
        self.broadcast_state();

        let winner_id = match (winner, self.players) {
            (Some(side), Some(players)) => Some(players[side.index()]),
            _ => None,
        };
        let record = match (self.players, winner_id) {
            (Some([player1_id, player2_id]), Some(winner_id)) => Some(MatchRecord {
                player1_id,
                player2_id,
                score1: self.score[0],
                score2: self.score[1],
                winner_id,
            }),
            _ => None,
        };

        info!(
            match_id = %self.id,
            score = ?self.score,
            winner_id = ?winner_id,
            "Match over"
        );

        let _ = self.events_tx.send(SessionEvent::Ended {
            match_id: self.id,
            record,
            winner_id,
        });

        // Dropping the slots drops their senders, which closes the sockets
        self.slots = [None, None];
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Attach {
                user_id,
                conn,
                reply,
            } => {
                let _ = reply.send(self.attach(user_id, conn));
            }
            SessionCommand::Detach {
                user_id,
                connection_id,
            } => self.detach(user_id, connection_id),
            SessionCommand::Input {
                user_id,
                side,
                action,
                reply,
            } => {
                let result = self.handle_input(user_id, side, action);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            SessionCommand::View { reply } => {
                let _ = reply.send(self.view());
            }
        }
    }
}

/// The authoritative session task
pub struct MatchSession {
    state: MatchState,
    commands: mpsc::Receiver<SessionCommand>,
}

impl MatchSession {
    /// Create a new session and the handle used to reach it
    pub fn new(
        id: Uuid,
        seed: u64,
        config: SessionConfig,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> (Self, MatchHandle) {
        let (cmd_tx, commands) = mpsc::channel(256);
        let (status_tx, status_rx) = watch::channel(MatchStatus::Waiting);

        let handle = MatchHandle::new(id, cmd_tx, status_rx, config.entrants.is_some());
        let session = Self {
            state: MatchState::new(id, seed, config, status_tx, events_tx),
            commands,
        };

        (session, handle)
    }

    /// Run the tick loop until the match is over or every handle is dropped
    pub async fn run(self) {
        let Self {
            mut state,
            mut commands,
        } = self;

        info!(match_id = %state.id, "Session started");

        let mut ticker = interval(tick_period(state.config.tick_rate));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let dt = tick_delta(last_tick, now);
                    last_tick = now;
                    state.tick(dt);
                }
                cmd = commands.recv() => match cmd {
                    Some(cmd) => state.handle_command(cmd),
                    None => {
                        debug!(match_id = %state.id, "All handles dropped");
                        state.finish(None);
                    }
                },
            }

            if state.status == MatchStatus::GameOver {
                break;
            }
        }

        info!(match_id = %state.id, "Session stopped");
    }
}
