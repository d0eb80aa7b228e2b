//! Registry of live match sessions

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};
use uuid::Uuid;

use crate::ws::protocol::{ClientMsg, MatchStatus, Side};

use super::r#match::{MatchSession, SessionCommand, SessionConfig, SessionError, SessionEvent};
use super::slot::SlotConnection;
use super::snapshot::MatchView;

/// Handle to a running session
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<MatchStatus>,
    reserved: bool,
}

impl MatchHandle {
    pub(super) fn new(
        id: Uuid,
        commands: mpsc::Sender<SessionCommand>,
        status: watch::Receiver<MatchStatus>,
        reserved: bool,
    ) -> Self {
        Self {
            id,
            commands,
            status,
            reserved,
        }
    }

    pub fn status(&self) -> MatchStatus {
        *self.status.borrow()
    }

    /// Whether only a fixed pair of users may join
    pub fn is_reserved(&self) -> bool {
        self.reserved
    }

    async fn request<T>(
        &self,
        cmd: SessionCommand,
        reply: oneshot::Receiver<T>,
    ) -> Result<T, SessionError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| SessionError::Closed)?;
        reply.await.map_err(|_| SessionError::Closed)
    }

    /// Attach a connection to the first open slot
    pub async fn attach(&self, user_id: Uuid, conn: SlotConnection) -> Result<Side, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::Attach { user_id, conn, reply }, rx)
            .await?
    }

    /// Report a closed connection
    pub async fn detach(&self, user_id: Uuid, connection_id: Uuid) {
        let _ = self
            .commands
            .send(SessionCommand::Detach {
                user_id,
                connection_id,
            })
            .await;
    }

    /// Apply an input for an explicitly named side and wait for the verdict
    pub async fn act(
        &self,
        user_id: Uuid,
        side: Side,
        action: ClientMsg,
    ) -> Result<Side, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            SessionCommand::Input {
                user_id,
                side: Some(side),
                action,
                reply: Some(reply),
            },
            rx,
        )
        .await?
    }

    /// Forward a realtime input without waiting; dropped if the session is busy or gone
    pub fn push_input(&self, user_id: Uuid, action: ClientMsg) {
        let cmd = SessionCommand::Input {
            user_id,
            side: None,
            action,
            reply: None,
        };
        if self.commands.try_send(cmd).is_err() {
            debug!(match_id = %self.id, user_id = %user_id, "Input dropped");
        }
    }

    pub async fn view(&self) -> Result<MatchView, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::View { reply }, rx).await
    }
}

/// Process-wide table of live sessions, keyed by match id
pub struct SessionRegistry {
    matches: DashMap<Uuid, MatchHandle>,
    config: SessionConfig,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig, events_tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            matches: DashMap::new(),
            config,
            events_tx,
        }
    }

    /// Create and spawn a session under `id`
    pub fn create(&self, id: Uuid) -> Result<MatchHandle, SessionError> {
        self.spawn(id, self.config.clone())
    }

    /// Create a bracket session reserved for `entrants`; it is never reaped for idleness
    pub fn create_for_bracket(
        &self,
        id: Uuid,
        entrants: [Uuid; 2],
    ) -> Result<MatchHandle, SessionError> {
        let config = SessionConfig {
            idle_timeout_secs: None,
            entrants: Some(entrants),
            ..self.config.clone()
        };
        self.spawn(id, config)
    }

    fn spawn(&self, id: Uuid, config: SessionConfig) -> Result<MatchHandle, SessionError> {
        match self.matches.entry(id) {
            Entry::Occupied(_) => Err(SessionError::AlreadyExists),
            Entry::Vacant(slot) => {
                let seed = rand::random::<u64>();
                let (session, handle) = MatchSession::new(id, seed, config, self.events_tx.clone());
                slot.insert(handle.clone());
                tokio::spawn(session.run());
                info!(match_id = %id, "Created match session");
                Ok(handle)
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    /// Ids of live sessions anyone may join, optionally filtered by status
    pub fn list(&self, status: Option<MatchStatus>) -> Vec<Uuid> {
        self.matches
            .iter()
            .filter(|entry| !entry.value().is_reserved())
            .filter(|entry| status.map_or(true, |s| entry.value().status() == s))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Deregister a session; returns false if it was already gone
    pub fn remove(&self, id: &Uuid) -> bool {
        let removed = self.matches.remove(id).is_some();
        if removed {
            info!(match_id = %id, "Match removed from registry");
        }
        removed
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }
}
