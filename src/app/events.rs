//! Fan-out of session lifecycle events to registry, invites, brackets and the recorder

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::{MatchRecord, SessionEvent, SessionRegistry};
use crate::invites::InviteLedger;
use crate::tournament::BracketOrchestrator;

pub struct SessionEventLoop {
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    registry: Arc<SessionRegistry>,
    invites: Arc<InviteLedger>,
    brackets: Arc<BracketOrchestrator>,
    results_tx: mpsc::UnboundedSender<(Uuid, MatchRecord)>,
}

impl SessionEventLoop {
    pub fn new(
        events_rx: mpsc::UnboundedReceiver<SessionEvent>,
        registry: Arc<SessionRegistry>,
        invites: Arc<InviteLedger>,
        brackets: Arc<BracketOrchestrator>,
        results_tx: mpsc::UnboundedSender<(Uuid, MatchRecord)>,
    ) -> Self {
        Self {
            events_rx,
            registry,
            invites,
            brackets,
            results_tx,
        }
    }

    pub async fn run(mut self) {
        info!("Session event loop started");
        while let Some(event) = self.events_rx.recv().await {
            self.dispatch(event);
        }
        info!("Session event loop stopped");
    }

    /// Persist, advance the bracket, then deregister and drop invites
    pub fn dispatch(&self, event: SessionEvent) {
        match event {
            SessionEvent::Ended {
                match_id,
                record,
                winner_id,
            } => {
                if let Some(record) = record {
                    if self.results_tx.send((match_id, record)).is_err() {
                        warn!(match_id = %match_id, "Result recorder is gone, result dropped");
                    }
                }

                if let Some(winner_id) = winner_id.filter(|_| self.brackets.owns(&match_id)) {
                    match self.brackets.handle_match_result(match_id, winner_id) {
                        Ok(progress) => {
                            debug!(match_id = %match_id, progress = ?progress, "Bracket updated")
                        }
                        Err(e) => {
                            warn!(match_id = %match_id, error = %e, "Bracket rejected match result")
                        }
                    }
                }

                self.registry.remove(&match_id);
                self.invites.purge_match(match_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{SessionConfig, SlotConnection};
    use crate::tournament::bracket::TournamentStatus;

    struct Fixture {
        events: SessionEventLoop,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
        results_rx: mpsc::UnboundedReceiver<(Uuid, MatchRecord)>,
        registry: Arc<SessionRegistry>,
        invites: Arc<InviteLedger>,
        brackets: Arc<BracketOrchestrator>,
    }

    fn fixture() -> Fixture {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry::new(
            SessionConfig::default(),
            events_tx.clone(),
        ));
        let invites = Arc::new(InviteLedger::new(registry.clone()));
        let brackets = Arc::new(BracketOrchestrator::new(
            registry.clone(),
            invites.clone(),
            3,
        ));
        Fixture {
            events: SessionEventLoop::new(
                events_rx,
                registry.clone(),
                invites.clone(),
                brackets.clone(),
                results_tx,
            ),
            events_tx,
            results_rx,
            registry,
            invites,
            brackets,
        }
    }

    #[tokio::test]
    async fn ended_match_is_recorded_and_cleaned_up() {
        let mut f = fixture();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let invite = f.invites.create(alice, bob, None).unwrap();
        let record = MatchRecord {
            player1_id: alice,
            player2_id: bob,
            score1: 5,
            score2: 3,
            winner_id: alice,
        };

        f.events.dispatch(SessionEvent::Ended {
            match_id: invite.match_id,
            record: Some(record.clone()),
            winner_id: Some(alice),
        });

        assert_eq!(f.results_rx.try_recv().ok(), Some((invite.match_id, record)));
        assert!(f.registry.get(&invite.match_id).is_none());
        assert!(f.invites.list_for(bob).is_empty());
    }

    #[tokio::test]
    async fn reaped_match_is_not_recorded() {
        let mut f = fixture();
        let handle = f.registry.create(Uuid::new_v4()).unwrap();

        f.events.dispatch(SessionEvent::Ended {
            match_id: handle.id,
            record: None,
            winner_id: None,
        });
        f.events.dispatch(SessionEvent::Ended {
            match_id: handle.id,
            record: None,
            winner_id: None,
        });

        assert!(f.results_rx.try_recv().is_err());
        assert_eq!(f.registry.active_matches(), 0);
    }

    #[tokio::test]
    async fn bracket_match_result_finishes_tournament() {
        let f = fixture();
        let (creator, guest) = (Uuid::new_v4(), Uuid::new_v4());
        let t = f.brackets.create(creator, "Final", &[guest]).unwrap();
        f.brackets.respond(t.id, guest, true).unwrap();
        let matches = f.brackets.start(t.id, creator).unwrap();

        f.events.dispatch(SessionEvent::Ended {
            match_id: matches[0],
            record: None,
            winner_id: Some(guest),
        });

        let t = f.brackets.get(t.id).unwrap();
        assert_eq!(t.status, TournamentStatus::Finished);
        assert_eq!(t.champion_id, Some(guest));
        assert_eq!(f.registry.active_matches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn forfeit_flows_from_session_to_recorder() {
        let Fixture {
            events,
            events_tx: _events_tx,
            mut results_rx,
            registry,
            ..
        } = fixture();
        tokio::spawn(events.run());

        let handle = registry.create(Uuid::new_v4()).unwrap();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx_a, _rx_a) = mpsc::channel(1024);
        let (tx_b, _rx_b) = mpsc::channel(1024);
        let conn_b = SlotConnection::new(tx_b);
        let conn_b_id = conn_b.id;
        handle.attach(alice, SlotConnection::new(tx_a)).await.unwrap();
        handle.attach(bob, conn_b).await.unwrap();

        handle.detach(bob, conn_b_id).await;

        let (match_id, record) = results_rx.recv().await.unwrap();
        assert_eq!(match_id, handle.id);
        assert_eq!(record.winner_id, alice);
        assert_eq!(record.score1, SessionConfig::default().win_score);
        assert!(registry.get(&handle.id).is_none());
    }
}
