//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::game::{SessionConfig, SessionRegistry};
use crate::invites::InviteLedger;
use crate::store::{FriendshipStore, MatchResultStore, ResultRecorder, SupabaseClient};
use crate::tournament::BracketOrchestrator;

use super::events::SessionEventLoop;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub invites: Arc<InviteLedger>,
    pub brackets: Arc<BracketOrchestrator>,
    pub friends: FriendshipStore,
}

/// Long-running tasks that must be spawned once the runtime is up
pub struct BackgroundTasks {
    pub session_events: SessionEventLoop,
    pub results: ResultRecorder,
}

impl BackgroundTasks {
    pub fn spawn(self) {
        tokio::spawn(self.session_events.run());
        tokio::spawn(self.results.run());
    }
}

impl AppState {
    pub fn new(config: Config) -> (Self, BackgroundTasks) {
        let config = Arc::new(config);

        // Initialize Supabase client
        let supabase = SupabaseClient::new(&config);

        // Sessions report their end on this channel
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let registry = Arc::new(SessionRegistry::new(
            SessionConfig::from(config.as_ref()),
            events_tx,
        ));
        let invites = Arc::new(InviteLedger::new(registry.clone()));
        let brackets = Arc::new(BracketOrchestrator::new(
            registry.clone(),
            invites.clone(),
            rand::random(),
        ));

        let tasks = BackgroundTasks {
            session_events: SessionEventLoop::new(
                events_rx,
                registry.clone(),
                invites.clone(),
                brackets.clone(),
                results_tx,
            ),
            results: ResultRecorder::new(results_rx, MatchResultStore::new(supabase.clone())),
        };

        let state = Self {
            config,
            registry,
            invites,
            brackets,
            friends: FriendshipStore::new(supabase),
        };

        (state, tasks)
    }
}
