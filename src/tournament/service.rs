//! Tournament service - rosters, round generation and result intake

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::SessionRegistry;
use crate::invites::InviteLedger;

use super::bracket::{
    BracketMatch, RoundProgress, Tournament, TournamentError, TournamentStatus, MAX_ROSTER,
    MIN_ROSTER,
};

/// Owns every tournament and the match id -> tournament index
pub struct BracketOrchestrator {
    tournaments: Mutex<HashMap<Uuid, Tournament>>,
    /// Bracket match id -> owning tournament
    match_index: DashMap<Uuid, Uuid>,
    registry: Arc<SessionRegistry>,
    invites: Arc<InviteLedger>,
    rng: Mutex<ChaCha8Rng>,
}

impl BracketOrchestrator {
    pub fn new(registry: Arc<SessionRegistry>, invites: Arc<InviteLedger>, seed: u64) -> Self {
        Self {
            tournaments: Mutex::new(HashMap::new()),
            match_index: DashMap::new(),
            registry,
            invites,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Create a tournament; every listed player other than the creator is invited
    pub fn create(
        &self,
        creator_id: Uuid,
        name: &str,
        player_ids: &[Uuid],
    ) -> Result<Tournament, TournamentError> {
        let guests = Self::guest_list(creator_id, player_ids)?;
        let roster_size = guests.len() + 1;

        let mut tournament = Tournament::new(name, creator_id)?;
        for guest in guests {
            tournament.invite_player(guest);
        }

        info!(
            tournament_id = %tournament.id,
            creator_id = %creator_id,
            players = roster_size,
            "Tournament created"
        );

        self.tournaments
            .lock()
            .insert(tournament.id, tournament.clone());
        Ok(tournament)
    }

    /// Distinct non-creator players, checked against the roster bounds
    pub fn guest_list(creator_id: Uuid, player_ids: &[Uuid]) -> Result<Vec<Uuid>, TournamentError> {
        let guests: BTreeSet<Uuid> = player_ids
            .iter()
            .copied()
            .filter(|id| *id != creator_id)
            .collect();
        let roster_size = guests.len() + 1;
        if !(MIN_ROSTER..=MAX_ROSTER).contains(&roster_size) {
            return Err(TournamentError::InvalidRosterSize(roster_size));
        }
        Ok(guests.into_iter().collect())
    }

    pub fn get(&self, tournament_id: Uuid) -> Option<Tournament> {
        self.tournaments.lock().get(&tournament_id).cloned()
    }

    /// Waiting tournaments where `user_id` still has to answer
    pub fn invitations_for(&self, user_id: Uuid) -> Vec<Tournament> {
        let mut pending: Vec<Tournament> = self
            .tournaments
            .lock()
            .values()
            .filter(|t| t.is_invited(user_id))
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending
    }

    pub fn respond(
        &self,
        tournament_id: Uuid,
        user_id: Uuid,
        accept: bool,
    ) -> Result<Tournament, TournamentError> {
        let mut tournaments = self.tournaments.lock();
        let tournament = tournaments
            .get_mut(&tournament_id)
            .ok_or(TournamentError::NotFound)?;
        let status = tournament.respond_invite(user_id, accept)?;
        info!(
            tournament_id = %tournament_id,
            user_id = %user_id,
            status = ?status,
            "Tournament invitation answered"
        );
        Ok(tournament.clone())
    }

    /// Start a waiting tournament and spawn its first round; returns the new match ids
    pub fn start(&self, tournament_id: Uuid, caller: Uuid) -> Result<Vec<Uuid>, TournamentError> {
        let mut tournaments = self.tournaments.lock();
        let tournament = tournaments
            .get_mut(&tournament_id)
            .ok_or(TournamentError::NotFound)?;
        let players = tournament.start(caller)?;
        info!(tournament_id = %tournament_id, players = players.len(), "Tournament started");
        self.spawn_round(tournament, players)
    }

    /// Record the winner of a bracket match, advancing or finishing its tournament
    pub fn handle_match_result(
        &self,
        match_id: Uuid,
        winner_id: Uuid,
    ) -> Result<RoundProgress, TournamentError> {
        let tournament_id = self
            .match_index
            .get(&match_id)
            .map(|entry| *entry.value())
            .ok_or(TournamentError::UnknownMatch)?;

        let mut tournaments = self.tournaments.lock();
        let tournament = tournaments
            .get_mut(&tournament_id)
            .ok_or(TournamentError::NotFound)?;

        let progress = tournament.record_result(match_id, winner_id)?;

        info!(
            tournament_id = %tournament_id,
            match_id = %match_id,
            winner_id = %winner_id,
            "Bracket match decided"
        );

        match &progress {
            RoundProgress::Pending => {}
            RoundProgress::NextRound(players) => {
                self.spawn_round(tournament, players.clone())?;
            }
            RoundProgress::Finished(champion) => {
                info!(tournament_id = %tournament_id, champion_id = %champion, "Tournament finished");
            }
        }
        Ok(progress)
    }

    /// Pair `players`, create one session per pair and invite both players to it
    fn spawn_round(
        &self,
        tournament: &mut Tournament,
        players: Vec<Uuid>,
    ) -> Result<Vec<Uuid>, TournamentError> {
        let pairing = Tournament::pair(players, &mut *self.rng.lock());
        let round = tournament.round + 1;

        let mut matches = Vec::with_capacity(pairing.pairs.len());
        for (player1_id, player2_id) in pairing.pairs {
            let match_id = Uuid::new_v4();
            let entrants = [player1_id, player2_id];
            if let Err(e) = self.registry.create_for_bracket(match_id, entrants) {
                warn!(tournament_id = %tournament.id, error = %e, "Failed to create bracket match");
                return Err(e.into());
            }
            self.invites.link(tournament.creator_id, player1_id, match_id);
            self.invites.link(tournament.creator_id, player2_id, match_id);
            self.match_index.insert(match_id, tournament.id);

            matches.push(BracketMatch {
                match_id,
                player1_id,
                player2_id,
                winner_id: None,
                round,
            });
        }

        if let Some(bye) = pairing.bye {
            info!(tournament_id = %tournament.id, round, user_id = %bye, "Bye awarded");
        }

        let match_ids: Vec<Uuid> = matches.iter().map(|m| m.match_id).collect();
        info!(
            tournament_id = %tournament.id,
            round,
            matches = match_ids.len(),
            "Round generated"
        );
        tournament.begin_round(matches, pairing.bye);
        Ok(match_ids)
    }

    /// Whether `match_id` was spawned by a bracket
    pub fn owns(&self, match_id: &Uuid) -> bool {
        self.match_index.contains_key(match_id)
    }

    pub fn active_tournaments(&self) -> usize {
        self.tournaments
            .lock()
            .values()
            .filter(|t| t.status != TournamentStatus::Finished)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{SessionConfig, SessionError, SlotConnection};
    use crate::ws::protocol::{MatchStatus, Side};
    use tokio::sync::mpsc;
    use tokio_test::assert_ok;

    struct Fixture {
        brackets: BracketOrchestrator,
        registry: Arc<SessionRegistry>,
        invites: Arc<InviteLedger>,
    }

    fn fixture() -> Fixture {
        let (tx, _) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry::new(SessionConfig::default(), tx));
        let invites = Arc::new(InviteLedger::new(registry.clone()));
        Fixture {
            brackets: BracketOrchestrator::new(registry.clone(), invites.clone(), 11),
            registry,
            invites,
        }
    }

    /// Create and start a tournament where everyone accepted
    fn started(f: &Fixture, players: &[Uuid]) -> (Uuid, Vec<Uuid>) {
        let t = f.brackets.create(players[0], "Cup", &players[1..]).unwrap();
        for p in &players[1..] {
            f.brackets.respond(t.id, *p, true).unwrap();
        }
        let matches = f.brackets.start(t.id, players[0]).unwrap();
        (t.id, matches)
    }

    fn players_of(f: &Fixture, tournament_id: Uuid, match_id: Uuid) -> (Uuid, Uuid) {
        let t = f.brackets.get(tournament_id).unwrap();
        let m = t
            .current_round
            .iter()
            .find(|m| m.match_id == match_id)
            .unwrap();
        (m.player1_id, m.player2_id)
    }

    #[tokio::test]
    async fn roster_size_is_bounded() {
        let f = fixture();
        let creator = Uuid::new_v4();

        assert_eq!(
            f.brackets.create(creator, "Cup", &[creator]).err(),
            Some(TournamentError::InvalidRosterSize(1))
        );
        let crowd: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        assert_eq!(
            f.brackets.create(creator, "Cup", &crowd).err(),
            Some(TournamentError::InvalidRosterSize(6))
        );

        let guest = Uuid::new_v4();
        let t = assert_ok!(f.brackets.create(creator, "Cup", &[guest, guest, creator]));
        assert_eq!(t.roster.len(), 2);
        assert_eq!(f.brackets.invitations_for(guest).len(), 1);
        assert!(f.brackets.invitations_for(creator).is_empty());
    }

    #[tokio::test]
    async fn start_fails_without_enough_accepted_or_as_guest() {
        let f = fixture();
        let (creator, guest) = (Uuid::new_v4(), Uuid::new_v4());
        let t = f.brackets.create(creator, "Cup", &[guest]).unwrap();

        assert_eq!(f.brackets.start(t.id, creator), Err(TournamentError::NotEnoughPlayers));
        f.brackets.respond(t.id, guest, true).unwrap();
        assert_eq!(f.brackets.start(t.id, guest), Err(TournamentError::NotCreator));
        assert_eq!(
            f.brackets.start(Uuid::new_v4(), creator),
            Err(TournamentError::NotFound)
        );
        assert_eq!(f.registry.active_matches(), 0);
    }

    #[tokio::test]
    async fn four_players_play_two_semis_and_a_final() {
        let f = fixture();
        let players: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let (tid, semis) = started(&f, &players);

        assert_eq!(semis.len(), 2);
        assert_eq!(f.registry.active_matches(), 2);
        for p in &players {
            assert_eq!(f.invites.list_for(*p).len(), 1);
        }
        for m in &semis {
            assert!(f.brackets.owns(m));
            assert_eq!(f.registry.get(m).unwrap().status(), MatchStatus::Waiting);
        }

        let (a, _) = players_of(&f, tid, semis[0]);
        let (_, d) = players_of(&f, tid, semis[1]);
        assert_eq!(f.brackets.handle_match_result(semis[0], a), Ok(RoundProgress::Pending));
        assert_eq!(
            f.brackets.handle_match_result(semis[1], d),
            Ok(RoundProgress::NextRound(vec![a, d]))
        );

        let t = f.brackets.get(tid).unwrap();
        assert_eq!(t.round, 2);
        assert_eq!(t.current_round.len(), 1);
        let final_id = t.current_round[0].match_id;
        assert_eq!(f.registry.active_matches(), 3);

        assert_eq!(
            f.brackets.handle_match_result(final_id, d),
            Ok(RoundProgress::Finished(d))
        );
        let t = f.brackets.get(tid).unwrap();
        assert_eq!(t.status, TournamentStatus::Finished);
        assert_eq!(t.champion_id, Some(d));
        assert_eq!(f.brackets.active_tournaments(), 0);
        assert_eq!(
            f.brackets.handle_match_result(final_id, d),
            Err(TournamentError::AlreadyDecided)
        );
    }

    #[tokio::test]
    async fn bracket_match_turns_away_outsiders() {
        let f = fixture();
        let players: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let (tid, matches) = started(&f, &players);
        let handle = f.registry.get(&matches[0]).unwrap();

        assert!(f.registry.list(Some(MatchStatus::Waiting)).is_empty());
        for _ in 0..2 {
            let (tx, _rx) = mpsc::channel(64);
            assert_eq!(
                handle.attach(Uuid::new_v4(), SlotConnection::new(tx)).await,
                Err(SessionError::NotEntrant)
            );
        }
        assert_eq!(handle.status(), MatchStatus::Waiting);

        let (p1, p2) = players_of(&f, tid, matches[0]);
        let (tx1, _rx1) = mpsc::channel(64);
        let (tx2, _rx2) = mpsc::channel(64);
        assert_eq!(handle.attach(p1, SlotConnection::new(tx1)).await, Ok(Side::Left));
        assert_eq!(handle.attach(p2, SlotConnection::new(tx2)).await, Ok(Side::Right));
        assert_eq!(handle.status(), MatchStatus::Countdown);
    }

    #[tokio::test]
    async fn odd_roster_gives_a_bye() {
        let f = fixture();
        let players: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let (tid, first) = started(&f, &players);

        assert_eq!(first.len(), 1);
        let t = f.brackets.get(tid).unwrap();
        let bye = t.bye.unwrap();
        let (p1, _) = players_of(&f, tid, first[0]);
        assert!(f.invites.list_for(bye).is_empty());

        assert_eq!(
            f.brackets.handle_match_result(first[0], p1),
            Ok(RoundProgress::NextRound(vec![p1, bye]))
        );
        let t = f.brackets.get(tid).unwrap();
        assert_eq!(t.current_round.len(), 1);
        assert!(t.bye.is_none());
    }

    #[tokio::test]
    async fn duplicate_or_stray_results_change_nothing() {
        let f = fixture();
        let players: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let (tid, semis) = started(&f, &players);
        let (a, _) = players_of(&f, tid, semis[0]);

        f.brackets.handle_match_result(semis[0], a).unwrap();
        assert_eq!(
            f.brackets.handle_match_result(semis[0], a),
            Err(TournamentError::AlreadyDecided)
        );
        assert_eq!(
            f.brackets.handle_match_result(Uuid::new_v4(), a),
            Err(TournamentError::UnknownMatch)
        );
        assert_eq!(f.brackets.get(tid).unwrap().history.len(), 1);
    }
}
