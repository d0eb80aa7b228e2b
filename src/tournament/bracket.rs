//! Single-elimination bracket state

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::game::SessionError;

/// Longest accepted tournament name
pub const MAX_NAME_LEN: usize = 64;

/// Roster bounds, creator included
pub const MIN_ROSTER: usize = 2;
pub const MAX_ROSTER: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RosterStatus {
    Invited,
    Accepted,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
    Waiting,
    Active,
    Finished,
}

/// One pairing of a round; the winner is set once
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketMatch {
    pub match_id: Uuid,
    pub player1_id: Uuid,
    pub player2_id: Uuid,
    pub winner_id: Option<Uuid>,
    pub round: u32,
}

/// Output of pairing a list of ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub pairs: Vec<(Uuid, Uuid)>,
    /// Odd one out, advances without playing
    pub bye: Option<Uuid>,
}

/// What a recorded result did to the bracket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundProgress {
    /// Other matches of the round are still undecided
    Pending,
    /// Round complete; these ids must be paired next
    NextRound(Vec<Uuid>),
    /// Tournament is over
    Finished(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TournamentError {
    #[error("Tournament not found")]
    NotFound,

    #[error("Tournament name must be 1 to {MAX_NAME_LEN} characters")]
    InvalidName,

    #[error("A tournament needs {MIN_ROSTER} to {MAX_ROSTER} players, got {0}")]
    InvalidRosterSize(usize),

    #[error("User has no pending invitation to this tournament")]
    NotInvited,

    #[error("Only the creator can start the tournament")]
    NotCreator,

    #[error("Tournament is not waiting for players")]
    NotWaiting,

    #[error("At least {MIN_ROSTER} accepted players are required")]
    NotEnoughPlayers,

    #[error("Tournament is not active")]
    NotActive,

    #[error("Match is not part of the current round")]
    UnknownMatch,

    #[error("Match result already recorded")]
    AlreadyDecided,

    #[error("Winner did not play in this match")]
    NotAParticipant,

    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tournament {
    pub id: Uuid,
    pub name: String,
    pub creator_id: Uuid,
    pub roster: BTreeMap<Uuid, RosterStatus>,
    pub status: TournamentStatus,
    pub round: u32,
    pub current_round: Vec<BracketMatch>,
    pub bye: Option<Uuid>,
    pub history: Vec<BracketMatch>,
    pub champion_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Tournament {
    /// New tournament in `waiting`; the creator is already accepted
    pub fn new(name: &str, creator_id: Uuid) -> Result<Self, TournamentError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(TournamentError::InvalidName);
        }

        let mut roster = BTreeMap::new();
        roster.insert(creator_id, RosterStatus::Accepted);

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            creator_id,
            roster,
            status: TournamentStatus::Waiting,
            round: 0,
            current_round: Vec::new(),
            bye: None,
            history: Vec::new(),
            champion_id: None,
            created_at: Utc::now(),
        })
    }

    /// Add an `invited` roster entry; returns false if the user is already listed
    pub fn invite_player(&mut self, user_id: Uuid) -> bool {
        if self.roster.contains_key(&user_id) {
            return false;
        }
        self.roster.insert(user_id, RosterStatus::Invited);
        true
    }

    pub fn is_invited(&self, user_id: Uuid) -> bool {
        self.status == TournamentStatus::Waiting
            && self.roster.get(&user_id) == Some(&RosterStatus::Invited)
    }

    pub fn respond_invite(
        &mut self,
        user_id: Uuid,
        accept: bool,
    ) -> Result<RosterStatus, TournamentError> {
        if self.status != TournamentStatus::Waiting {
            return Err(TournamentError::NotWaiting);
        }
        match self.roster.get_mut(&user_id) {
            Some(entry) if *entry == RosterStatus::Invited => {
                *entry = if accept {
                    RosterStatus::Accepted
                } else {
                    RosterStatus::Declined
                };
                Ok(*entry)
            }
            _ => Err(TournamentError::NotInvited),
        }
    }

    pub fn accepted_ids(&self) -> Vec<Uuid> {
        self.roster
            .iter()
            .filter(|(_, status)| **status == RosterStatus::Accepted)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Move to `active` and return the players of the first round
    pub fn start(&mut self, caller: Uuid) -> Result<Vec<Uuid>, TournamentError> {
        if caller != self.creator_id {
            return Err(TournamentError::NotCreator);
        }
        if self.status != TournamentStatus::Waiting {
            return Err(TournamentError::NotWaiting);
        }
        let accepted = self.accepted_ids();
        if accepted.len() < MIN_ROSTER {
            return Err(TournamentError::NotEnoughPlayers);
        }
        self.status = TournamentStatus::Active;
        Ok(accepted)
    }

    /// Shuffle and pair ids two at a time from the end of the list
    pub fn pair<R: Rng + ?Sized>(mut ids: Vec<Uuid>, rng: &mut R) -> Pairing {
        ids.shuffle(rng);
        let mut pairs = Vec::with_capacity(ids.len() / 2);
        while ids.len() >= 2 {
            let (Some(a), Some(b)) = (ids.pop(), ids.pop()) else {
                break;
            };
            pairs.push((a, b));
        }
        Pairing {
            pairs,
            bye: ids.pop(),
        }
    }

    /// Install the matches of a new round
    pub fn begin_round(&mut self, matches: Vec<BracketMatch>, bye: Option<Uuid>) {
        self.round += 1;
        self.current_round = matches;
        self.bye = bye;
    }

    /// Set the winner of one match of the current round
    pub fn record_result(
        &mut self,
        match_id: Uuid,
        winner_id: Uuid,
    ) -> Result<RoundProgress, TournamentError> {
        if self.history.iter().any(|m| m.match_id == match_id) {
            return Err(TournamentError::AlreadyDecided);
        }
        if self.status != TournamentStatus::Active {
            return Err(TournamentError::NotActive);
        }

        let Some(bracket_match) = self
            .current_round
            .iter_mut()
            .find(|m| m.match_id == match_id)
        else {
            return Err(TournamentError::UnknownMatch);
        };

        if winner_id != bracket_match.player1_id && winner_id != bracket_match.player2_id {
            return Err(TournamentError::NotAParticipant);
        }

        bracket_match.winner_id = Some(winner_id);
        self.history.push(bracket_match.clone());

        let winners: Option<Vec<Uuid>> =
            self.current_round.iter().map(|m| m.winner_id).collect();
        let Some(mut advancing) = winners else {
            return Ok(RoundProgress::Pending);
        };
        advancing.extend(self.bye);

        if let [champion] = advancing[..] {
            self.finish(champion);
            return Ok(RoundProgress::Finished(champion));
        }
        Ok(RoundProgress::NextRound(advancing))
    }

    /// Terminal: no further rounds
    pub fn finish(&mut self, champion_id: Uuid) {
        self.status = TournamentStatus::Finished;
        self.champion_id = Some(champion_id);
        self.bye = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tokio_test::{assert_err, assert_ok};

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    fn bracket_match(player1_id: Uuid, player2_id: Uuid, round: u32) -> BracketMatch {
        BracketMatch {
            match_id: Uuid::new_v4(),
            player1_id,
            player2_id,
            winner_id: None,
            round,
        }
    }

    /// Tournament with every listed player accepted and started
    fn active(players: &[Uuid]) -> Tournament {
        let mut t = Tournament::new("Cup", players[0]).unwrap();
        for p in &players[1..] {
            t.invite_player(*p);
            t.respond_invite(*p, true).unwrap();
        }
        t.start(players[0]).unwrap();
        t
    }

    #[test]
    fn creator_is_auto_accepted() {
        let creator = Uuid::new_v4();
        let t = Tournament::new("  Friday Cup ", creator).unwrap();
        assert_eq!(t.name, "Friday Cup");
        assert_eq!(t.roster.get(&creator), Some(&RosterStatus::Accepted));
        assert_eq!(t.status, TournamentStatus::Waiting);
    }

    #[test]
    fn blank_or_long_names_are_rejected() {
        assert_eq!(
            Tournament::new("   ", Uuid::new_v4()).err(),
            Some(TournamentError::InvalidName)
        );
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert_err!(Tournament::new(&long, Uuid::new_v4()));
    }

    #[test]
    fn invites_transition_only_from_invited() {
        let creator = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let mut t = Tournament::new("Cup", creator).unwrap();

        assert!(t.invite_player(guest));
        assert!(!t.invite_player(guest));
        assert!(!t.invite_player(creator));
        assert!(t.is_invited(guest));

        assert_eq!(t.respond_invite(guest, false), Ok(RosterStatus::Declined));
        assert_eq!(t.respond_invite(guest, true), Err(TournamentError::NotInvited));
        assert_eq!(t.respond_invite(creator, true), Err(TournamentError::NotInvited));
        assert_eq!(
            t.respond_invite(Uuid::new_v4(), true),
            Err(TournamentError::NotInvited)
        );
    }

    #[test]
    fn start_requires_creator_and_two_accepted() {
        let creator = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let mut t = Tournament::new("Cup", creator).unwrap();
        t.invite_player(guest);

        assert_eq!(t.start(guest), Err(TournamentError::NotCreator));
        assert_eq!(t.start(creator), Err(TournamentError::NotEnoughPlayers));
        assert_eq!(t.status, TournamentStatus::Waiting);

        t.respond_invite(guest, true).unwrap();
        let players = assert_ok!(t.start(creator));
        assert_eq!(players.len(), 2);
        assert_eq!(t.status, TournamentStatus::Active);
        assert_eq!(t.start(creator), Err(TournamentError::NotWaiting));
    }

    #[test]
    fn pairing_is_reproducible_and_leaves_one_bye() {
        let players = ids(5);
        let first = Tournament::pair(players.clone(), &mut ChaCha8Rng::seed_from_u64(7));
        let second = Tournament::pair(players.clone(), &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(first, second);

        assert_eq!(first.pairs.len(), 2);
        let mut seen: Vec<Uuid> = first.pairs.iter().flat_map(|(a, b)| [*a, *b]).collect();
        seen.extend(first.bye);
        seen.sort();
        let mut expected = players;
        expected.sort();
        assert_eq!(seen, expected);

        let even = Tournament::pair(ids(4), &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(even.pairs.len(), 2);
        assert!(even.bye.is_none());
    }

    #[test]
    fn round_advances_winners_then_finishes() {
        let p = ids(4);
        let mut t = active(&p);
        let semi1 = bracket_match(p[0], p[1], 1);
        let semi2 = bracket_match(p[2], p[3], 1);
        t.begin_round(vec![semi1.clone(), semi2.clone()], None);

        assert_eq!(t.record_result(semi1.match_id, p[1]), Ok(RoundProgress::Pending));
        assert_eq!(
            t.record_result(semi2.match_id, p[2]),
            Ok(RoundProgress::NextRound(vec![p[1], p[2]]))
        );

        let fin = bracket_match(p[1], p[2], 2);
        t.begin_round(vec![fin.clone()], None);
        assert_eq!(t.round, 2);
        assert_eq!(t.record_result(fin.match_id, p[2]), Ok(RoundProgress::Finished(p[2])));
        assert_eq!(t.status, TournamentStatus::Finished);
        assert_eq!(t.champion_id, Some(p[2]));
        assert_eq!(t.history.len(), 3);
    }

    #[test]
    fn bye_player_advances_with_winners() {
        let p = ids(3);
        let mut t = active(&p);
        let m = bracket_match(p[0], p[1], 1);
        t.begin_round(vec![m.clone()], Some(p[2]));

        assert_eq!(
            t.record_result(m.match_id, p[0]),
            Ok(RoundProgress::NextRound(vec![p[0], p[2]]))
        );
    }

    #[test]
    fn results_are_set_once_and_validated() {
        let p = ids(2);
        let mut t = active(&p);
        let m = bracket_match(p[0], p[1], 1);
        let other = bracket_match(p[0], p[1], 1);
        t.begin_round(vec![m.clone(), other.clone()], None);

        assert_eq!(
            t.record_result(Uuid::new_v4(), p[0]),
            Err(TournamentError::UnknownMatch)
        );
        assert_eq!(
            t.record_result(m.match_id, Uuid::new_v4()),
            Err(TournamentError::NotAParticipant)
        );
        assert_eq!(t.record_result(m.match_id, p[0]), Ok(RoundProgress::Pending));
        assert_eq!(
            t.record_result(m.match_id, p[1]),
            Err(TournamentError::AlreadyDecided)
        );
        assert_eq!(t.current_round[0].winner_id, Some(p[0]));
        assert_eq!(t.history.len(), 1);
    }

    #[test]
    fn finished_tournament_rejects_results() {
        let p = ids(2);
        let mut t = active(&p);
        let m = bracket_match(p[0], p[1], 1);
        t.begin_round(vec![m.clone()], None);
        t.record_result(m.match_id, p[0]).unwrap();

        assert_eq!(t.record_result(m.match_id, p[0]), Err(TournamentError::AlreadyDecided));
        assert_eq!(
            t.record_result(Uuid::new_v4(), p[0]),
            Err(TournamentError::NotActive)
        );
    }
}
