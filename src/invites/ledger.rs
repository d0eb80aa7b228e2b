//! Ephemeral invite records linking two users to a match id

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::{SessionError, SessionRegistry};
use crate::ws::protocol::MatchStatus;

/// One pending invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRecord {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub target_id: Uuid,
    pub match_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl InviteRecord {
    fn new(creator_id: Uuid, target_id: Uuid, match_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            creator_id,
            target_id,
            match_id,
            created_at: Utc::now(),
        }
    }
}

/// Ledger errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Invite not found")]
    NotFound,

    #[error("Match not found")]
    MatchNotFound,

    #[error("Match is no longer waiting for players")]
    MatchNotWaiting,

    #[error("Invite is addressed to another user")]
    NotTarget,

    #[error("Cannot invite yourself")]
    SelfInvite,

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// In-memory invite table
pub struct InviteLedger {
    invites: DashMap<Uuid, InviteRecord>,
    registry: Arc<SessionRegistry>,
}

impl InviteLedger {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            invites: DashMap::new(),
            registry,
        }
    }

    /// Invite `target_id` to an existing waiting match, or to a freshly created one
    pub fn create(
        &self,
        creator_id: Uuid,
        target_id: Uuid,
        match_id: Option<Uuid>,
    ) -> Result<InviteRecord, LedgerError> {
        if creator_id == target_id {
            return Err(LedgerError::SelfInvite);
        }

        let match_id = match match_id {
            Some(id) => {
                let handle = self.registry.get(&id).ok_or(LedgerError::MatchNotFound)?;
                if handle.is_reserved() {
                    return Err(SessionError::NotEntrant.into());
                }
                if handle.status() != MatchStatus::Waiting {
                    return Err(LedgerError::MatchNotWaiting);
                }
                id
            }
            None => self.registry.create(Uuid::new_v4())?.id,
        };

        Ok(self.link(creator_id, target_id, match_id))
    }

    /// Record an invite for a match the caller already set up
    pub fn link(&self, creator_id: Uuid, target_id: Uuid, match_id: Uuid) -> InviteRecord {
        let record = InviteRecord::new(creator_id, target_id, match_id);
        self.invites.insert(record.id, record.clone());
        info!(
            invite_id = %record.id,
            creator_id = %creator_id,
            target_id = %target_id,
            match_id = %match_id,
            "Invite created"
        );
        record
    }

    /// Consume an invite addressed to `user_id`, returning its match id
    pub fn accept(&self, invite_id: Uuid, user_id: Uuid) -> Result<Uuid, LedgerError> {
        let record = self.take_for(invite_id, user_id)?;
        if self.registry.get(&record.match_id).is_none() {
            return Err(LedgerError::MatchNotFound);
        }
        info!(invite_id = %invite_id, match_id = %record.match_id, "Invite accepted");
        Ok(record.match_id)
    }

    /// Drop an invite addressed to `user_id`
    pub fn decline(&self, invite_id: Uuid, user_id: Uuid) -> Result<(), LedgerError> {
        self.take_for(invite_id, user_id)?;
        info!(invite_id = %invite_id, "Invite declined");
        Ok(())
    }

    fn take_for(&self, invite_id: Uuid, user_id: Uuid) -> Result<InviteRecord, LedgerError> {
        self.invites
            .remove_if(&invite_id, |_, record| record.target_id == user_id)
            .map(|(_, record)| record)
            .ok_or_else(|| {
                if self.invites.contains_key(&invite_id) {
                    LedgerError::NotTarget
                } else {
                    LedgerError::NotFound
                }
            })
    }

    /// Pending invites targeted at `user_id`, oldest first
    pub fn list_for(&self, user_id: Uuid) -> Vec<InviteRecord> {
        let mut invites: Vec<InviteRecord> = self
            .invites
            .iter()
            .filter(|entry| entry.value().target_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        invites.sort_by_key(|record| record.created_at);
        invites
    }

    /// Delete every invite that points at `match_id`
    pub fn purge_match(&self, match_id: Uuid) -> usize {
        let before = self.invites.len();
        self.invites.retain(|_, record| record.match_id != match_id);
        let purged = before.saturating_sub(self.invites.len());
        if purged > 0 {
            debug!(match_id = %match_id, purged, "Purged invites for ended match");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.invites.len()
    }
}
