//! Match invitations

pub mod ledger;

pub use ledger::{InviteLedger, InviteRecord, LedgerError};
