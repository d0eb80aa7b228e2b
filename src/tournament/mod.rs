//! Single-elimination tournaments built on match sessions

pub mod bracket;
pub mod service;

pub use bracket::{Tournament, TournamentError};
pub use service::BracketOrchestrator;
