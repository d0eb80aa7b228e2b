//! Match engine: physics, slots, sessions and their registry

pub mod r#match;
pub mod physics;
pub mod registry;
pub mod slot;
pub mod snapshot;

pub use r#match::{MatchRecord, SessionConfig, SessionError, SessionEvent};
pub use registry::{MatchHandle, SessionRegistry};
pub use slot::SlotConnection;
pub use snapshot::MatchView;
