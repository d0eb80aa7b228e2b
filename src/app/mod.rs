//! Application wiring

pub mod events;
pub mod state;

pub use state::AppState;
