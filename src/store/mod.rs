//! Data store modules for Supabase integration

pub mod friends;
pub mod results;
pub mod supabase;

pub use friends::FriendshipStore;
pub use results::{MatchResultStore, ResultRecorder};
pub use supabase::{SupabaseClient, SupabaseError};
