//! Friendship lookups

use serde::de::IgnoredAny;
use uuid::Uuid;

use super::supabase::{SupabaseClient, SupabaseError};

/// PostgREST filter matching an accepted friendship in either direction
fn friendship_query(a: Uuid, b: Uuid) -> String {
    format!(
        "select=id&status=eq.accepted&or=(and(user_id.eq.{a},friend_id.eq.{b}),and(user_id.eq.{b},friend_id.eq.{a}))&limit=1"
    )
}

#[derive(Clone)]
pub struct FriendshipStore {
    client: SupabaseClient,
}

impl FriendshipStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub async fn are_friends(&self, a: Uuid, b: Uuid) -> Result<bool, SupabaseError> {
        let rows: Vec<IgnoredAny> = self
            .client
            .get("friendships", &friendship_query(a, b))
            .await?;
        Ok(!rows.is_empty())
    }
}
