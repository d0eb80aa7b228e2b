//! Match result persistence

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::game::MatchRecord;

use super::supabase::{SupabaseClient, SupabaseError};

/// Row shape of the `matches` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRow {
    pub id: Uuid,
    pub player1_id: Uuid,
    pub player2_id: Uuid,
    pub score1: u32,
    pub score2: u32,
    pub winner_id: Uuid,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl MatchRow {
    pub fn new(match_id: Uuid, record: &MatchRecord) -> Self {
        Self {
            id: match_id,
            player1_id: record.player1_id,
            player2_id: record.player2_id,
            score1: record.score1,
            score2: record.score2,
            winner_id: record.winner_id,
            finished_at: chrono::Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct MatchResultStore {
    client: SupabaseClient,
}

impl MatchResultStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub async fn record(&self, row: &MatchRow) -> Result<(), SupabaseError> {
        self.client.insert("matches", row).await
    }
}

/// Background writer fed by the session event loop
pub struct ResultRecorder {
    rx: mpsc::UnboundedReceiver<(Uuid, MatchRecord)>,
    store: MatchResultStore,
}

impl ResultRecorder {
    pub fn new(rx: mpsc::UnboundedReceiver<(Uuid, MatchRecord)>, store: MatchResultStore) -> Self {
        Self { rx, store }
    }

    /// Write every record; failures are logged and dropped
    pub async fn run(mut self) {
        info!("Result recorder started");
        while let Some((match_id, record)) = self.rx.recv().await {
            let row = MatchRow::new(match_id, &record);
            match self.store.record(&row).await {
                Ok(()) => debug!(match_id = %match_id, "Match result stored"),
                Err(e) => error!(match_id = %match_id, error = %e, "Failed to store match result"),
            }
        }
        info!("Result recorder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_uses_snake_case_columns() {
        let record = MatchRecord {
            player1_id: Uuid::new_v4(),
            player2_id: Uuid::new_v4(),
            score1: 5,
            score2: 2,
            winner_id: Uuid::nil(),
        };
        let row = MatchRow::new(Uuid::nil(), &record);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["score1"], 5);
        assert_eq!(json["player2_id"], record.player2_id.to_string());
        assert!(json.get("finished_at").is_some());
    }
}
