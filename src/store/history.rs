//! Writes finished rooms into match history and profile stats

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::RoomOutcome;

use super::records::{MatchHistoryEntry, PlayerProfile};
use super::{RecordStore, StoreResult};

/// Consumes room outcomes after their room task has ended
#[derive(Clone)]
pub struct HistoryRecorder {
    store: Arc<dyn RecordStore>,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Record outcomes until every sender is gone
    pub async fn run(self, mut outcomes: mpsc::UnboundedReceiver<RoomOutcome>) {
        while let Some(outcome) = outcomes.recv().await {
            self.record(&outcome).await;
        }
        info!("History recorder stopped");
    }

    /// One history entry per player plus the profile aggregate. A failed
    /// write for one player does not stop the others.
    pub async fn record(&self, outcome: &RoomOutcome) {
        let played_at = Utc::now();
        for player in &outcome.players {
            let entry = MatchHistoryEntry {
                id: Uuid::new_v4(),
                room_id: outcome.room_id,
                identity: player.identity.clone(),
                mission_id: outcome.mission_id.clone(),
                difficulty: outcome.difficulty,
                result: outcome.result.as_str().to_string(),
                score: player.score,
                kills: player.kills,
                survived: player.survived,
                duration_ms: outcome.duration_ms(),
                played_at,
            };

            if let Err(e) = self.write(&player.display_name, entry).await {
                warn!(
                    room_id = %outcome.room_id,
                    identity = %player.identity,
                    error = %e,
                    "Failed to record match history"
                );
            }
        }

        info!(
            room_id = %outcome.room_id,
            result = outcome.result.as_str(),
            players = outcome.players.len(),
            "Match history recorded"
        );
    }

    async fn write(&self, display_name: &str, entry: MatchHistoryEntry) -> StoreResult<()> {
        let mut profile = match self.store.get_profile(entry.identity.clone()).await? {
            Some(profile) => profile,
            None => PlayerProfile::new(entry.identity.clone(), display_name, entry.played_at),
        };
        profile.record_match(&entry);

        self.store.append_history(entry).await?;
        self.store.upsert_profile(profile).await
    }
}
