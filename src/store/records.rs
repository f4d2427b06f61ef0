//! Persistent record types: profiles, friend edges and match history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ws::protocol::Identity;

/// Player profile with lifetime stats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub identity: Identity,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub games_played: u32,
    #[serde(default)]
    pub games_won: u32,
    #[serde(default)]
    pub total_score: u64,
    #[serde(default)]
    pub total_kills: u64,
    #[serde(default)]
    pub best_score: u32,
}

impl PlayerProfile {
    pub fn new(identity: Identity, display_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            identity,
            display_name: display_name.into(),
            created_at: now,
            last_seen: now,
            games_played: 0,
            games_won: 0,
            total_score: 0,
            total_kills: 0,
            best_score: 0,
        }
    }

    /// Fold one finished match into the aggregate stats
    pub fn record_match(&mut self, entry: &MatchHistoryEntry) {
        self.games_played += 1;
        if entry.result == "completed" {
            self.games_won += 1;
        }
        self.total_score += u64::from(entry.score);
        self.total_kills += u64::from(entry.kills);
        self.best_score = self.best_score.max(entry.score);
        self.last_seen = self.last_seen.max(entry.played_at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendStatus {
    Pending,
    Accepted,
}

/// Directed friendship row. An accepted friendship is stored as two
/// accepted edges, one per direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendEdge {
    pub owner: Identity,
    pub friend: Identity,
    pub status: FriendStatus,
    pub created_at: DateTime<Utc>,
}

impl FriendEdge {
    pub fn pending(owner: Identity, friend: Identity, now: DateTime<Utc>) -> Self {
        Self {
            owner,
            friend,
            status: FriendStatus::Pending,
            created_at: now,
        }
    }

    pub fn links(&self, owner: &Identity, friend: &Identity) -> bool {
        &self.owner == owner && &self.friend == friend
    }
}

/// One player's line for one finished room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchHistoryEntry {
    pub id: Uuid,
    pub room_id: Uuid,
    pub identity: Identity,
    pub mission_id: Option<String>,
    pub difficulty: Option<u8>,
    /// "completed", "all_dead", "extraction_timeout", "gameover" or "abandoned"
    pub result: String,
    pub score: u32,
    pub kills: u32,
    pub survived: bool,
    pub duration_ms: u64,
    pub played_at: DateTime<Utc>,
}
