//! WebSocket protocol message definitions
//! These are the wire types for client-server communication, shared by the
//! room simulation, the lobby services and the client-side synchronizer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Player identity: a wallet address or a session-id fallback.
///
/// Always normalized (trimmed, lower-cased) so `0xABC` and `0xabc` refer to
/// the same player everywhere.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short display form used when a player has no display name
    pub fn short(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 10 {
            return self.0.clone();
        }
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}…{tail}")
    }
}

impl From<String> for Identity {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for Identity {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Room-local id for enemies, bullets, projectiles, objectives and nests.
///
/// Serialized as a number; also accepted as a decimal string because JSON
/// object keys are strings and tagged-enum buffering hands keys over verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for EntityId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntityIdVisitor;

        impl<'de> serde::de::Visitor<'de> for EntityIdVisitor {
            type Value = EntityId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an entity id as integer or decimal string")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<EntityId, E> {
                u32::try_from(v)
                    .map(EntityId)
                    .map_err(|_| E::custom("entity id out of range"))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<EntityId, E> {
                u32::try_from(v)
                    .map(EntityId)
                    .map_err(|_| E::custom("entity id out of range"))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<EntityId, E> {
                v.parse::<u32>().map(EntityId).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(EntityIdVisitor)
    }
}

/// Enemy variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnemyKind {
    /// Fragile melee rusher
    Swarmer,
    /// Ranged kiter
    Spitter,
    /// Telegraphed charge attacker
    Charger,
    /// Slow spawner of swarmers
    BroodMother,
    /// Burrows underground and ambushes
    Burrower,
}

impl EnemyKind {
    pub const ALL: [EnemyKind; 5] = [
        EnemyKind::Swarmer,
        EnemyKind::Spitter,
        EnemyKind::Charger,
        EnemyKind::BroodMother,
        EnemyKind::Burrower,
    ];
}

/// Auto-fire target selection rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPriority {
    #[default]
    Closest,
    LowestHp,
    HighestThreat,
    CurrentAggressor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    DestroyNest,
    ActivateTerminal,
    RetrieveSample,
}

/// Objective progress. Ordered: a status may only move to a later variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    #[default]
    Briefing,
    DropIn,
    Active,
    Extraction,
    Completed,
    Failed,
}

impl MissionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MissionStatus::Completed | MissionStatus::Failed)
    }
}

// ============================================================================
// Room (game socket) messages
// ============================================================================

/// Messages sent from client to room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomClientMsg {
    /// Movement input for the next tick
    Input {
        #[serde(default)]
        up: bool,
        #[serde(default)]
        down: bool,
        #[serde(default)]
        left: bool,
        #[serde(default)]
        right: bool,
        /// Strictly increasing per client; stale frames are dropped
        seq: u32,
    },

    /// Change the auto-fire priority rule
    SetTargetPriority { priority: TargetPriority },

    /// Focus fire on one enemy (`None` clears the focus)
    SetFocusTarget { target_id: Option<EntityId> },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        #[serde(default)]
        t: u64,
    },
}

/// Messages sent from room to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomServerMsg {
    /// Seat redeemed and player record created (or re-attached)
    Joined {
        room_id: Uuid,
        identity: Identity,
        tick: u64,
    },

    /// Full world state, sent after every completed tick
    Snapshot(WorldSnapshot),

    /// All primary objectives done, extraction countdown started
    ExtractionOpen { timer_ms: u64 },

    MissionComplete {
        scores: BTreeMap<Identity, u32>,
        mission_id: String,
        objectives: Vec<ObjectiveResult>,
    },

    MissionFailed {
        /// "all_dead" or "extraction_timeout"
        reason: String,
        scores: BTreeMap<Identity, u32>,
    },

    /// Survival room ended (no mission attached)
    Gameover {
        scores: BTreeMap<Identity, u32>,
        tick: u64,
    },

    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveResult {
    pub id: EntityId,
    pub status: ObjectiveStatus,
}

/// One authoritative world-state sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub players: BTreeMap<Identity, PlayerSnapshot>,
    pub enemies: BTreeMap<EntityId, EnemySnapshot>,
    pub bullets: BTreeMap<EntityId, BulletSnapshot>,
    pub projectiles: BTreeMap<EntityId, ProjectileSnapshot>,
    pub objectives: BTreeMap<EntityId, ObjectiveSnapshot>,
    pub nests: BTreeMap<EntityId, NestSnapshot>,
    pub mission: MissionSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub x: f32,
    pub y: f32,
    pub hp: f32,
    pub alive: bool,
    pub score: u32,
    pub carrying: Option<EntityId>,
    pub target_priority: TargetPriority,
    pub focus_target_id: Option<EntityId>,
    /// Last processed input sequence
    pub last_input_seq: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemySnapshot {
    pub kind: EnemyKind,
    pub x: f32,
    pub y: f32,
    pub hp: f32,
    pub max_hp: f32,
    pub alive: bool,
    /// Behaviour state label ("chase", "telegraph", ...)
    pub state: String,
    pub burrowed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletSnapshot {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub owner: Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub damage: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveSnapshot {
    pub kind: ObjectiveKind,
    pub x: f32,
    pub y: f32,
    pub status: ObjectiveStatus,
    pub progress: f32,
    pub is_primary: bool,
    pub nest_id: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestSnapshot {
    pub objective_id: EntityId,
    pub x: f32,
    pub y: f32,
    pub hp: f32,
    pub alive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionSnapshot {
    pub mission_id: String,
    pub status: MissionStatus,
    pub alert_level: f32,
    pub extraction_open: bool,
    pub extraction_timer_ms: f32,
    pub extract_zone_x: f32,
    pub extract_zone_y: f32,
    pub map_width: f32,
    pub map_height: f32,
}

// ============================================================================
// Lobby (social socket) messages
// ============================================================================

/// Messages sent from client to the lobby
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LobbyClientMsg {
    /// Must be the first message on a lobby socket
    Register {
        identity: String,
        #[serde(default)]
        display_name: Option<String>,
    },
    CreateSquad,
    JoinSquad { squad_id: String },
    LeaveSquad,
    SetReady { ready: bool },
    StartMatch {
        /// Difficulty tier 1-3; server default when absent
        #[serde(default)]
        difficulty: Option<u8>,
    },
    EnterMatchmaking,
    LeaveMatchmaking,
    SendSquadInvite { to_identity: String },
    Ping,
}

/// Messages sent from the lobby to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LobbyServerMsg {
    Registered { identity: Identity },
    SquadUpdate { squad: SquadView },
    SquadDisbanded { squad_id: String },
    SquadInvite {
        from: Identity,
        from_name: String,
        squad_id: String,
    },
    GameReady { reservation: SeatReservation },
    GameReadyError { message: String },
    MatchmakingStatus { status: MatchmakingStatus },
    FriendOnline {
        identity: Identity,
        display_name: String,
    },
    FriendOffline { identity: Identity },
    FriendRequest {
        from: Identity,
        display_name: String,
    },
    /// Sent to the requester when their friend request is accepted
    FriendAccepted {
        identity: Identity,
        display_name: String,
    },
    Error { code: String, message: String },
    Pong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadView {
    pub id: String,
    pub leader: Identity,
    pub members: Vec<SquadMemberView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadMemberView {
    pub identity: Identity,
    pub display_name: String,
    pub ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchmakingStatus {
    Searching,
    Stopped,
    Matched,
    Timeout,
}

/// Seat reservation delivered to exactly one squad member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatReservation {
    pub room_id: Uuid,
    /// Opaque single-use token, presented on the game socket
    pub token: String,
    /// Unix seconds after which the token is refused
    pub expires_at: u64,
}
