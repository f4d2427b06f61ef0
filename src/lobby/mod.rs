//! Lobby: presence, squads and matchmaking

pub mod presence;
pub mod queue;
pub mod service;
pub mod squads;

pub use presence::{PresenceFrame, PresenceRegistry, PresenceSender};
pub use service::{LobbyService, LobbySettings, StartMatchError};
pub use squads::SquadError;
