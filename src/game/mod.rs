//! Game simulation modules

pub mod ai;
pub mod combat;
pub mod content;
pub mod mission;
pub mod physics;
pub mod room;
pub mod seats;
pub mod sim;
pub mod snapshot;
pub mod world;

pub use room::{
    Audience, PlayerOutcome, RoomEnvelope, RoomHandle, RoomOptions, RoomOutcome, RoomRegistry,
};
pub use seats::{ReservationError, ReservationSigner, SeatClaims};
pub use sim::{JoinAck, JoinRejection, RoomResult, Simulation};
