//! Squad Ops server - authoritative co-op mission rooms
//!
//! - Fixed-tick room simulation with enemies, objectives and extraction
//! - Lobby socket for presence, squads and matchmaking
//! - Signed single-use seat reservations for the game socket
//! - Profiles, friends and match history behind a record store
//! - Snapshot buffering and interpolation for clients

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod http;
pub mod lobby;
pub mod store;
pub mod util;
pub mod ws;
