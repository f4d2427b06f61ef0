//! Client-side helpers for consuming room snapshots

pub mod sync;

pub use sync::{Interpolate, SnapshotBuffer};
