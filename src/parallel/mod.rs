//! Concurrency auditing helpers.

pub mod occupancy;

pub use occupancy::{OccupancyCap, OccupancyCaps, OccupancyGuard};
