//! Gateway handlers for the duel RPC surface.

pub mod admin;
pub mod credits;
pub mod duel;
pub mod health;
pub mod queue;
pub mod stream;

#[cfg(feature = "mock-api")]
pub mod dev;

pub use health::health_check;
