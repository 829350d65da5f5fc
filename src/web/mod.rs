//! HTTP surface over the listing and leaderboard APIs.

pub mod error;
pub mod leaderboard;
pub mod markets;
pub mod routes;
pub mod status;

pub use routes::*;
