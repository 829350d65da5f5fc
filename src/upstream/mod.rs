//! Client for the third-party market-data service.
//!
//! Every network call goes through one [`Transport`]: a process-wide serial
//! queue admits it, the retry policy re-attempts it on rate-limit signals,
//! and each attempt is bounded by a timeout.

pub mod build_id;
pub mod cache;
pub mod client;
pub mod errors;
pub mod json;
pub mod leaderboard;
pub mod models;
pub mod queue;
pub mod retry;
pub mod transport;

pub use build_id::{BuildIdResolver, ScrapedBuildId};
pub use cache::TtlCache;
pub use client::MarketClient;
pub use errors::{ErrorKind, UpstreamError};
pub use models::*;
pub use queue::SerialQueue;
pub use retry::RetryPolicy;
pub use transport::{Fetch, HttpFetch, Transport};
