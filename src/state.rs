//! Application state shared across request handlers.

use crate::listing::MarketService;
use crate::upstream::SerialQueue;
use std::sync::Arc;

/// Process-wide singletons, constructed once by [`crate::app::App`].
#[derive(Clone)]
pub struct AppState {
    pub markets: Arc<MarketService>,
    /// Handle to the queue every upstream call passes through.
    pub queue: SerialQueue,
}

impl AppState {
    pub fn new(markets: Arc<MarketService>, queue: SerialQueue) -> Self {
        Self { markets, queue }
    }
}
