//! Consumer-facing listing API over the cached upstream client.

use crate::listing::filters::FilterState;
use crate::upstream::client::MarketClient;
use crate::upstream::errors::UpstreamError;
use crate::upstream::models::{MarketListItem, MarketPage, MetricType, TimeWindow};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// One page as returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    pub items: Vec<MarketListItem>,
    /// Upstream's own continuation flag, before the short-page rule.
    pub upstream_has_more: bool,
    pub limit: u32,
    pub offset: u32,
    pub total: Option<u64>,
}

impl PageResult {
    fn from_page(page: MarketPage, limit: u32, offset: u32) -> Self {
        Self {
            items: page.data,
            upstream_has_more: page.has_more,
            limit,
            offset,
            total: page.total,
        }
    }

    /// More data exists only if upstream says so and the page came back full.
    pub fn has_more(&self) -> bool {
        self.upstream_has_more && self.items.len() >= self.limit as usize
    }

    pub fn next_offset(&self) -> u32 {
        self.offset.saturating_add(self.items.len() as u32)
    }
}

pub struct MarketService {
    client: Arc<MarketClient>,
    page_size: u32,
}

impl MarketService {
    pub fn new(client: Arc<MarketClient>, page_size: u32) -> Self {
        Self { client, page_size }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Page of markets for `filters` starting at `offset`.
    pub async fn fetch_page(
        &self,
        filters: &FilterState,
        offset: u32,
    ) -> Result<PageResult, UpstreamError> {
        let request = filters.descriptor(self.page_size)?.at(offset);
        let page = self.client.market_page(&request).await?;
        Ok(PageResult::from_page(page, request.limit, offset))
    }

    /// Drop the cached first page for `filters` and fetch it again.
    ///
    /// Concurrent refreshes of the same state collapse into one upstream call
    /// because the queued fetch re-checks the cache.
    pub async fn refresh(&self, filters: &FilterState) -> Result<PageResult, UpstreamError> {
        let request = filters.descriptor(self.page_size)?;
        debug!(key = request.cache_key(), "refreshing first page");
        self.client.invalidate_market_page(&request);
        let page = self.client.market_page(&request).await?;
        Ok(PageResult::from_page(page, request.limit, 0))
    }

    pub async fn leaderboard(
        &self,
        metric: MetricType,
        window: TimeWindow,
    ) -> Result<Vec<Value>, UpstreamError> {
        self.client.leaderboard(metric, window).await
    }
}
