//! Market listing handlers.

use axum::extract::{Query, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use tracing::debug;
use ts_rs::TS;

use crate::listing::{FilterState, PageResult};
use crate::state::AppState;
use crate::upstream::models::{MarketListItem, SortOrder};
use crate::web::error::ApiError;
use crate::web::routes::{cache, with_cache_control};

#[derive(Debug, Default, Deserialize)]
pub struct MarketParams {
    pub q: Option<String>,
    pub category: Option<String>,
    pub tag: Option<String>,
    pub sort: Option<String>,
    #[serde(default)]
    pub offset: u32,
}

impl MarketParams {
    fn filter_state(&self) -> Result<FilterState, ApiError> {
        let sort = match self.sort.as_deref() {
            Some(raw) => raw.parse::<SortOrder>()?,
            None => SortOrder::default(),
        };
        Ok(FilterState {
            search: self.q.clone(),
            category: self.category.clone(),
            tag: self.tag.clone(),
            sort,
        })
    }
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct MarketPageResponse {
    #[ts(type = "Array<{ id: string } & Record<string, unknown>>")]
    pub items: Vec<MarketListItem>,
    pub has_more: bool,
    pub offset: u32,
    pub next_offset: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub total: Option<u64>,
}

impl From<PageResult> for MarketPageResponse {
    fn from(page: PageResult) -> Self {
        Self {
            has_more: page.has_more(),
            offset: page.offset,
            next_offset: page.next_offset(),
            total: page.total,
            items: page.items,
        }
    }
}

/// `GET /api/markets`
pub(super) async fn list_markets(
    State(state): State<AppState>,
    Query(params): Query<MarketParams>,
) -> Result<Response, ApiError> {
    let filters = params.filter_state()?;
    let page = state.markets.fetch_page(&filters, params.offset).await?;
    debug!(
        offset = page.offset,
        items = page.items.len(),
        has_more = page.has_more(),
        "market page served"
    );
    Ok(with_cache_control(MarketPageResponse::from(page), cache::MARKETS))
}

/// `POST /api/markets/refresh`
pub(super) async fn refresh_markets(
    State(state): State<AppState>,
    Query(params): Query<MarketParams>,
) -> Result<Response, ApiError> {
    let filters = params.filter_state()?;
    let page = state.markets.refresh(&filters).await?;
    Ok(with_cache_control(MarketPageResponse::from(page), cache::NO_STORE))
}
