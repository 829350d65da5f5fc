//! Cached access to the listing and leaderboard endpoints.
//!
//! Lookup order for every call: TTL cache, then the serial queue, then the
//! retrying transport. Payloads are cached as opaque JSON under a key derived
//! from the request; decoding happens on the way out, so an entry that no
//! longer decodes is simply a miss.

use crate::upstream::build_id::BuildIdResolver;
use crate::upstream::cache::TtlCache;
use crate::upstream::errors::UpstreamError;
use crate::upstream::json::{from_value_with_path, parse_json_with_context};
use crate::upstream::leaderboard::extract_rows;
use crate::upstream::models::{MarketPage, MetricType, RequestDescriptor, TimeWindow};
use crate::upstream::transport::Transport;
use anyhow::Context;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

pub struct MarketClient {
    transport: Arc<Transport>,
    cache: TtlCache<Arc<Value>>,
    build_ids: Arc<dyn BuildIdResolver>,
    markets_url: Url,
    leaderboard_data_url: String,
    ttl: Duration,
}

impl MarketClient {
    pub fn new(
        transport: Arc<Transport>,
        cache: TtlCache<Arc<Value>>,
        build_ids: Arc<dyn BuildIdResolver>,
        markets_url: &str,
        leaderboard_data_url: impl Into<String>,
        ttl: Duration,
    ) -> anyhow::Result<Self> {
        let markets_url = Url::parse(markets_url)
            .with_context(|| format!("Invalid markets URL: {markets_url}"))?;
        Ok(Self {
            transport,
            cache,
            build_ids,
            markets_url,
            leaderboard_data_url: leaderboard_data_url.into(),
            ttl,
        })
    }

    /// Fetch one listing page, serving it from cache while fresh.
    pub async fn market_page(
        &self,
        request: &RequestDescriptor,
    ) -> Result<MarketPage, UpstreamError> {
        let key = request.cache_key();
        if let Some(page) = self.cached_page(&key) {
            debug!(key, "market page cache hit");
            return Ok(page);
        }

        let url = request.to_url(&self.markets_url);
        self.transport
            .queue()
            .enqueue(self.fetch_market_page(&key, &url))
            .await
    }

    /// Body of a queued listing fetch. Runs only while holding the queue slot.
    async fn fetch_market_page(&self, key: &str, url: &Url) -> Result<MarketPage, UpstreamError> {
        // Someone queued ahead of us may have fetched the same page.
        if let Some(page) = self.cached_page(key) {
            debug!(key, "market page filled while queued");
            return Ok(page);
        }

        let body = self.transport.get_with_retry(url.as_str()).await?;
        let value: Value =
            parse_json_with_context(&body).map_err(|source| format_drift(url.as_str(), source))?;
        let page: MarketPage =
            from_value_with_path(&value).map_err(|source| format_drift(url.as_str(), source))?;

        debug!(key, items = page.data.len(), has_more = page.has_more, "market page fetched");
        self.cache.set(key, Arc::new(value), self.ttl);
        Ok(page)
    }

    /// Drop the cached copy of a listing page.
    pub fn invalidate_market_page(&self, request: &RequestDescriptor) {
        self.cache.remove(&request.cache_key());
    }

    /// Leaderboard rows for one metric and time window.
    ///
    /// A 404 on the data URL means the build identifier rotated; that forces
    /// exactly one re-resolution and one more attempt.
    pub async fn leaderboard(
        &self,
        metric: MetricType,
        window: TimeWindow,
    ) -> Result<Vec<Value>, UpstreamError> {
        let key = format!("leaderboard:{}:{}", metric.as_str(), window.as_str());
        if let Some(rows) = self.cached_rows(&key) {
            debug!(key, "leaderboard cache hit");
            return Ok(rows);
        }

        let build_id = self.build_ids.resolve().await?;
        let mut url = self.leaderboard_url(&build_id);
        let payload = match self.fetch_json(&url).await {
            Err(UpstreamError::NotFound { .. }) => {
                warn!(build_id, "leaderboard data 404, re-resolving build id");
                self.build_ids.invalidate();
                let fresh = self.build_ids.resolve().await?;
                url = self.leaderboard_url(&fresh);
                self.fetch_json(&url).await?
            }
            other => other?,
        };

        let rows =
            extract_rows(&payload, metric, window).map_err(|source| format_drift(&url, source))?;
        debug!(key, rows = rows.len(), "leaderboard fetched");
        self.cache.set(key, Arc::new(Value::Array(rows.clone())), self.ttl);
        Ok(rows)
    }

    /// Remove expired payloads. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    fn leaderboard_url(&self, build_id: &str) -> String {
        self.leaderboard_data_url.replace("{build_id}", build_id)
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, UpstreamError> {
        let body = self.transport.get(url).await?;
        parse_json_with_context(&body).map_err(|source| format_drift(url, source))
    }

    fn cached_page(&self, key: &str) -> Option<MarketPage> {
        let value = self.cache.get(key)?;
        match from_value_with_path::<MarketPage>(&value) {
            Ok(page) => Some(page),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cached page");
                self.cache.remove(key);
                None
            }
        }
    }

    fn cached_rows(&self, key: &str) -> Option<Vec<Value>> {
        let value = self.cache.get(key)?;
        match value.as_array() {
            Some(rows) => Some(rows.clone()),
            None => {
                warn!(key, "discarding non-array cached leaderboard");
                self.cache.remove(key);
                None
            }
        }
    }
}

fn format_drift(url: &str, source: anyhow::Error) -> UpstreamError {
    error!(url, error = %source, "upstream format drift: payload did not decode");
    UpstreamError::FormatDrift {
        url: url.to_string(),
        source,
    }
}
