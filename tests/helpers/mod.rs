//! In-memory upstream and service wiring shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use polydash::listing::MarketService;
use polydash::state::AppState;
use polydash::upstream::{
    Fetch, MarketClient, RetryPolicy, ScrapedBuildId, SerialQueue, Transport, TtlCache,
    UpstreamError,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

pub const MARKETS_URL: &str = "https://upstream.test/events/pagination";
pub const PAGE_URL: &str = "https://upstream.test/leaderboard";
pub const DATA_URL: &str = "https://upstream.test/_next/data/{build_id}/leaderboard.json";

pub const QUEUE_DELAY: Duration = Duration::from_secs(1);
pub const MARKET_TTL: Duration = Duration::from_secs(60);
pub const BUILD_ID_TTL: Duration = Duration::from_secs(300);
/// Simulated round-trip time of every fake upstream call.
pub const LATENCY: Duration = Duration::from_millis(50);

type Handler = dyn Fn(&Url, usize) -> Result<String, UpstreamError> + Send + Sync;

/// Fake upstream. The handler receives the URL and the 0-based call number.
pub struct FakeUpstream {
    handler: Box<Handler>,
    calls: Mutex<Vec<(Url, Instant)>>,
}

impl FakeUpstream {
    pub fn new(
        handler: impl Fn(&Url, usize) -> Result<String, UpstreamError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Url> {
        self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    /// Calls whose URL starts with `prefix`.
    pub fn hits(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|u| u.as_str().starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl Fetch for FakeUpstream {
    async fn get_text(&self, url: &str) -> Result<String, UpstreamError> {
        let parsed = Url::parse(url).unwrap();
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((parsed.clone(), Instant::now()));
            calls.len() - 1
        };
        tokio::time::sleep(LATENCY).await;
        (self.handler)(&parsed, n)
    }
}

pub fn query(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Listing body for ids `m{offset}..m{offset+len}`.
pub fn listing_body(offset: usize, len: usize, has_more: bool) -> String {
    let data: Vec<_> = (offset..offset + len)
        .map(|i| json!({ "id": format!("m{i}"), "title": format!("Market {i}") }))
        .collect();
    json!({ "data": data, "hasMore": has_more }).to_string()
}

/// A listing of `total` markets. With `always_more`, upstream claims more
/// data on every page, including the last one.
pub fn catalog(total: usize, always_more: bool) -> impl Fn(&Url) -> String {
    move |url| {
        let offset: usize = query(url, "offset").unwrap().parse().unwrap();
        let limit: usize = query(url, "limit").unwrap().parse().unwrap();
        let len = total.saturating_sub(offset).min(limit);
        listing_body(offset, len, always_more || offset + len < total)
    }
}

pub fn build_page(id: &str) -> String {
    format!(
        r#"<html><script id="__NEXT_DATA__">{{"props":{{}},"buildId":"{id}","isFallback":false}}</script></html>"#
    )
}

pub fn leaderboard_body(rows: serde_json::Value) -> String {
    json!({ "pageProps": { "dehydratedState": { "queries": [
        { "queryKey": ["/leaderboard", "volume", "day"], "state": { "data": rows } },
        { "queryKey": ["/leaderboard", "profit", "week"], "state": { "data": { "pages": [[{ "name": "p1" }], [{ "name": "p2" }]] } } }
    ] } } })
    .to_string()
}

pub fn rate_limited(url: &Url) -> UpstreamError {
    UpstreamError::RateLimited {
        url: url.to_string(),
        message: "Too Many Requests".into(),
    }
}

pub struct Harness {
    pub upstream: Arc<FakeUpstream>,
    pub queue: SerialQueue,
    pub client: Arc<MarketClient>,
    pub service: Arc<MarketService>,
}

impl Harness {
    pub fn new(upstream: Arc<FakeUpstream>, page_size: u32) -> Self {
        let queue = SerialQueue::new(QUEUE_DELAY);
        let transport = Arc::new(Transport::new(
            upstream.clone(),
            queue.clone(),
            RetryPolicy::new(3, Duration::from_secs(1)),
            Duration::from_secs(15),
        ));
        let build_ids = Arc::new(ScrapedBuildId::new(
            transport.clone(),
            PAGE_URL,
            TtlCache::new(),
            BUILD_ID_TTL,
        ));
        let client = Arc::new(
            MarketClient::new(
                transport,
                TtlCache::new(),
                build_ids,
                MARKETS_URL,
                DATA_URL,
                MARKET_TTL,
            )
            .unwrap(),
        );
        let service = Arc::new(MarketService::new(client.clone(), page_size));
        Self {
            upstream,
            queue,
            client,
            service,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.service.clone(), self.queue.clone())
    }
}
