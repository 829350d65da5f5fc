//! Build-identifier resolution.
//!
//! Some upstream data URLs embed a routing token that only appears in the
//! server-rendered HTML of a public page. The token is scraped, cached for a
//! few minutes, and re-resolved once stale. A stale token is never served,
//! even when re-resolution fails.

use crate::upstream::cache::TtlCache;
use crate::upstream::errors::UpstreamError;
use crate::upstream::transport::Transport;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

const CACHE_KEY: &str = "build_id";

static BUILD_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""buildId"\s*:\s*"([^"]+)""#).expect("valid build id regex"));

/// Source of the current upstream build identifier.
#[async_trait]
pub trait BuildIdResolver: Send + Sync {
    /// Return a build identifier no older than the resolver's TTL.
    async fn resolve(&self) -> Result<String, UpstreamError>;

    /// Forget the cached identifier so the next `resolve` fetches a fresh one.
    fn invalidate(&self);
}

/// Pull the token out of `"buildId":"<token>"` in a page's markup.
pub fn extract_build_id(html: &str) -> Option<&str> {
    BUILD_ID_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|id| !id.trim().is_empty())
}

/// Resolves the identifier by scraping an HTML page through the shared transport.
pub struct ScrapedBuildId {
    transport: Arc<Transport>,
    page_url: String,
    cache: TtlCache<String>,
    ttl: Duration,
    /// Collapses concurrent resolutions into one page fetch.
    resolving: Mutex<()>,
}

impl ScrapedBuildId {
    pub fn new(
        transport: Arc<Transport>,
        page_url: impl Into<String>,
        cache: TtlCache<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            transport,
            page_url: page_url.into(),
            cache,
            ttl,
            resolving: Mutex::new(()),
        }
    }
}

#[async_trait]
impl BuildIdResolver for ScrapedBuildId {
    async fn resolve(&self) -> Result<String, UpstreamError> {
        if let Some(id) = self.cache.get(CACHE_KEY) {
            return Ok(id);
        }

        let _guard = self.resolving.lock().await;
        if let Some(id) = self.cache.get(CACHE_KEY) {
            debug!("build id resolved by a concurrent caller");
            return Ok(id);
        }

        let html = self.transport.get(&self.page_url).await?;
        let Some(id) = extract_build_id(&html) else {
            error!(
                url = %self.page_url,
                bytes = html.len(),
                "upstream format drift: build id pattern missing from page"
            );
            return Err(UpstreamError::BuildIdNotFound {
                url: self.page_url.clone(),
            });
        };

        info!(build_id = id, "resolved upstream build id");
        self.cache.set(CACHE_KEY, id.to_string(), self.ttl);
        Ok(id.to_string())
    }

    fn invalidate(&self) {
        debug!("build id invalidated");
        self.cache.remove(CACHE_KEY);
    }
}
