//! Request and response shapes for the upstream market-data API.
//!
//! Listing items are opaque apart from `id`; everything else is carried
//! through untouched.

use crate::upstream::errors::UpstreamError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// One market from a listing page. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketListItem {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Upstream ids are usually strings but some endpoints emit numbers.
fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Text(s) if !s.is_empty() => Ok(s),
        RawId::Text(_) => Err(serde::de::Error::custom("empty market id")),
        RawId::Number(n) => Ok(n.to_string()),
    }
}

/// `{ data, hasMore, total? }` from the listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPage {
    pub data: Vec<MarketListItem>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Volume24hr,
    Volume,
    Liquidity,
    Newest,
    EndingSoon,
    Competitive,
}

impl SortOrder {
    pub const ALL: [SortOrder; 6] = [
        SortOrder::Volume24hr,
        SortOrder::Volume,
        SortOrder::Liquidity,
        SortOrder::Newest,
        SortOrder::EndingSoon,
        SortOrder::Competitive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Volume24hr => "volume24hr",
            SortOrder::Volume => "volume",
            SortOrder::Liquidity => "liquidity",
            SortOrder::Newest => "newest",
            SortOrder::EndingSoon => "ending_soon",
            SortOrder::Competitive => "competitive",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = UpstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        SortOrder::ALL
            .into_iter()
            .find(|order| order.as_str() == wanted)
            .ok_or_else(|| {
                let valid: Vec<&str> = SortOrder::ALL.iter().map(|o| o.as_str()).collect();
                UpstreamError::Validation(format!(
                    "unknown sort '{s}', expected one of: {}",
                    valid.join(", ")
                ))
            })
    }
}

/// The single facet upstream accepts per listing request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Discriminator {
    All,
    Search(String),
    Category(String),
    Tag(String),
}

/// Fully-resolved listing request, ready to become a URL or cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestDescriptor {
    pub discriminator: Discriminator,
    /// Only set for [`Discriminator::All`]; upstream takes a single facet.
    pub sort: Option<SortOrder>,
    pub limit: u32,
    pub offset: u32,
}

impl RequestDescriptor {
    /// Same request at a different offset.
    pub fn at(&self, offset: u32) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }

    /// Query parameters in a fixed order, so equal descriptors produce equal keys.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("limit", self.limit.to_string()),
            ("offset", self.offset.to_string()),
        ];
        match &self.discriminator {
            Discriminator::All => {}
            Discriminator::Search(q) => pairs.push(("q", q.clone())),
            Discriminator::Category(c) => pairs.push(("category", c.clone())),
            Discriminator::Tag(t) => pairs.push(("tag", t.clone())),
        }
        if let Some(sort) = self.sort {
            pairs.push(("sort", sort.as_str().to_string()));
        }
        pairs
    }

    pub fn cache_key(&self) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query_pairs())
            .finish();
        format!("markets?{query}")
    }

    /// Append this descriptor's parameters to the listing endpoint URL.
    pub fn to_url(&self, base: &url::Url) -> url::Url {
        let mut url = base.clone();
        url.query_pairs_mut().extend_pairs(self.query_pairs());
        url
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Volume,
    Profit,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Volume => "volume",
            MetricType::Profit => "profit",
        }
    }
}

impl FromStr for MetricType {
    type Err = UpstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "volume" => Ok(MetricType::Volume),
            "profit" | "pnl" => Ok(MetricType::Profit),
            _ => Err(UpstreamError::Validation(format!(
                "unknown metric '{s}', expected volume or profit"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Day,
    Week,
    Month,
    All,
}

impl TimeWindow {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
            TimeWindow::All => "all",
        }
    }
}

impl FromStr for TimeWindow {
    type Err = UpstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "1d" => Ok(TimeWindow::Day),
            "week" | "7d" => Ok(TimeWindow::Week),
            "month" | "30d" => Ok(TimeWindow::Month),
            "all" => Ok(TimeWindow::All),
            _ => Err(UpstreamError::Validation(format!(
                "unknown window '{s}', expected day, week, month or all"
            ))),
        }
    }
}
