//! Environment-driven configuration for the upstream fetch subsystem and
//! its HTTP surface.
//!
//! Every field has a default so the service runs with an empty environment.
//! Durations accept human-friendly strings (`"90s"`, `"5m"`, `"250ms"`) or a
//! bare integer number of seconds.

use anyhow::{Result, bail};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base level for this crate's logs when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Paginated market listing endpoint.
    #[serde(default = "default_markets_url")]
    pub markets_url: String,
    /// HTML page whose markup embeds the build identifier.
    #[serde(default = "default_leaderboard_page_url")]
    pub leaderboard_page_url: String,
    /// Data URL template; `{build_id}` is replaced with the resolved identifier.
    #[serde(default = "default_leaderboard_data_url")]
    pub leaderboard_data_url: String,

    #[serde(
        default = "default_market_cache_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub market_cache_ttl: Duration,
    #[serde(
        default = "default_build_id_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub build_id_ttl: Duration,
    #[serde(
        default = "default_queue_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub queue_delay: Duration,
    #[serde(
        default = "default_retry_base_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_base_delay: Duration,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            port: default_port(),
            markets_url: default_markets_url(),
            leaderboard_page_url: default_leaderboard_page_url(),
            leaderboard_data_url: default_leaderboard_data_url(),
            market_cache_ttl: default_market_cache_ttl(),
            build_id_ttl: default_build_id_ttl(),
            queue_delay: default_queue_delay(),
            retry_base_delay: default_retry_base_delay(),
            max_retry_attempts: default_max_retry_attempts(),
            request_timeout: default_request_timeout(),
            page_size: default_page_size(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Config {
    /// Reject knob values the subsystem cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_retry_attempts == 0 {
            bail!("MAX_RETRY_ATTEMPTS must be at least 1");
        }
        if !(1..=100).contains(&self.page_size) {
            bail!("PAGE_SIZE must be between 1 and 100, got {}", self.page_size);
        }
        if !self.leaderboard_data_url.contains("{build_id}") {
            bail!("LEADERBOARD_DATA_URL must contain a {{build_id}} placeholder");
        }
        for (name, value) in [
            ("MARKETS_URL", &self.markets_url),
            ("LEADERBOARD_PAGE_URL", &self.leaderboard_page_url),
        ] {
            if let Err(e) = url::Url::parse(value) {
                bail!("{name} is not a valid URL ({value}): {e}");
            }
        }
        if self.request_timeout.is_zero() {
            bail!("REQUEST_TIMEOUT must be non-zero");
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_markets_url() -> String {
    "https://gamma-api.polymarket.com/events/pagination".to_string()
}

fn default_leaderboard_page_url() -> String {
    "https://polymarket.com/leaderboard".to_string()
}

fn default_leaderboard_data_url() -> String {
    "https://polymarket.com/_next/data/{build_id}/leaderboard.json".to_string()
}

fn default_market_cache_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_build_id_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_queue_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_page_size() -> u32 {
    50
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

/// Parse a human duration string. Bare numbers are seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let parser = DurationParser::with_time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
    ]);
    let parsed = parser
        .parse(raw.trim())
        .map_err(|e| format!("invalid duration '{raw}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{raw}': {e}"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl serde::de::Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a duration such as \"90s\", \"5m\", or a number of seconds")
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom(format!("duration must be non-negative, got {v}")))
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Duration, E> {
            parse_duration(v).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
