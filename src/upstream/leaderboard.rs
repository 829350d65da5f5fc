//! Row extraction from the build-id-gated leaderboard payload.
//!
//! The payload is a dehydrated query-cache snapshot. Each entry under
//! `pageProps.dehydratedState.queries` has a `queryKey` array naming what it
//! holds and a `state.data` value with the rows, either as a flat array or
//! as `{ pages: [[...], ...] }` for infinite queries.

use crate::upstream::models::{MetricType, TimeWindow};
use anyhow::{Result, anyhow};
use serde_json::Value;

pub fn extract_rows(
    payload: &Value,
    metric: MetricType,
    window: TimeWindow,
) -> Result<Vec<Value>> {
    let queries = payload
        .pointer("/pageProps/dehydratedState/queries")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("missing pageProps.dehydratedState.queries array"))?;

    let matching = queries.iter().find(|query| {
        let Some(key) = query.get("queryKey").and_then(Value::as_array) else {
            return false;
        };
        let names: Vec<String> = key
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_ascii_lowercase)
            .collect();
        names.iter().any(|n| n == metric.as_str()) && names.iter().any(|n| n == window.as_str())
    });

    let Some(query) = matching else {
        return Ok(Vec::new());
    };

    match query.pointer("/state/data") {
        Some(Value::Array(rows)) => Ok(rows.clone()),
        Some(Value::Object(data)) => match data.get("pages") {
            Some(Value::Array(pages)) => Ok(pages
                .iter()
                .filter_map(Value::as_array)
                .flatten()
                .cloned()
                .collect()),
            _ => Err(anyhow!("query state.data is an object without a pages array")),
        },
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(other) => Err(anyhow!("unexpected query state.data type: {other}")),
    }
}
