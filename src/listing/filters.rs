//! Filter and sort recombination.
//!
//! Turns the ambient filter state plus call-time overrides into the single
//! request upstream accepts. Search wins over category and tag; category and
//! tag exclude each other. Sort is sent only when none of them is set.

use crate::upstream::errors::UpstreamError;
use crate::upstream::models::{Discriminator, RequestDescriptor, SortOrder};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Longest free-text query forwarded upstream.
pub const MAX_SEARCH_LEN: usize = 200;

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,63}$").expect("valid slug regex"));

/// What the user has selected for one list view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    pub search: Option<String>,
    pub category: Option<String>,
    pub tag: Option<String>,
    #[serde(default)]
    pub sort: SortOrder,
}

impl FilterState {
    /// Request for the first page of this state, without overrides.
    pub fn descriptor(&self, limit: u32) -> Result<RequestDescriptor, UpstreamError> {
        recombine(self, &FilterOverrides::default(), limit).map(|r| r.descriptor)
    }
}

/// Facets changed by a single call.
///
/// `None` leaves a facet as it is in the ambient state; `Some(None)` clears
/// it. Callers changing several facets at once pass them all here so the
/// request never mixes old and new values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOverrides {
    pub search: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub tag: Option<Option<String>>,
    pub sort: Option<SortOrder>,
}

impl FilterOverrides {
    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(Some(query.into()));
        self
    }

    pub fn clear_search(mut self) -> Self {
        self.search = Some(None);
        self
    }

    pub fn category(mut self, slug: impl Into<String>) -> Self {
        self.category = Some(Some(slug.into()));
        self
    }

    pub fn clear_category(mut self) -> Self {
        self.category = Some(None);
        self
    }

    pub fn tag(mut self, slug: impl Into<String>) -> Self {
        self.tag = Some(Some(slug.into()));
        self
    }

    pub fn clear_tag(mut self) -> Self {
        self.tag = Some(None);
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// The merged state and the upstream request it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recombined {
    pub state: FilterState,
    pub descriptor: RequestDescriptor,
}

/// Merge `overrides` into `current` and build the offset-0 request.
///
/// Fails with [`UpstreamError::Validation`] before any network call when the
/// input is malformed.
pub fn recombine(
    current: &FilterState,
    overrides: &FilterOverrides,
    limit: u32,
) -> Result<Recombined, UpstreamError> {
    if matches!(
        (&overrides.category, &overrides.tag),
        (Some(Some(_)), Some(Some(_)))
    ) {
        return Err(UpstreamError::Validation(
            "category and tag cannot both be selected".into(),
        ));
    }

    let mut state = current.clone();
    if let Some(search) = &overrides.search {
        state.search = search.clone();
    }
    if let Some(category) = &overrides.category {
        state.category = category.clone();
        if category.is_some() {
            state.tag = None;
        }
    }
    if let Some(tag) = &overrides.tag {
        state.tag = tag.clone();
        if tag.is_some() {
            state.category = None;
        }
    }
    if let Some(sort) = overrides.sort {
        state.sort = sort;
    }

    state.search = normalize_search(state.search)?;
    state.category = normalize_slug("category", state.category)?;
    state.tag = normalize_slug("tag", state.tag)?;

    let discriminator = match (&state.search, &state.category, &state.tag) {
        (Some(q), _, _) => Discriminator::Search(q.clone()),
        (None, Some(_), Some(_)) => {
            return Err(UpstreamError::Validation(
                "category and tag cannot both be selected".into(),
            ));
        }
        (None, Some(c), None) => Discriminator::Category(c.clone()),
        (None, None, Some(t)) => Discriminator::Tag(t.clone()),
        (None, None, None) => Discriminator::All,
    };
    // Upstream takes one facet per request; sort only orders the unfiltered listing.
    let sort = match discriminator {
        Discriminator::All => Some(state.sort),
        _ => None,
    };

    Ok(Recombined {
        descriptor: RequestDescriptor {
            discriminator,
            sort,
            limit,
            offset: 0,
        },
        state,
    })
}

fn normalize_search(search: Option<String>) -> Result<Option<String>, UpstreamError> {
    let Some(raw) = search else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_SEARCH_LEN {
        return Err(UpstreamError::Validation(format!(
            "search query longer than {MAX_SEARCH_LEN} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

fn normalize_slug(facet: &str, slug: Option<String>) -> Result<Option<String>, UpstreamError> {
    let Some(raw) = slug else {
        return Ok(None);
    };
    let slug = raw.trim().to_ascii_lowercase();
    if slug.is_empty() {
        return Ok(None);
    }
    if !SLUG_RE.is_match(&slug) {
        return Err(UpstreamError::Validation(format!("invalid {facet}: {raw:?}")));
    }
    Ok(Some(slug))
}
