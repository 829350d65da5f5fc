//! Market listing through the real cache, queue and retry path.

mod helpers;

use helpers::{FakeUpstream, Harness, LATENCY, QUEUE_DELAY, catalog, query, rate_limited};
use polydash::listing::{
    FilterOverrides, FilterState, ListAggregator, LoadOutcome, Phase, SkipReason,
};
use polydash::upstream::{ErrorKind, SortOrder, UpstreamError};
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn short_second_page_ends_listing_despite_upstream_flag() {
    let listing = catalog(80, true);
    let upstream = FakeUpstream::new(move |url, _| Ok(listing(url)));
    let h = Harness::new(upstream.clone(), 50);
    let list = ListAggregator::new(h.service.clone(), FilterState::default());

    assert_eq!(list.load_more().await.unwrap(), LoadOutcome::Loaded { admitted: 50 });
    assert!(list.snapshot().has_more);

    assert_eq!(list.load_more().await.unwrap(), LoadOutcome::Loaded { admitted: 30 });
    let snap = list.snapshot();
    assert_eq!(snap.items.len(), 80);
    assert_eq!(snap.offset, 80);
    assert!(!snap.has_more);

    let offsets: Vec<_> = upstream
        .calls()
        .iter()
        .map(|u| query(u, "offset").unwrap())
        .collect();
    assert_eq!(offsets, vec!["0", "50"]);

    assert_eq!(
        list.load_more().await.unwrap(),
        LoadOutcome::Skipped(SkipReason::Exhausted)
    );
    assert_eq!(upstream.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn same_tick_triggers_issue_one_request() {
    let listing = catalog(200, false);
    let upstream = FakeUpstream::new(move |url, _| Ok(listing(url)));
    let h = Harness::new(upstream.clone(), 50);
    let list = ListAggregator::new(h.service.clone(), FilterState::default());

    let (a, b) = tokio::join!(list.load_more(), list.load_more());
    let outcomes = [a.unwrap(), b.unwrap()];
    assert!(outcomes.contains(&LoadOutcome::Loaded { admitted: 50 }));
    assert!(outcomes.contains(&LoadOutcome::Skipped(SkipReason::InFlight)));
    assert_eq!(upstream.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_are_paced_one_at_a_time() {
    let listing = catalog(500, false);
    let upstream = FakeUpstream::new(move |url, _| Ok(listing(url)));
    let h = Harness::new(upstream.clone(), 50);
    let filters = FilterState::default();

    let (a, b, c) = tokio::join!(
        h.service.fetch_page(&filters, 0),
        h.service.fetch_page(&filters, 50),
        h.service.fetch_page(&filters, 100),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    let times = upstream.call_times();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        // Each call starts after the previous one finished plus the spacing.
        assert!(pair[1] - pair[0] >= LATENCY + QUEUE_DELAY);
    }
}

#[tokio::test(start_paused = true)]
async fn pages_are_cached_until_ttl_elapses() {
    let listing = catalog(100, false);
    let upstream = FakeUpstream::new(move |url, _| Ok(listing(url)));
    let h = Harness::new(upstream.clone(), 50);
    let filters = FilterState::default();

    let first = h.service.fetch_page(&filters, 0).await.unwrap();
    tokio::time::advance(Duration::from_secs(59)).await;
    let cached = h.service.fetch_page(&filters, 0).await.unwrap();
    assert_eq!(first, cached);
    assert_eq!(upstream.calls().len(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    h.service.fetch_page(&filters, 0).await.unwrap();
    assert_eq!(upstream.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn different_filters_do_not_share_cache_entries() {
    let listing = catalog(100, false);
    let upstream = FakeUpstream::new(move |url, _| Ok(listing(url)));
    let h = Harness::new(upstream.clone(), 50);

    let politics = FilterState {
        category: Some("politics".into()),
        ..Default::default()
    };
    let newest = FilterState {
        sort: SortOrder::Newest,
        ..Default::default()
    };
    h.service.fetch_page(&politics, 0).await.unwrap();
    h.service.fetch_page(&newest, 0).await.unwrap();
    h.service.fetch_page(&politics, 0).await.unwrap();
    assert_eq!(upstream.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn refresh_bypasses_cache_and_is_idempotent() {
    let listing = catalog(120, false);
    let upstream = FakeUpstream::new(move |url, _| Ok(listing(url)));
    let h = Harness::new(upstream.clone(), 50);
    let list = ListAggregator::new(h.service.clone(), FilterState::default());

    list.load_more().await.unwrap();
    list.load_more().await.unwrap();
    assert_eq!(list.snapshot().offset, 100);

    list.refresh().await.unwrap();
    let once = list.snapshot();
    list.refresh().await.unwrap();
    let twice = list.snapshot();

    let ids = |s: &polydash::listing::ListSnapshot| -> Vec<String> {
        s.items.iter().map(|i| i.id.clone()).collect()
    };
    assert_eq!(ids(&once), ids(&twice));
    assert_eq!(once.offset, 50);
    assert_eq!(twice.offset, 50);
    assert!(twice.has_more);
    // Two pages, then one upstream fetch per refresh.
    assert_eq!(upstream.calls().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_fetch_recovers_with_backoff_inside_one_slot() {
    let listing = catalog(100, false);
    let upstream = FakeUpstream::new(move |url, n| {
        if n < 2 {
            Err(rate_limited(url))
        } else {
            Ok(listing(url))
        }
    });
    let h = Harness::new(upstream.clone(), 50);

    let page = h.service.fetch_page(&FilterState::default(), 0).await.unwrap();
    assert_eq!(page.items.len(), 50);

    let times = upstream.call_times();
    assert_eq!(times.len(), 3);
    assert!(times[1] - times[0] >= LATENCY + Duration::from_secs(1));
    assert!(times[2] - times[1] >= LATENCY + Duration::from_secs(2));
    // Retries do not wait for the queue spacing on top of the backoff.
    assert!(times[2] - times[1] < LATENCY + Duration::from_secs(2) + QUEUE_DELAY);
}

#[tokio::test(start_paused = true)]
async fn exhausted_rate_limit_keeps_loaded_items() {
    let listing = catalog(200, false);
    let upstream = FakeUpstream::new(move |url, n| {
        if n == 0 {
            Ok(listing(url))
        } else {
            Err(rate_limited(url))
        }
    });
    let h = Harness::new(upstream.clone(), 50);
    let list = ListAggregator::new(h.service.clone(), FilterState::default());

    list.load_more().await.unwrap();
    let err = list.load_more().await.unwrap_err();
    assert!(matches!(*err, UpstreamError::RateLimitExhausted { attempts: 3 }));
    assert_eq!(err.kind(), ErrorKind::RateLimitExhausted);
    assert!(err.is_retryable());

    let snap = list.snapshot();
    assert_eq!(snap.phase, Phase::Error);
    assert_eq!(snap.items.len(), 50);
    assert!(snap.has_more);
    assert_eq!(upstream.calls().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn search_replaces_category_and_sort_in_request() {
    let listing = catalog(10, false);
    let upstream = FakeUpstream::new(move |url, _| Ok(listing(url)));
    let h = Harness::new(upstream.clone(), 50);
    let list = ListAggregator::new(
        h.service.clone(),
        FilterState {
            category: Some("politics".into()),
            ..Default::default()
        },
    );

    list.load_more().await.unwrap();
    list.apply_filters(FilterOverrides::default().search("fed rates"))
        .await
        .unwrap();

    let calls = upstream.calls();
    assert_eq!(query(&calls[0], "category").as_deref(), Some("politics"));
    assert_eq!(query(&calls[0], "sort"), None);
    assert_eq!(query(&calls[1], "q").as_deref(), Some("fed rates"));
    assert_eq!(query(&calls[1], "category"), None);
    assert_eq!(query(&calls[1], "sort"), None);
}

#[tokio::test(start_paused = true)]
async fn category_request_sends_only_the_category_facet() {
    let listing = catalog(10, false);
    let upstream = FakeUpstream::new(move |url, _| Ok(listing(url)));
    let h = Harness::new(upstream.clone(), 50);
    let list = ListAggregator::new(
        h.service.clone(),
        FilterState {
            sort: SortOrder::Newest,
            ..Default::default()
        },
    );

    list.load_more().await.unwrap();
    list.apply_filters(FilterOverrides::default().category("Sports"))
        .await
        .unwrap();

    let calls = upstream.calls();
    assert_eq!(query(&calls[0], "sort").as_deref(), Some("newest"));
    assert_eq!(query(&calls[1], "category").as_deref(), Some("sports"));
    for param in ["sort", "tag", "q"] {
        assert_eq!(query(&calls[1], param), None, "{param} sent with a category");
    }
    assert_eq!(query(&calls[1], "limit").as_deref(), Some("50"));
    assert_eq!(query(&calls[1], "offset").as_deref(), Some("0"));
    assert_eq!(list.snapshot().filters.sort, SortOrder::Newest);
}

#[tokio::test(start_paused = true)]
async fn invalid_filters_never_reach_upstream() {
    let upstream = FakeUpstream::new(|_, _| Ok(helpers::listing_body(0, 0, false)));
    let h = Harness::new(upstream.clone(), 50);

    let bad = FilterState {
        category: Some("sports".into()),
        tag: Some("nba".into()),
        ..Default::default()
    };
    let err = h.service.fetch_page(&bad, 0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let bad_slug = FilterState {
        tag: Some("nba&limit=1000".into()),
        ..Default::default()
    };
    assert!(h.service.refresh(&bad_slug).await.is_err());
    assert!(upstream.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn overlapping_upstream_pages_never_duplicate_items() {
    // Upstream drifts: each page restarts 10 items before the requested offset.
    let upstream = FakeUpstream::new(|url, _| {
        let offset: usize = query(url, "offset").unwrap().parse().unwrap();
        let start = offset.saturating_sub(10);
        let len = 60usize.saturating_sub(start).min(20);
        Ok(helpers::listing_body(start, len, start + len < 60))
    });
    let h = Harness::new(upstream.clone(), 20);
    let list = ListAggregator::new(h.service.clone(), FilterState::default());

    while list.snapshot().has_more {
        list.load_more().await.unwrap();
    }

    let snap = list.snapshot();
    let unique: HashSet<_> = snap.items.iter().map(|i| &i.id).collect();
    assert_eq!(unique.len(), snap.items.len());
    assert_eq!(snap.items.len(), 60);
}
