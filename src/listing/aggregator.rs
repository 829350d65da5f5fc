//! Incremental list aggregation for one list view.
//!
//! Pages are merged into a single growing list with no repeated ids. The
//! cursor advances by the number of items actually admitted, so overlapping
//! pages from upstream cannot skip data. Loads are admitted through an atomic
//! guard: any number of "load more" triggers in the same tick start at most
//! one fetch. A filter change or refresh supersedes whatever is in flight;
//! the stale result is dropped when it lands. A load whose caller goes away
//! mid-fetch releases the guard on drop, so the list never stays stuck.
//!
//! State is owned per instance. Two views with different filters must use
//! two aggregators.

use crate::listing::filters::{FilterOverrides, FilterState, recombine};
use crate::listing::service::{MarketService, PageResult};
use crate::upstream::errors::UpstreamError;
use crate::upstream::models::MarketListItem;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Errors are shared between the caller and the published snapshot.
pub type SharedError = Arc<UpstreamError>;

/// Where the aggregator gets pages from.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(
        &self,
        filters: &FilterState,
        offset: u32,
    ) -> Result<PageResult, UpstreamError>;

    /// First page, bypassing any cached copy.
    async fn refresh(&self, filters: &FilterState) -> Result<PageResult, UpstreamError>;

    fn page_size(&self) -> u32;
}

#[async_trait]
impl PageSource for MarketService {
    async fn fetch_page(
        &self,
        filters: &FilterState,
        offset: u32,
    ) -> Result<PageResult, UpstreamError> {
        MarketService::fetch_page(self, filters, offset).await
    }

    async fn refresh(&self, filters: &FilterState) -> Result<PageResult, UpstreamError> {
        MarketService::refresh(self, filters).await
    }

    fn page_size(&self) -> u32 {
        MarketService::page_size(self)
    }
}

#[async_trait]
impl<T: PageSource + ?Sized> PageSource for Arc<T> {
    async fn fetch_page(
        &self,
        filters: &FilterState,
        offset: u32,
    ) -> Result<PageResult, UpstreamError> {
        (**self).fetch_page(filters, offset).await
    }

    async fn refresh(&self, filters: &FilterState) -> Result<PageResult, UpstreamError> {
        (**self).refresh(filters).await
    }

    fn page_size(&self) -> u32 {
        (**self).page_size()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Error,
}

/// Which kind of load produced the current error, so `retry` can repeat it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    /// Offset-0 load after a filter change.
    Reset,
    /// Offset-0 load that bypasses the cache.
    Refresh,
    /// Next page at the current offset.
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub offset: u32,
    pub has_more: bool,
    pub held_ids: HashSet<String>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            offset: 0,
            has_more: true,
            held_ids: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another load is already running.
    InFlight,
    /// The listing has no more pages.
    Exhausted,
    /// The last load failed; call `retry` first.
    Errored,
    /// `retry` was called without a failed load to repeat.
    NotErrored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { admitted: usize },
    Skipped(SkipReason),
    /// A filter change or refresh started after this load; its page was dropped.
    Superseded,
}

/// Point-in-time view of the list for rendering.
#[derive(Debug, Clone)]
pub struct ListSnapshot {
    pub filters: FilterState,
    pub items: Vec<MarketListItem>,
    pub offset: u32,
    pub has_more: bool,
    pub phase: Phase,
    /// `None` in [`Phase::Error`] when the first-page load was cancelled
    /// rather than failed.
    pub error: Option<SharedError>,
}

impl ListSnapshot {
    /// Nothing held and nothing more to load: a real empty result.
    pub fn is_empty_result(&self) -> bool {
        self.items.is_empty() && !self.has_more && self.phase == Phase::Idle
    }
}

struct ListState {
    filters: FilterState,
    items: Vec<MarketListItem>,
    cursor: Cursor,
    phase: Phase,
    error: Option<SharedError>,
    failed: Option<LoadKind>,
    /// Bumped by every reset; loads carry the value they started with.
    generation: u64,
}

impl ListState {
    fn snapshot(&self) -> ListSnapshot {
        ListSnapshot {
            filters: self.filters.clone(),
            items: self.items.clone(),
            offset: self.cursor.offset,
            has_more: self.cursor.has_more,
            phase: self.phase,
            error: self.error.clone(),
        }
    }
}

/// A load admitted by the guard, with what it needs after the lock is released.
///
/// Dropping an unsettled ticket means the caller stopped polling mid-fetch.
/// If no newer load has taken over, the drop releases the guard: an append
/// goes back to `Idle` at the same offset, a first-page load goes to `Error`
/// so `retry` repeats it.
struct Ticket<'a> {
    kind: LoadKind,
    generation: u64,
    filters: FilterState,
    offset: u32,
    settled: bool,
    loading: &'a AtomicBool,
    state: &'a Mutex<ListState>,
    snapshots: &'a watch::Sender<Arc<ListSnapshot>>,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation != self.generation {
            return;
        }
        debug!(offset = self.offset, kind = ?self.kind, "load cancelled before completion");
        match self.kind {
            LoadKind::Append => {
                state.phase = Phase::Idle;
                state.failed = None;
            }
            LoadKind::Reset | LoadKind::Refresh => {
                state.phase = Phase::Error;
                state.failed = Some(self.kind);
            }
        }
        self.loading.store(false, Ordering::Release);
        self.snapshots.send_replace(Arc::new(state.snapshot()));
    }
}

pub struct ListAggregator<S> {
    source: S,
    /// True while a load is running. Set by compare-exchange before any await.
    loading: AtomicBool,
    state: Mutex<ListState>,
    snapshots: watch::Sender<Arc<ListSnapshot>>,
}

impl<S: PageSource> ListAggregator<S> {
    pub fn new(source: S, filters: FilterState) -> Self {
        let state = ListState {
            filters,
            items: Vec::new(),
            cursor: Cursor::default(),
            phase: Phase::Idle,
            error: None,
            failed: None,
            generation: 0,
        };
        let (snapshots, _) = watch::channel(Arc::new(state.snapshot()));
        Self {
            source,
            loading: AtomicBool::new(false),
            state: Mutex::new(state),
            snapshots,
        }
    }

    pub fn snapshot(&self) -> ListSnapshot {
        self.lock().snapshot()
    }

    /// Receive a new snapshot after every state transition.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ListSnapshot>> {
        self.snapshots.subscribe()
    }

    pub fn cursor(&self) -> Cursor {
        self.lock().cursor.clone()
    }

    /// Load the next page at the current offset.
    ///
    /// A no-op while another load is running, after the listing is
    /// exhausted, or while the last load is in error.
    pub async fn load_more(&self) -> Result<LoadOutcome, SharedError> {
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("load already in flight, skipping");
            return Ok(LoadOutcome::Skipped(SkipReason::InFlight));
        }

        let ticket = {
            let mut state = self.lock();
            let skip = match state.phase {
                // A reset owns the guard; leave it set.
                Phase::Loading => return Ok(LoadOutcome::Skipped(SkipReason::InFlight)),
                Phase::Error => Some(SkipReason::Errored),
                Phase::Idle if !state.cursor.has_more => Some(SkipReason::Exhausted),
                Phase::Idle => None,
            };
            if let Some(reason) = skip {
                self.loading.store(false, Ordering::Release);
                return Ok(LoadOutcome::Skipped(reason));
            }
            self.begin(&mut state, LoadKind::Append)
        };

        self.run(ticket).await
    }

    /// Merge `overrides` into the filters and reload from offset 0.
    ///
    /// Invalid input is rejected before any state changes or network calls.
    pub async fn apply_filters(
        &self,
        overrides: FilterOverrides,
    ) -> Result<LoadOutcome, SharedError> {
        self.reset(LoadKind::Reset, Some(&overrides)).await
    }

    /// Reload the first page of the current filters, bypassing the cache.
    pub async fn refresh(&self) -> Result<LoadOutcome, SharedError> {
        self.reset(LoadKind::Refresh, None).await
    }

    /// Repeat the load that failed.
    pub async fn retry(&self) -> Result<LoadOutcome, SharedError> {
        let failed = {
            let state = self.lock();
            match (state.phase, state.failed) {
                (Phase::Error, Some(kind)) => kind,
                _ => return Ok(LoadOutcome::Skipped(SkipReason::NotErrored)),
            }
        };

        match failed {
            LoadKind::Reset | LoadKind::Refresh => self.reset(failed, None).await,
            LoadKind::Append => {
                if self
                    .loading
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return Ok(LoadOutcome::Skipped(SkipReason::InFlight));
                }
                let ticket = {
                    let mut state = self.lock();
                    if state.phase != Phase::Error {
                        if state.phase != Phase::Loading {
                            self.loading.store(false, Ordering::Release);
                        }
                        return Ok(LoadOutcome::Skipped(SkipReason::NotErrored));
                    }
                    self.begin(&mut state, LoadKind::Append)
                };
                self.run(ticket).await
            }
        }
    }

    /// Start an offset-0 load that supersedes anything in flight.
    ///
    /// Overrides are merged under the same lock that stores the result, so
    /// concurrent filter changes compose instead of overwriting each other.
    async fn reset(
        &self,
        kind: LoadKind,
        overrides: Option<&FilterOverrides>,
    ) -> Result<LoadOutcome, SharedError> {
        let ticket = {
            let mut state = self.lock();
            if let Some(overrides) = overrides {
                state.filters = recombine(&state.filters, overrides, self.source.page_size())
                    .map_err(Arc::new)?
                    .state;
            }
            state.generation += 1;
            self.loading.store(true, Ordering::Release);
            self.begin(&mut state, kind)
        };
        self.run(ticket).await
    }

    fn begin(&self, state: &mut ListState, kind: LoadKind) -> Ticket<'_> {
        state.phase = Phase::Loading;
        state.error = None;
        let offset = match kind {
            LoadKind::Append => state.cursor.offset,
            LoadKind::Reset | LoadKind::Refresh => 0,
        };
        self.publish(state);
        Ticket {
            kind,
            generation: state.generation,
            filters: state.filters.clone(),
            offset,
            settled: false,
            loading: &self.loading,
            state: &self.state,
            snapshots: &self.snapshots,
        }
    }

    async fn run(&self, mut ticket: Ticket<'_>) -> Result<LoadOutcome, SharedError> {
        let result = match ticket.kind {
            LoadKind::Refresh => self.source.refresh(&ticket.filters).await,
            LoadKind::Reset | LoadKind::Append => {
                self.source.fetch_page(&ticket.filters, ticket.offset).await
            }
        };

        let mut state = self.lock();
        ticket.settled = true;
        if state.generation != ticket.generation {
            debug!(offset = ticket.offset, "dropping superseded page");
            return Ok(LoadOutcome::Superseded);
        }

        let outcome = match result {
            Ok(page) => {
                let admitted = match ticket.kind {
                    LoadKind::Reset | LoadKind::Refresh => replace(&mut state, page),
                    LoadKind::Append => append(&mut state, page),
                };
                state.phase = Phase::Idle;
                state.failed = None;
                Ok(LoadOutcome::Loaded { admitted })
            }
            Err(e) => {
                warn!(offset = ticket.offset, error = %e, "page load failed");
                let e = Arc::new(e);
                state.phase = Phase::Error;
                state.error = Some(e.clone());
                state.failed = Some(ticket.kind);
                Err(e)
            }
        };

        self.loading.store(false, Ordering::Release);
        self.publish(&state);
        outcome
    }

    fn publish(&self, state: &ListState) {
        self.snapshots.send_replace(Arc::new(state.snapshot()));
    }

    fn lock(&self) -> MutexGuard<'_, ListState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Swap in a fresh first page. Held items are only discarded here, once the
/// new page has arrived.
fn replace(state: &mut ListState, page: PageResult) -> usize {
    state.items.clear();
    state.cursor = Cursor::default();
    append(state, page)
}

fn append(state: &mut ListState, page: PageResult) -> usize {
    let has_more = page.has_more();
    let full = !page.items.is_empty() && page.items.len() >= page.limit as usize;

    let before = state.items.len();
    for item in page.items {
        if state.cursor.held_ids.insert(item.id.clone()) {
            state.items.push(item);
        }
    }
    let admitted = state.items.len() - before;

    state.cursor.offset = state.cursor.offset.saturating_add(admitted as u32);
    // A full page of nothing but repeats would request the same offset forever.
    state.cursor.has_more = has_more && !(full && admitted == 0);
    debug!(
        admitted,
        offset = state.cursor.offset,
        has_more = state.cursor.has_more,
        "page merged"
    );
    admitted
}
