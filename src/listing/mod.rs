//! Market listing: filter recombination, the page API, and incremental aggregation.

pub mod aggregator;
pub mod filters;
pub mod service;

pub use aggregator::{ListAggregator, ListSnapshot, LoadOutcome, PageSource, Phase, SkipReason};
pub use filters::{FilterOverrides, FilterState, Recombined, recombine};
pub use service::{MarketService, PageResult};
