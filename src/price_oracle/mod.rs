//! # Price Oracle
//!
//! Multi-source price aggregation with a smoothing window. The aggregator
//! is the only component allowed to mutate the sample window; both of its
//! triggers (the background ticker and the on-demand `/price` path) go
//! through the same mutex-guarded fold.

pub mod aggregator;

pub use aggregator::{PriceAggregator, PriceQuote};
