//! # stakewatch
//!
//! Observes a yield-bearing LP-staking position that spans an EVM chain and
//! a Tron-like chain, pricing the staked asset through a multi-source,
//! window-smoothed price oracle.
//!
//! The crate splits into four layers, leaves first:
//! - [`sample_window`] — fixed-capacity FIFO of price samples.
//! - [`price_oracle`] — source polling, tolerant extraction, smoothing.
//! - [`chain`] — one canonical read/write surface per chain behind a trait.
//! - [`staking`] — the stats engine combining reads with the price.
//!
//! [`server`] exposes the oracle read endpoint and metrics; [`config`]
//! carries the two network profiles with environment interpolation.

pub mod chain;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod price_oracle;
pub mod sample_window;
pub mod server;
pub mod staking;
