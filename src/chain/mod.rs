//! # Chain Adapters
//!
//! One canonical read/write surface over two incompatible chain-interaction
//! APIs. Each chain gets its own adapter implementation behind the
//! `ChainAdapter` trait, selected by configuration at construction time;
//! callers hold an `Arc<dyn ChainAdapter>` and never branch on the chain.
//!
//! ## Numeric normalization
//!
//! Every on-chain integer amount is divided by `10^decimals` using the
//! asset-specific decimals: LP decimals for TVL and staked amounts, the
//! fixed 18-decimal convention (`REWARD_DECIMALS`) for reward-denominated
//! amounts. The two scales are carried in separately named snapshot fields
//! so they cannot be mixed through a shared variable.

use crate::errors::ChainError;
use async_trait::async_trait;
use ethers::types::U256;
use std::fmt;
use tracing::debug;

pub mod evm;
pub mod tron;

/// Reward amounts are always denominated at 18 decimals, regardless of the
/// LP token's own precision. This mirrors the staking contract's published
/// convention; it is intentional, not an assumption to be "fixed".
pub const REWARD_DECIMALS: u8 = 18;

/// LP precision used when the token contract does not answer `decimals()`.
pub const DEFAULT_LP_DECIMALS: u8 = 18;

/// The caller's stake record as stored by the staking contract. Read-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserStakeRecord {
    pub staked: U256,
    pub reward_debt: U256,
}

/// One consistent view of the pool, already normalized to human units.
/// Produced by a single batch of concurrent reads so the fields are
/// mutually coherent.
#[derive(Debug, Clone, Copy)]
pub struct PoolSnapshot {
    /// LP-token balance held by the staking contract (LP decimals).
    pub tvl: f64,
    /// Caller's staked amount (LP decimals).
    pub staked: f64,
    /// Caller's pending reward (reward decimals).
    pub pending_reward: f64,
    /// Reward emission per second (reward decimals).
    pub reward_rate_per_sec: f64,
    /// Unix timestamp at which the pool stops emitting.
    pub end_time: u64,
    /// LP decimals resolved for this snapshot.
    pub lp_decimals: u8,
}

/// Canonical surface over one chain. The write workflows
/// (`approve_and_stake`, `withdraw`) are provided methods so the
/// allowance-precondition logic exists exactly once and is exercised
/// against mock adapters in tests; implementations supply the primitive
/// contract calls.
#[async_trait]
pub trait ChainAdapter: Send + Sync + fmt::Debug {
    fn chain_name(&self) -> &'static str;

    /// True once addresses and the connection handle are set. Write
    /// readiness additionally requires signing material; implementations
    /// report that through `NotReady` on the write primitives.
    fn is_ready(&self) -> bool;

    /// Reads the full pool state concurrently and returns one normalized
    /// snapshot. Individual call failures propagate.
    async fn pool_snapshot(&self) -> Result<PoolSnapshot, ChainError>;

    /// LP-token decimals, defaulting to `DEFAULT_LP_DECIMALS` when the
    /// contract does not expose them.
    async fn lp_decimals(&self) -> Result<u8, ChainError>;

    /// Current LP allowance granted by the caller to the staking contract.
    async fn allowance(&self) -> Result<U256, ChainError>;

    /// Submits an approval for `amount` base units and awaits finality.
    async fn approve(&self, amount: U256) -> Result<(), ChainError>;

    /// Submits a deposit of `amount` base units and awaits finality.
    async fn deposit(&self, amount: U256) -> Result<(), ChainError>;

    /// Submits a withdrawal of `amount` base units and awaits finality.
    async fn submit_withdraw(&self, amount: U256) -> Result<(), ChainError>;

    /// Approves (only when the current allowance is insufficient) and then
    /// stakes `amount` human units. An already-sufficient allowance skips
    /// the approval transaction entirely.
    async fn approve_and_stake(&self, amount: f64) -> Result<(), ChainError> {
        if !self.is_ready() {
            return Err(ChainError::NotReady(format!(
                "{} adapter has no contract addresses or connection",
                self.chain_name()
            )));
        }
        let decimals = self.lp_decimals().await.unwrap_or(DEFAULT_LP_DECIMALS);
        let units = to_base_units(amount, decimals)?;
        let allowance = self.allowance().await?;
        if allowance < units {
            debug!(
                chain = self.chain_name(),
                %allowance, required = %units,
                "allowance insufficient, submitting approval"
            );
            self.approve(units).await?;
        }
        self.deposit(units).await
    }

    /// Withdraws `amount` human units. No allowance step.
    async fn withdraw(&self, amount: f64) -> Result<(), ChainError> {
        if !self.is_ready() {
            return Err(ChainError::NotReady(format!(
                "{} adapter has no contract addresses or connection",
                self.chain_name()
            )));
        }
        let decimals = self.lp_decimals().await.unwrap_or(DEFAULT_LP_DECIMALS);
        let units = to_base_units(amount, decimals)?;
        self.submit_withdraw(units).await
    }
}

/// Current unix time in whole seconds.
pub fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Converts a human amount to integer base units, truncating toward zero.
/// Truncation (never rounding up) guarantees the submitted amount cannot
/// exceed what the user authorized.
pub fn to_base_units(amount: f64, decimals: u8) -> Result<U256, ChainError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ChainError::InvalidAmount(format!(
            "amount must be a non-negative finite number, got {amount}"
        )));
    }
    let scaled = amount * 10f64.powi(decimals as i32);
    if scaled >= 2f64.powi(128) {
        return Err(ChainError::InvalidAmount(format!(
            "amount {amount} overflows at {decimals} decimals"
        )));
    }
    Ok(U256::from(scaled.floor() as u128))
}

/// Converts integer base units back to a human amount.
pub fn from_base_units(amount: U256, decimals: u8) -> f64 {
    // f64 carries ~15 significant digits; fine for display-grade stats.
    let raw: f64 = if amount <= U256::from(u128::MAX) {
        amount.as_u128() as f64
    } else {
        amount.to_string().parse().unwrap_or(f64::MAX)
    };
    raw / 10f64.powi(decimals as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_base_units_truncates_never_rounds_up() {
        // 1.9999999 at 6 decimals: the last digit is below the scale and
        // must be dropped, not rounded to 2_000_000.
        let units = to_base_units(1.999_999_9, 6).unwrap();
        assert_eq!(units, U256::from(1_999_999u64));

        let units = to_base_units(0.1234567, 6).unwrap();
        assert_eq!(units, U256::from(123_456u64));
    }

    #[test]
    fn test_base_unit_round_trip_within_floor_tolerance() {
        for decimals in [6u8, 18u8] {
            for amount in [0.0, 1.0, 42.5, 1234.567891, 0.000001] {
                let units = to_base_units(amount, decimals).unwrap();
                let back = from_base_units(units, decimals);
                let tolerance = 10f64.powi(-(decimals as i32));
                assert!(back <= amount + f64::EPSILON, "{back} must not exceed {amount}");
                assert!(
                    amount - back <= tolerance + amount * 1e-12,
                    "round trip of {amount} at {decimals} decimals drifted to {back}"
                );
            }
        }
    }

    #[test]
    fn test_to_base_units_rejects_bad_input() {
        assert!(to_base_units(-1.0, 6).is_err());
        assert!(to_base_units(f64::NAN, 6).is_err());
        assert!(to_base_units(f64::INFINITY, 18).is_err());
    }

    #[test]
    fn test_reward_and_lp_scales_stay_distinct() {
        // One raw integer, two conventions: normalizing a reward amount with
        // LP decimals (or vice versa) is the classic mix-up, so make the
        // difference observable.
        let raw = U256::from(1_000_000_000_000_000_000u128); // 10^18
        assert_eq!(from_base_units(raw, REWARD_DECIMALS), 1.0);
        assert_eq!(from_base_units(raw, 6), 1e12);
    }
}
