//! # Staking Stats Engine
//!
//! Combines the active chain adapter's reads with the aggregator's smoothed
//! price into one `StakingStats` value, and drives the two write workflows.
//! The engine adds no business logic beyond readiness gating and collision
//! prevention; the formulas live in `compute_stats`.

use crate::chain::{unix_now, ChainAdapter, PoolSnapshot};
use crate::errors::StakingError;
use crate::metrics;
use crate::price_oracle::PriceAggregator;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 365-day year, no leap adjustment. This mirrors the staking contract's
/// published APR convention; it is specified behavior, not an approximation
/// to correct.
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshState {
    Idle,
    Refreshing,
    Ready,
    Failed,
}

/// Derived statistics for one refresh cycle, in human units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StakingStats {
    pub tvl: f64,
    pub apr: f64,
    pub staked: f64,
    pub pending: f64,
    pub ends_in: u64,
    pub price: f64,
}

/// The externally observable engine state. Replaced in a single lock write
/// so readers never see a mix of stale and fresh fields.
#[derive(Debug, Clone, Serialize)]
pub struct EngineView {
    pub state: RefreshState,
    pub stats: Option<StakingStats>,
    pub last_error: Option<String>,
}

pub struct StakingStatsEngine {
    adapter: Arc<dyn ChainAdapter>,
    oracle: Arc<PriceAggregator>,
    view: RwLock<EngineView>,
    refresh_in_flight: AtomicBool,
    write_in_flight: AtomicBool,
}

/// Clears an in-flight flag even if the guarded future panics or is
/// cancelled mid-await.
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl StakingStatsEngine {
    pub fn new(adapter: Arc<dyn ChainAdapter>, oracle: Arc<PriceAggregator>) -> Self {
        Self {
            adapter,
            oracle,
            view: RwLock::new(EngineView {
                state: RefreshState::Idle,
                stats: None,
                last_error: None,
            }),
            refresh_in_flight: AtomicBool::new(false),
            write_in_flight: AtomicBool::new(false),
        }
    }

    pub async fn view(&self) -> EngineView {
        self.view.read().await.clone()
    }

    /// One refresh cycle: `Idle/Ready/Failed → Refreshing → {Ready, Failed}`.
    /// A no-op when the adapter is not ready or another refresh is already
    /// in flight. A failed cycle keeps the last good stats and records the
    /// failure reason; it never clears previously valid statistics.
    pub async fn refresh(&self) {
        if !self.adapter.is_ready() {
            debug!(chain = self.adapter.chain_name(), "refresh skipped, adapter not ready");
            return;
        }
        if self
            .refresh_in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("refresh skipped, one already in flight");
            return;
        }
        let _guard = FlagGuard(&self.refresh_in_flight);
        metrics::REFRESHES_TOTAL.inc();
        self.view.write().await.state = RefreshState::Refreshing;

        // Chain reads and the price fetch proceed concurrently; the price
        // path cannot fail (it degrades to its fallback internally).
        let (snapshot, quote) =
            tokio::join!(self.adapter.pool_snapshot(), self.oracle.current_price());

        let mut view = self.view.write().await;
        match snapshot {
            Ok(snapshot) => {
                let stats = compute_stats(&snapshot, quote.price, unix_now());
                info!(
                    chain = self.adapter.chain_name(),
                    tvl = stats.tvl,
                    apr = stats.apr,
                    staked = stats.staked,
                    pending = stats.pending,
                    ends_in = stats.ends_in,
                    price = stats.price,
                    "staking stats refreshed"
                );
                *view = EngineView {
                    state: RefreshState::Ready,
                    stats: Some(stats),
                    last_error: None,
                };
            }
            Err(e) => {
                metrics::REFRESH_FAILURES.inc();
                warn!(chain = self.adapter.chain_name(), error = %e, "refresh cycle failed");
                view.state = RefreshState::Failed;
                view.last_error = Some(e.to_string());
                // view.stats intentionally retained.
            }
        }
    }

    /// Delegates to the adapter's approve-then-stake workflow. Overlapping
    /// writes against the same position are a correctness hazard, so a
    /// second write while one is in flight is rejected outright.
    pub async fn approve_and_stake(&self, amount: f64) -> Result<(), StakingError> {
        let _guard = self.acquire_write_slot()?;
        self.adapter.approve_and_stake(amount).await?;
        Ok(())
    }

    pub async fn withdraw(&self, amount: f64) -> Result<(), StakingError> {
        let _guard = self.acquire_write_slot()?;
        self.adapter.withdraw(amount).await?;
        Ok(())
    }

    fn acquire_write_slot(&self) -> Result<FlagGuard<'_>, StakingError> {
        if !self.adapter.is_ready() {
            return Err(StakingError::NotReady(format!(
                "{} adapter is not configured",
                self.adapter.chain_name()
            )));
        }
        self.write_in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| StakingError::WriteInFlight)?;
        Ok(FlagGuard(&self.write_in_flight))
    }
}

/// The derived-statistics formulas. Pure, so the edge cases are unit
/// testable without an adapter.
fn compute_stats(snapshot: &PoolSnapshot, price: f64, now: u64) -> StakingStats {
    // A pool that has already ended reports zero remaining time, never a
    // negative value.
    let ends_in = snapshot.end_time.saturating_sub(now);
    // APR is defined as zero when nothing is locked; projecting yield
    // against an empty pool is meaningless, not infinite.
    let apr = if snapshot.tvl > 0.0 {
        let yearly_reward = snapshot.reward_rate_per_sec * SECONDS_PER_YEAR as f64;
        (yearly_reward * price) / snapshot.tvl * 100.0
    } else {
        0.0
    };
    StakingStats {
        tvl: snapshot.tvl,
        apr,
        staked: snapshot.staked,
        pending: snapshot.pending_reward,
        ends_in,
        price,
    }
}
