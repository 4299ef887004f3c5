//! # Global Metrics Registry
//!
//! All Prometheus metrics for the service are defined and registered here,
//! so the observability surface has a single point of reference. Exposition
//! happens through the warp server's `/metrics` route.

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge, register_int_counter, register_int_counter_vec, Gauge, IntCounter,
    IntCounterVec,
};

pub static ORACLE_TICKS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("stakewatch_oracle_ticks_total", "Aggregation ticks executed")
        .expect("metric registration must not fail")
});

pub static ORACLE_SOURCE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "stakewatch_oracle_source_failures_total",
        "Price source fetches that errored, timed out, or had no recognizable field",
        &["source"]
    )
    .expect("metric registration must not fail")
});

pub static ORACLE_FALLBACK_TICKS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "stakewatch_oracle_fallback_ticks_total",
        "Ticks where no source answered and the fallback constant was used"
    )
    .expect("metric registration must not fail")
});

pub static SMOOTHED_PRICE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "stakewatch_smoothed_price",
        "Current sample-window mean price"
    )
    .expect("metric registration must not fail")
});

pub static REFRESHES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("stakewatch_refreshes_total", "Staking stat refresh cycles started")
        .expect("metric registration must not fail")
});

pub static REFRESH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "stakewatch_refresh_failures_total",
        "Refresh cycles that ended in the failed state"
    )
    .expect("metric registration must not fail")
});

/// Renders the default registry in text exposition format.
pub fn gather() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
