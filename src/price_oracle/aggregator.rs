//! Multi-source price aggregator.
//!
//! Each tick polls every configured source concurrently with a bounded
//! per-source timeout, extracts a price from whichever of the known response
//! shapes the source uses, averages the same-tick readings, and folds the
//! result into the sample window. A source failing is routine; the batch
//! proceeds with whatever answered. Total outage degrades to the configured
//! fallback constant and is never fatal.

use crate::config::OracleConfig;
use crate::errors::OracleError;
use crate::metrics;
use crate::sample_window::SampleWindow;
use futures::future::join_all;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The aggregator's answer: the sample-window mean (not the raw last
/// observation) plus current window occupancy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub price: f64,
    pub samples: usize,
}

pub struct PriceAggregator {
    client: Client,
    sources: Vec<String>,
    source_timeout: Duration,
    tick_interval: Duration,
    fallback: f64,
    window: Mutex<SampleWindow>,
}

impl std::fmt::Debug for PriceAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceAggregator")
            .field("sources", &self.sources.len())
            .field("source_timeout", &self.source_timeout)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl PriceAggregator {
    pub fn new(cfg: &OracleConfig) -> eyre::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.source_timeout_secs.max(1)))
            .user_agent("stakewatch/0.1")
            .build()?;
        if cfg.sources.is_empty() {
            warn!("no price sources configured; every tick will use the fallback constant");
        }
        Ok(Self {
            client,
            sources: cfg.sources.clone(),
            source_timeout: Duration::from_secs(cfg.source_timeout_secs.max(1)),
            tick_interval: Duration::from_secs(cfg.tick_interval_secs.max(1)),
            fallback: cfg.fallback_price,
            window: Mutex::new(SampleWindow::new(cfg.window_size, cfg.fallback_price)),
        })
    }

    /// Polls every source concurrently. A source that errors, times out, or
    /// answers in an unrecognized shape is skipped; partial results are
    /// valid results.
    pub async fn fetch_sources(&self) -> Vec<f64> {
        let fetches = self.sources.iter().map(|url| {
            let client = self.client.clone();
            let timeout = self.source_timeout;
            async move {
                match tokio::time::timeout(timeout, fetch_one(&client, url)).await {
                    Ok(Ok(price)) => Some(price),
                    Ok(Err(reason)) => {
                        metrics::ORACLE_SOURCE_FAILURES.with_label_values(&[url.as_str()]).inc();
                        warn!(source = %url, %reason, "price source skipped");
                        None
                    }
                    Err(_) => {
                        metrics::ORACLE_SOURCE_FAILURES.with_label_values(&[url.as_str()]).inc();
                        warn!(source = %url, timeout_s = timeout.as_secs(), "price source timed out");
                        None
                    }
                }
            }
        });
        join_all(fetches).await.into_iter().flatten().collect()
    }

    /// One aggregation step: average the batch (or fall back), push the
    /// observation, and return the smoothed window state. The window mutex
    /// makes append-then-evict atomic across the two trigger paths.
    async fn fold_batch(&self, batch: &[f64]) -> PriceQuote {
        metrics::ORACLE_TICKS.inc();
        let observation = if batch.is_empty() {
            metrics::ORACLE_FALLBACK_TICKS.inc();
            debug!(fallback = self.fallback, "no source produced a signal, using fallback");
            self.fallback
        } else {
            batch.iter().sum::<f64>() / batch.len() as f64
        };

        let mut window = self.window.lock().await;
        window.push(observation);
        let quote = PriceQuote { price: window.mean(), samples: window.len() };
        drop(window);

        metrics::SMOOTHED_PRICE.set(quote.price);
        quote
    }

    /// The on-demand path: fetch, fold, and answer with the smoothed mean.
    /// A single noisy poll is blended into recent history rather than
    /// trusted directly. Infallible by design; degradation is logged.
    pub async fn current_price(&self) -> PriceQuote {
        let batch = self.fetch_sources().await;
        self.fold_batch(&batch).await
    }

    /// The timer path: identical fold, no caller to answer.
    pub async fn tick(&self) {
        let batch = self.fetch_sources().await;
        let quote = self.fold_batch(&batch).await;
        debug!(price = quote.price, samples = quote.samples, "oracle tick");
    }

    /// Smoothed state without triggering a fetch.
    pub async fn smoothed(&self) -> PriceQuote {
        let window = self.window.lock().await;
        PriceQuote { price: window.mean(), samples: window.len() }
    }

    /// Runs `tick()` at the configured interval until cancelled, keeping
    /// the window warm between on-demand requests.
    pub fn spawn_ticker(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let aggregator = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(aggregator.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                interval_s = aggregator.tick_interval.as_secs(),
                sources = aggregator.sources.len(),
                "price aggregation ticker started"
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("price aggregation ticker stopped");
                        return;
                    }
                    _ = interval.tick() => aggregator.tick().await,
                }
            }
        })
    }
}

async fn fetch_one(client: &Client, url: &str) -> Result<f64, OracleError> {
    let body: Value = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| OracleError::SourceUnavailable { url: url.to_string(), reason: e.to_string() })?
        .json()
        .await
        .map_err(|e| OracleError::SourceUnavailable {
            url: url.to_string(),
            reason: format!("body was not JSON: {e}"),
        })?;
    extract_price(&body).ok_or_else(|| OracleError::UnrecognizedShape(url.to_string()))
}

/// Tolerant extraction over the known upstream shapes, checked in order:
/// a top-level `price`, a nested `tick.close`, a nested `data.price`.
/// Accepts numbers and numeric strings; zero and negatives are no-signal
/// (a free API's "no data" placeholder, not a price).
fn extract_price(body: &Value) -> Option<f64> {
    let candidates = [
        body.get("price"),
        body.get("tick").and_then(|t| t.get("close")),
        body.get("data").and_then(|d| d.get("price")),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(as_number)
        .filter(|p| p.is_finite() && *p > 0.0)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn aggregator(sources: Vec<String>, window: usize, fallback: f64) -> PriceAggregator {
        PriceAggregator::new(&OracleConfig {
            sources,
            window_size: window,
            fallback_price: fallback,
            tick_interval_secs: 5,
            source_timeout_secs: 3,
            bind_addr: String::new(),
        })
        .unwrap()
    }

    #[test]
    fn test_extract_price_shapes_in_order() {
        assert_eq!(extract_price(&json!({"price": 1.01})), Some(1.01));
        assert_eq!(extract_price(&json!({"tick": {"close": 0.99}})), Some(0.99));
        assert_eq!(extract_price(&json!({"data": {"price": 1.05}})), Some(1.05));
        // Top-level price wins over nested shapes.
        assert_eq!(
            extract_price(&json!({"price": 1.0, "data": {"price": 2.0}})),
            Some(1.0)
        );
    }

    #[test]
    fn test_extract_price_accepts_numeric_strings() {
        assert_eq!(extract_price(&json!({"price": "1.02"})), Some(1.02));
        assert_eq!(extract_price(&json!({"data": {"price": " 0.98 "}})), Some(0.98));
    }

    #[test]
    fn test_unrecognized_shapes_are_no_signal() {
        assert_eq!(extract_price(&json!({})), None);
        assert_eq!(extract_price(&json!({"price": "n/a"})), None);
        assert_eq!(extract_price(&json!({"price": 0})), None);
        assert_eq!(extract_price(&json!({"price": -3.0})), None);
        assert_eq!(extract_price(&json!({"tick": {"open": 1.0}})), None);
        assert_eq!(extract_price(&json!([1.0, 2.0])), None);
    }

    #[tokio::test]
    async fn test_two_sources_average_into_fresh_window() {
        let agg = aggregator(vec![], 12, 1.0);
        // Sources returning 1.00 and 1.02 make a 1.01 observation; on an
        // empty capacity-12 window the smoothed price equals it exactly.
        let quote = agg.fold_batch(&[1.00, 1.02]).await;
        assert!((quote.price - 1.01).abs() < 1e-12);
        assert_eq!(quote.samples, 1);
    }

    #[tokio::test]
    async fn test_total_outage_degrades_to_fallback_every_tick() {
        let agg = aggregator(vec![], 12, 0.97);
        for expected_samples in 1..=3 {
            let quote = agg.fold_batch(&[]).await;
            assert_eq!(quote.price, 0.97);
            assert_eq!(quote.samples, expected_samples);
        }
    }

    #[tokio::test]
    async fn test_current_price_with_no_sources_is_infallible() {
        let agg = aggregator(vec![], 12, 1.0);
        let quote = agg.current_price().await;
        assert_eq!(quote.price, 1.0);
        assert_eq!(quote.samples, 1);
    }

    #[tokio::test]
    async fn test_smoothing_blends_a_noisy_poll() {
        let agg = aggregator(vec![], 4, 1.0);
        for _ in 0..3 {
            agg.fold_batch(&[1.0]).await;
        }
        // A 2.0 outlier moves the mean to 1.25, not to 2.0.
        let quote = agg.fold_batch(&[2.0]).await;
        assert!((quote.price - 1.25).abs() < 1e-12);
        assert_eq!(quote.samples, 4);
    }

    #[tokio::test]
    async fn test_smoothed_does_not_mutate_the_window() {
        let agg = aggregator(vec![], 12, 1.0);
        agg.fold_batch(&[1.02]).await;
        let before = agg.smoothed().await;
        let after = agg.smoothed().await;
        assert_eq!(before, after);
        assert_eq!(after.samples, 1);
    }

    #[tokio::test]
    async fn test_unreachable_source_is_skipped_not_fatal() {
        // Port 1 refuses connections; the batch must come back empty rather
        // than erroring.
        let agg = aggregator(vec!["http://127.0.0.1:1/price".to_string()], 12, 1.0);
        let batch = agg.fetch_sources().await;
        assert!(batch.is_empty());
        let quote = agg.current_price().await;
        assert_eq!(quote.price, 1.0);
    }
}
