//! HTTP surface: the oracle read endpoint, the engine view, and metrics.
//!
//! `/price` is the on-demand aggregation path: it triggers a fetch-and-fold
//! and answers with the smoothed window mean, `{ok, price, samples}`.

use crate::metrics;
use crate::price_oracle::PriceAggregator;
use crate::staking::StakingStatsEngine;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use warp::Filter;

pub fn spawn_server(
    addr: SocketAddr,
    aggregator: Arc<PriceAggregator>,
    engine: Arc<StakingStatsEngine>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let price_aggregator = Arc::clone(&aggregator);
    let price_route = warp::path("price")
        .and(warp::get())
        .and(warp::any().map(move || Arc::clone(&price_aggregator)))
        .then(|aggregator: Arc<PriceAggregator>| async move {
            let quote = aggregator.current_price().await;
            warp::reply::json(&json!({
                "ok": true,
                "price": quote.price,
                "samples": quote.samples,
            }))
        });

    let stats_route = warp::path("stats")
        .and(warp::get())
        .and(warp::any().map(move || Arc::clone(&engine)))
        .then(|engine: Arc<StakingStatsEngine>| async move {
            warp::reply::json(&engine.view().await)
        });

    let metrics_route = warp::path("metrics").and(warp::get()).map(|| {
        match metrics::gather() {
            Ok(body) => warp::reply::with_status(body, warp::http::StatusCode::OK),
            Err(e) => {
                error!(error = %e, "metrics encoding failed");
                warp::reply::with_status(
                    String::new(),
                    warp::http::StatusCode::INTERNAL_SERVER_ERROR,
                )
            }
        }
    });

    let routes = price_route.or(stats_route).or(metrics_route);

    tokio::spawn(async move {
        let (bound, serving) = warp::serve(routes)
            .bind_with_graceful_shutdown(addr, async move { shutdown.cancelled().await });
        info!(addr = %bound, "oracle endpoint serving");
        serving.await;
        info!("oracle endpoint stopped");
    })
}
