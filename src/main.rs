//! Service entry point.
//!
//! 1. Load configuration (with environment interpolation) → initialise tracing.
//! 2. Build the price aggregator and the chain adapter the default network
//!    profile selects.
//! 3. Spawn the aggregation ticker, the engine refresh loop, and the HTTP
//!    surface.
//! 4. Graceful shutdown on Ctrl-C through one cancellation token.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stakewatch::{
    chain::{evm::EvmAdapter, tron::TronAdapter, ChainAdapter},
    config::{ChainKind, Config},
    errors::AppError,
    price_oracle::PriceAggregator,
    server::spawn_server,
    staking::StakingStatsEngine,
};

#[derive(Debug, Parser)]
#[command(name = "stakewatch", about = "Cross-chain LP staking monitor with an aggregated price oracle")]
struct Args {
    /// Path to the JSON configuration document.
    #[arg(long, default_value = "config/stakewatch.json")]
    config: PathBuf,

    /// Network profile to monitor; defaults to the config's default_network.
    #[arg(long)]
    network: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();
    let config = Arc::new(
        Config::from_file(&args.config)
            .await
            .map_err(|e| AppError::Config(format!("{e:#}")))?,
    );

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(&config.log_level)
            // ethers and hyper are chatty at debug; keep them at warn unless
            // RUST_LOG overrides.
            .add_directive("ethers_providers=warn".parse().expect("static directive"))
            .add_directive("hyper=warn".parse().expect("static directive"))
            .add_directive("reqwest=warn".parse().expect("static directive"))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let network_name = args.network.as_deref().unwrap_or(&config.default_network);
    let network = config
        .network(network_name)
        .map_err(|_| AppError::Config(format!("unknown network profile '{network_name}'")))?;
    info!(network = network_name, chain = ?network.chain, "starting stakewatch");

    let adapter: Arc<dyn ChainAdapter> = match network.chain {
        ChainKind::Evm => Arc::new(EvmAdapter::connect(network).await?),
        ChainKind::Tron => Arc::new(TronAdapter::new(network)?),
    };
    if !adapter.is_ready() {
        // Not fatal: the service still serves the oracle; refreshes no-op
        // until addresses are configured.
        error!(
            chain = adapter.chain_name(),
            "adapter is missing addresses or an endpoint; staking stats will stay empty"
        );
    }

    let aggregator = Arc::new(
        PriceAggregator::new(&config.oracle)
            .map_err(|e| AppError::Infrastructure(e.to_string()))?,
    );
    let engine = Arc::new(StakingStatsEngine::new(adapter, Arc::clone(&aggregator)));

    let shutdown = CancellationToken::new();
    let ticker = Arc::clone(&aggregator).spawn_ticker(shutdown.clone());

    let refresh_handle = {
        let engine = Arc::clone(&engine);
        let shutdown = shutdown.clone();
        let period = Duration::from_secs(config.refresh_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = interval.tick() => engine.refresh().await,
                }
            }
        })
    };

    let bind_addr: SocketAddr = config.oracle.bind_addr.parse().map_err(|e| {
        AppError::Config(format!("invalid bind address '{}': {e}", config.oracle.bind_addr))
    })?;
    let server = spawn_server(bind_addr, Arc::clone(&aggregator), engine, shutdown.clone());

    signal::ctrl_c()
        .await
        .map_err(|e| AppError::Infrastructure(format!("failed to listen for shutdown signal: {e}")))?;
    info!("shutdown signal received, stopping tasks");
    shutdown.cancel();

    for (name, handle) in [("ticker", ticker), ("refresh", refresh_handle), ("server", server)] {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "task did not stop cleanly");
        }
    }
    info!("stakewatch stopped");
    Ok(())
}
