//! # Centralized Error Handling
//!
//! A single, typed error hierarchy for the whole service. Each subsystem has
//! its own enum; the top-level `AppError` wraps them with `#[from]`
//! conversions so setup code can bubble anything with `?` without losing the
//! originating subsystem.

use thiserror::Error;

/// The top-level error type for the service binary.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Infrastructure setup error: {0}")]
    Infrastructure(String),
    #[error("Price oracle error: {0}")]
    Oracle(#[from] OracleError),
    #[error("Chain adapter error: {0}")]
    Chain(#[from] ChainError),
    #[error("Staking engine error: {0}")]
    Staking(#[from] StakingError),
    #[error("System shut down")]
    Shutdown,
}

/// Errors internal to the price aggregator. These never propagate past the
/// aggregator's public surface: a failed source is skipped, a fully failed
/// tick degrades to the fallback constant.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Price source unavailable: {url}: {reason}")]
    SourceUnavailable { url: String, reason: String },
    #[error("No price source produced a signal this tick")]
    NoSignal,
    #[error("Unrecognized response shape from {0}")]
    UnrecognizedShape(String),
}

/// Errors from the chain adapters. Unlike the aggregator's, these propagate
/// to the caller verbatim; a refresh cycle that hits one is marked failed.
#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("Adapter not ready: {0}")]
    NotReady(String),
    #[error("Contract read failed: {0}")]
    Read(String),
    #[error("Contract write failed: {0}")]
    Write(String),
    #[error("RPC provider error: {0}")]
    Provider(String),
    #[error("Data encoding/decoding error: {0}")]
    DataEncoding(String),
    #[error("Wallet error: {0}")]
    Wallet(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// Errors surfaced by the staking stats engine.
#[derive(Error, Debug)]
pub enum StakingError {
    #[error("Engine not ready: {0}")]
    NotReady(String),
    #[error("A write operation is already in flight for this position")]
    WriteInFlight,
    #[error("Chain adapter error: {0}")]
    Chain(#[from] ChainError),
}
