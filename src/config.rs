//! # Service Configuration
//!
//! Loads a single JSON document describing the oracle settings and the two
//! network profiles, resolves `${VAR_NAME}` placeholders from the process
//! environment at load time, and exposes the result as an immutable struct.
//! The `Config` is built once at startup and passed by `Arc` into the
//! components that need it; nothing mutates it afterwards.

use eyre::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

//================================================================================================//
//                                       Top-Level Config                                         //
//================================================================================================//

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub oracle: OracleConfig,
    pub networks: HashMap<String, NetworkConfig>,
    #[serde(default = "default_network_key")]
    pub default_network: String,
    /// Interval for the engine's background refresh loop.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Price source URLs. May contain `${VAR}` placeholders; sources that
    /// resolve to an empty string are dropped.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_fallback_price")]
    pub fallback_price: f64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Evm,
    Tron,
}

/// Per-chain static descriptor, shaped like the original deployment
/// document: token, LP token, and staking contract, plus the connection
/// endpoint and optional signing material.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub chain: ChainKind,
    #[serde(default)]
    pub rpc_url: String,
    pub token: ContractRef,
    pub lp: ContractRef,
    pub staking: ContractRef,
    /// Hex-encoded secp256k1 key for the write path. Reads work without it;
    /// writes report NotReady.
    #[serde(default)]
    pub signer_key: Option<String>,
    /// Address whose stake record is observed. Falls back to the signer's
    /// address, or the zero address when neither is configured.
    #[serde(default)]
    pub user_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractRef {
    pub address: String,
    /// Accepts a number or a `${VAR}` string (the deployment documents use
    /// both); resolved to a concrete value during interpolation.
    #[serde(default)]
    pub decimals: Option<DecimalsField>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DecimalsField {
    Number(u8),
    Raw(String),
}

fn default_network_key() -> String {
    "tron".to_string()
}
fn default_refresh_interval() -> u64 {
    15
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_window_size() -> usize {
    12
}
fn default_fallback_price() -> f64 {
    1.0
}
fn default_tick_interval() -> u64 {
    5
}
fn default_source_timeout() -> u64 {
    3
}
fn default_bind_addr() -> String {
    "127.0.0.1:8090".to_string()
}

impl Config {
    /// Loads the config document, then resolves every `${VAR}` placeholder
    /// against the process environment. Unresolved placeholders fall back to
    /// an explicit default (empty string for addresses, per-chain defaults
    /// for decimals).
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut cfg: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from JSON: {}", path.as_ref().display()))?;
        cfg.interpolate(&std::env::vars().collect::<HashMap<_, _>>());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolves placeholders in-place against the given variable map.
    /// Separated from `from_file` so tests can pass a synthetic environment.
    pub fn interpolate(&mut self, env: &HashMap<String, String>) {
        self.oracle.sources = self
            .oracle
            .sources
            .iter()
            .map(|s| inject_env(s, env, ""))
            .filter(|s| !s.is_empty())
            .collect();

        for network in self.networks.values_mut() {
            let default_decimals = match network.chain {
                ChainKind::Evm => 18,
                ChainKind::Tron => 6,
            };
            network.rpc_url = inject_env(&network.rpc_url, env, "");
            for contract in [&mut network.token, &mut network.lp, &mut network.staking] {
                contract.address = inject_env(&contract.address, env, "");
                contract.decimals = Some(DecimalsField::Number(resolve_decimals(
                    contract.decimals.take(),
                    env,
                    default_decimals,
                )));
            }
            network.signer_key = network
                .signer_key
                .take()
                .map(|k| inject_env(&k, env, ""))
                .filter(|k| !k.is_empty());
            network.user_address = network
                .user_address
                .take()
                .map(|a| inject_env(&a, env, ""))
                .filter(|a| !a.is_empty());
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.networks.contains_key(&self.default_network) {
            return Err(eyre::eyre!(
                "default_network '{}' has no matching profile",
                self.default_network
            ));
        }
        Ok(())
    }

    pub fn network(&self, name: &str) -> Result<&NetworkConfig> {
        self.networks
            .get(name)
            .ok_or_else(|| eyre::eyre!("Network config not found: {}", name))
    }
}

impl ContractRef {
    pub fn decimals_or(&self, default: u8) -> u8 {
        match self.decimals {
            Some(DecimalsField::Number(d)) => d,
            _ => default,
        }
    }
}

fn resolve_decimals(field: Option<DecimalsField>, env: &HashMap<String, String>, default: u8) -> u8 {
    match field {
        Some(DecimalsField::Number(d)) => d,
        Some(DecimalsField::Raw(raw)) => inject_env(&raw, env, "").parse().unwrap_or(default),
        None => default,
    }
}

/// Replaces every `${VAR_NAME}` token with the variable's value, or with
/// `fallback` when the variable is unset. Non-placeholder text passes
/// through untouched.
pub fn inject_env(input: &str, env: &HashMap<String, String>, fallback: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if after[..end].chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => {
                let name = &after[..end];
                match env.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(fallback),
                }
                rest = &after[end + 1..];
            }
            _ => {
                // Not a well-formed placeholder; emit literally.
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_inject_env_substitutes_and_falls_back() {
        let vars = env(&[("TOKEN_ADDR", "0xabc")]);
        assert_eq!(inject_env("${TOKEN_ADDR}", &vars, ""), "0xabc");
        assert_eq!(inject_env("${MISSING_ADDR}", &vars, ""), "");
        assert_eq!(inject_env("wss://${TOKEN_ADDR}/ws", &vars, ""), "wss://0xabc/ws");
        assert_eq!(inject_env("no placeholders", &vars, ""), "no placeholders");
    }

    #[test]
    fn test_inject_env_malformed_placeholder_passes_through() {
        let vars = env(&[]);
        assert_eq!(inject_env("${not closed", &vars, ""), "${not closed");
    }

    #[test]
    fn test_interpolation_applies_per_chain_decimal_defaults() {
        let raw = r#"{
            "oracle": { "sources": ["${SRC_A}", "https://example.com/p"] },
            "default_network": "tron",
            "networks": {
                "tron": {
                    "chain": "tron",
                    "rpc_url": "${TRON_NODE}",
                    "token": { "address": "${TRON_TOKEN}", "decimals": "${TRON_TOKEN_DECIMALS}" },
                    "lp": { "address": "TLPaddr" },
                    "staking": { "address": "TStakeAddr" }
                },
                "evm": {
                    "chain": "evm",
                    "rpc_url": "http://localhost:8545",
                    "token": { "address": "0x01", "decimals": 18 },
                    "lp": { "address": "0x02" },
                    "staking": { "address": "0x03" }
                }
            }
        }"#;
        let mut cfg: Config = serde_json::from_str(raw).unwrap();
        cfg.interpolate(&env(&[("TRON_NODE", "https://api.trongrid.io")]));

        // Unresolved source dropped, literal source kept.
        assert_eq!(cfg.oracle.sources, vec!["https://example.com/p".to_string()]);
        // Defaults from serde.
        assert_eq!(cfg.oracle.window_size, 12);
        assert_eq!(cfg.oracle.fallback_price, 1.0);
        assert_eq!(cfg.oracle.tick_interval_secs, 5);

        let tron = cfg.network("tron").unwrap();
        assert_eq!(tron.rpc_url, "https://api.trongrid.io");
        assert_eq!(tron.token.address, "");
        // Unresolved decimals placeholder falls back to the tron default.
        assert_eq!(tron.token.decimals_or(0), 6);
        let evm = cfg.network("evm").unwrap();
        assert_eq!(evm.token.decimals_or(0), 18);
    }

    #[test]
    fn test_unknown_default_network_rejected() {
        let raw = r#"{
            "oracle": {},
            "default_network": "solana",
            "networks": {}
        }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert!(cfg.validate().is_err());
    }
}
