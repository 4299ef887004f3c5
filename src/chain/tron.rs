//! Tron adapter: full-node HTTP API over `reqwest`.
//!
//! Reads use `triggerconstantcontract` with hand-packed 32-byte ABI words.
//! Writes follow the node's three-step flow: build an unsigned transaction
//! with `triggersmartcontract`, sign its id (sha256 of the raw payload)
//! with the configured secp256k1 key, broadcast, then poll the transaction
//! info endpoint until a receipt appears.

use crate::chain::{
    from_base_units, ChainAdapter, PoolSnapshot, UserStakeRecord, DEFAULT_LP_DECIMALS,
    REWARD_DECIMALS,
};
use crate::config::NetworkConfig;
use crate::errors::ChainError;
use async_trait::async_trait;
use ethers::core::k256::ecdsa::SigningKey;
use ethers::types::U256;
use ethers::utils::keccak256;
use moka::future::Cache;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for individual node HTTP requests.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on energy spend per write, in sun.
const FEE_LIMIT_SUN: u64 = 100_000_000;
/// Polling cadence and cap while awaiting a transaction receipt.
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_secs(3);
const CONFIRM_MAX_POLLS: u32 = 20;

/// A Tron address in its 21-byte form (0x41 prefix + 20-byte body).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TronAddress([u8; 21]);

impl TronAddress {
    pub const ZERO: TronAddress = TronAddress([
        0x41, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ]);

    /// Parses either the base58check form (`T...`) or the raw hex form
    /// (`41...`) used by the node API.
    pub fn parse(raw: &str) -> Result<Self, ChainError> {
        if raw.starts_with('T') {
            let decoded = bs58::decode(raw)
                .into_vec()
                .map_err(|e| ChainError::DataEncoding(format!("invalid base58 address '{raw}': {e}")))?;
            if decoded.len() != 25 {
                return Err(ChainError::DataEncoding(format!(
                    "base58 address '{raw}' decodes to {} bytes, expected 25",
                    decoded.len()
                )));
            }
            let (body, checksum) = decoded.split_at(21);
            let digest = Sha256::digest(Sha256::digest(body));
            if digest[..4] != *checksum {
                return Err(ChainError::DataEncoding(format!(
                    "base58 address '{raw}' has a bad checksum"
                )));
            }
            let mut bytes = [0u8; 21];
            bytes.copy_from_slice(body);
            Ok(Self(bytes))
        } else {
            let decoded = hex::decode(raw)
                .map_err(|e| ChainError::DataEncoding(format!("invalid hex address '{raw}': {e}")))?;
            if decoded.len() != 21 || decoded[0] != 0x41 {
                return Err(ChainError::DataEncoding(format!(
                    "hex address '{raw}' is not a 21-byte 0x41-prefixed Tron address"
                )));
            }
            let mut bytes = [0u8; 21];
            bytes.copy_from_slice(&decoded);
            Ok(Self(bytes))
        }
    }

    /// Derives the address controlled by a secp256k1 key: keccak256 of the
    /// uncompressed public key, last 20 bytes, 0x41 prefix.
    pub fn from_signing_key(key: &SigningKey) -> Self {
        let pubkey = key.verifying_key().to_encoded_point(false);
        let digest = keccak256(&pubkey.as_bytes()[1..]);
        let mut bytes = [0u8; 21];
        bytes[0] = 0x41;
        bytes[1..].copy_from_slice(&digest[12..]);
        Self(bytes)
    }

    /// Hex form the node API expects.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// The 32-byte ABI word for this address (20-byte body, left-padded).
    pub fn abi_word(self) -> String {
        format!("{:0>64}", hex::encode(&self.0[1..]))
    }
}

#[derive(Debug, Default, Deserialize)]
struct TriggerResult {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    message: Option<String>,
}

impl TriggerResult {
    /// Node error messages come back hex-encoded.
    fn decoded_message(&self) -> String {
        self.message
            .as_deref()
            .map(|m| {
                hex::decode(m)
                    .ok()
                    .and_then(|b| String::from_utf8(b).ok())
                    .unwrap_or_else(|| m.to_string())
            })
            .unwrap_or_else(|| "no message".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ConstantCallReply {
    #[serde(default)]
    result: TriggerResult,
    #[serde(default)]
    constant_result: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TriggerSmartReply {
    #[serde(default)]
    result: TriggerResult,
    transaction: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct BroadcastReply {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct TronAdapter {
    client: Client,
    node_url: Option<String>,
    lp: Option<TronAddress>,
    staking: Option<TronAddress>,
    user: TronAddress,
    signer: Option<SigningKey>,
    owner: Option<TronAddress>,
    lp_decimals_cache: Cache<String, u8>,
}

impl std::fmt::Debug for TronAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TronAdapter")
            .field("node_url", &self.node_url)
            .field("lp", &self.lp)
            .field("staking", &self.staking)
            .field("user", &self.user)
            .field("can_write", &self.signer.is_some())
            .finish()
    }
}

impl TronAdapter {
    pub fn new(cfg: &NetworkConfig) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("stakewatch/0.1")
            .build()
            .map_err(|e| ChainError::Provider(format!("failed to build HTTP client: {e}")))?;

        let node_url = if cfg.rpc_url.is_empty() {
            None
        } else {
            Some(cfg.rpc_url.trim_end_matches('/').to_string())
        };

        let lp = parse_optional(&cfg.lp.address)?;
        let staking = parse_optional(&cfg.staking.address)?;

        let signer = match &cfg.signer_key {
            Some(key) => {
                let raw = hex::decode(key.trim_start_matches("0x"))
                    .map_err(|e| ChainError::Wallet(format!("invalid Tron signer key: {e}")))?;
                Some(
                    SigningKey::from_slice(&raw)
                        .map_err(|e| ChainError::Wallet(format!("invalid Tron signer key: {e}")))?,
                )
            }
            None => None,
        };
        let owner = signer.as_ref().map(TronAddress::from_signing_key);

        let user = match &cfg.user_address {
            Some(addr) => TronAddress::parse(addr)?,
            None => owner.unwrap_or(TronAddress::ZERO),
        };

        Ok(Self {
            client,
            node_url,
            lp,
            staking,
            user,
            signer,
            owner,
            lp_decimals_cache: Cache::builder()
                .time_to_live(Duration::from_secs(60))
                .max_capacity(4)
                .build(),
        })
    }

    fn read_handles(&self) -> Result<(&str, TronAddress, TronAddress), ChainError> {
        let node = self
            .node_url
            .as_deref()
            .ok_or_else(|| ChainError::NotReady("no Tron node endpoint configured".into()))?;
        let lp = self
            .lp
            .ok_or_else(|| ChainError::NotReady("LP token address not configured".into()))?;
        let staking = self
            .staking
            .ok_or_else(|| ChainError::NotReady("staking contract address not configured".into()))?;
        Ok((node, lp, staking))
    }

    fn signer_handles(&self) -> Result<(&SigningKey, TronAddress), ChainError> {
        match (&self.signer, self.owner) {
            (Some(key), Some(owner)) => Ok((key, owner)),
            _ => Err(ChainError::NotReady("no Tron signer configured".into())),
        }
    }

    /// One read-only contract call; returns the raw result words as hex.
    async fn constant_call(
        &self,
        contract: TronAddress,
        selector: &str,
        parameter: String,
    ) -> Result<String, ChainError> {
        let (node, _, _) = self.read_handles()?;
        let body = json!({
            "owner_address": self.user.to_hex(),
            "contract_address": contract.to_hex(),
            "function_selector": selector,
            "parameter": parameter,
        });
        let reply: ConstantCallReply = self
            .client
            .post(format!("{node}/wallet/triggerconstantcontract"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Read(format!("{selector}: {e}")))?
            .json()
            .await
            .map_err(|e| ChainError::Read(format!("{selector}: bad reply: {e}")))?;
        if !reply.result.result {
            return Err(ChainError::Read(format!(
                "{selector}: node rejected call: {}",
                reply.result.decoded_message()
            )));
        }
        reply
            .constant_result
            .into_iter()
            .next()
            .ok_or_else(|| ChainError::Read(format!("{selector}: empty constant_result")))
    }

    async fn constant_call_u256(
        &self,
        contract: TronAddress,
        selector: &str,
        parameter: String,
    ) -> Result<U256, ChainError> {
        let words = self.constant_call(contract, selector, parameter).await?;
        decode_word(&words, 0).map_err(|e| ChainError::Read(format!("{selector}: {e}")))
    }

    /// Builds, signs, broadcasts, and confirms one state-changing call.
    async fn send_contract_call(
        &self,
        contract: TronAddress,
        selector: &str,
        parameter: String,
    ) -> Result<(), ChainError> {
        let (node, _, _) = self.read_handles()?;
        let (key, owner) = self.signer_handles()?;

        let body = json!({
            "owner_address": owner.to_hex(),
            "contract_address": contract.to_hex(),
            "function_selector": selector,
            "parameter": parameter,
            "fee_limit": FEE_LIMIT_SUN,
            "call_value": 0,
        });
        let reply: TriggerSmartReply = self
            .client
            .post(format!("{node}/wallet/triggersmartcontract"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Write(format!("{selector}: {e}")))?
            .json()
            .await
            .map_err(|e| ChainError::Write(format!("{selector}: bad reply: {e}")))?;
        if !reply.result.result {
            return Err(ChainError::Write(format!(
                "{selector}: node refused to build transaction: {}",
                reply.result.decoded_message()
            )));
        }
        let mut transaction = reply.transaction.ok_or_else(|| {
            ChainError::Write(format!("{selector}: node returned no transaction"))
        })?;
        let txid = transaction
            .get("txID")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Write(format!("{selector}: transaction has no txID")))?
            .to_string();

        // The transaction id is sha256 of the raw payload; signing it signs
        // the transaction.
        let digest = hex::decode(&txid)
            .map_err(|e| ChainError::DataEncoding(format!("bad txID '{txid}': {e}")))?;
        let (signature, recovery) = key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| ChainError::Wallet(format!("signing failed: {e}")))?;
        let mut sig_bytes = signature.to_vec();
        sig_bytes.push(recovery.to_byte());
        transaction["signature"] = json!([hex::encode(sig_bytes)]);

        let broadcast: BroadcastReply = self
            .client
            .post(format!("{node}/wallet/broadcasttransaction"))
            .json(&transaction)
            .send()
            .await
            .map_err(|e| ChainError::Write(format!("{selector}: broadcast: {e}")))?
            .json()
            .await
            .map_err(|e| ChainError::Write(format!("{selector}: broadcast reply: {e}")))?;
        if !broadcast.result {
            return Err(ChainError::Write(format!(
                "{selector}: broadcast rejected: {} {}",
                broadcast.code.unwrap_or_default(),
                broadcast.message.unwrap_or_default()
            )));
        }
        debug!(txid, selector, "transaction broadcast, awaiting receipt");
        self.await_receipt(node, &txid, selector).await
    }

    async fn await_receipt(&self, node: &str, txid: &str, what: &str) -> Result<(), ChainError> {
        for _ in 0..CONFIRM_MAX_POLLS {
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
            let info: Value = self
                .client
                .post(format!("{node}/wallet/gettransactioninfobyid"))
                .json(&json!({ "value": txid }))
                .send()
                .await
                .map_err(|e| ChainError::Write(format!("{what}: receipt poll: {e}")))?
                .json()
                .await
                .map_err(|e| ChainError::Write(format!("{what}: receipt poll: {e}")))?;
            if info.get("id").is_none() {
                continue; // not yet indexed
            }
            if info.get("result").and_then(Value::as_str) == Some("FAILED") {
                return Err(ChainError::Write(format!(
                    "{what}: transaction {txid} failed on-chain"
                )));
            }
            debug!(txid, "{what} confirmed");
            return Ok(());
        }
        Err(ChainError::Write(format!(
            "{what}: transaction {txid} not confirmed within {}s",
            CONFIRM_POLL_INTERVAL.as_secs() * CONFIRM_MAX_POLLS as u64
        )))
    }
}

fn parse_optional(raw: &str) -> Result<Option<TronAddress>, ChainError> {
    if raw.is_empty() {
        Ok(None)
    } else {
        TronAddress::parse(raw).map(Some)
    }
}

/// Extracts the `index`-th 32-byte word from a hex result blob.
fn decode_word(words: &str, index: usize) -> Result<U256, String> {
    let start = index * 64;
    let end = start + 64;
    if words.len() < end {
        return Err(format!(
            "result has {} hex chars, wanted word {index}",
            words.len()
        ));
    }
    U256::from_str_radix(&words[start..end], 16).map_err(|e| e.to_string())
}

/// Left-pads a u256 amount into a 32-byte ABI word.
fn amount_word(amount: U256) -> String {
    format!("{amount:064x}")
}

#[async_trait]
impl ChainAdapter for TronAdapter {
    fn chain_name(&self) -> &'static str {
        "tron"
    }

    fn is_ready(&self) -> bool {
        self.node_url.is_some() && self.lp.is_some() && self.staking.is_some()
    }

    async fn pool_snapshot(&self) -> Result<PoolSnapshot, ChainError> {
        let (_, lp, staking) = self.read_handles()?;
        let user_word = self.user.abi_word();

        let (lp_balance, pending, user_words, rate, end_time, lp_decimals) = tokio::try_join!(
            self.constant_call_u256(lp, "balanceOf(address)", staking.abi_word()),
            self.constant_call_u256(staking, "pending(address)", user_word.clone()),
            self.constant_call(staking, "users(address)", user_word.clone()),
            self.constant_call_u256(staking, "rewardRatePerSec()", String::new()),
            self.constant_call_u256(staking, "endTime()", String::new()),
            async { Ok::<_, ChainError>(self.lp_decimals().await.unwrap_or(DEFAULT_LP_DECIMALS)) },
        )?;

        let record = UserStakeRecord {
            staked: decode_word(&user_words, 0).map_err(ChainError::Read)?,
            reward_debt: decode_word(&user_words, 1).unwrap_or_default(),
        };

        Ok(PoolSnapshot {
            tvl: from_base_units(lp_balance, lp_decimals),
            staked: from_base_units(record.staked, lp_decimals),
            pending_reward: from_base_units(pending, REWARD_DECIMALS),
            reward_rate_per_sec: from_base_units(rate, REWARD_DECIMALS),
            end_time: end_time.min(U256::from(u64::MAX)).as_u64(),
            lp_decimals,
        })
    }

    async fn lp_decimals(&self) -> Result<u8, ChainError> {
        let (_, lp, _) = self.read_handles()?;
        let key = lp.to_hex();
        Ok(self
            .lp_decimals_cache
            .get_with(key, async move {
                match self.constant_call_u256(lp, "decimals()", String::new()).await {
                    Ok(d) => d.min(U256::from(u8::MAX)).as_u32() as u8,
                    Err(e) => {
                        warn!(error = %e, "decimals() call failed, defaulting to {DEFAULT_LP_DECIMALS}");
                        DEFAULT_LP_DECIMALS
                    }
                }
            })
            .await)
    }

    async fn allowance(&self) -> Result<U256, ChainError> {
        let (_, lp, staking) = self.read_handles()?;
        let (_, owner) = self.signer_handles()?;
        let parameter = format!("{}{}", owner.abi_word(), staking.abi_word());
        self.constant_call_u256(lp, "allowance(address,address)", parameter).await
    }

    async fn approve(&self, amount: U256) -> Result<(), ChainError> {
        let (_, lp, staking) = self.read_handles()?;
        let parameter = format!("{}{}", staking.abi_word(), amount_word(amount));
        self.send_contract_call(lp, "approve(address,uint256)", parameter).await
    }

    async fn deposit(&self, amount: U256) -> Result<(), ChainError> {
        let (_, _, staking) = self.read_handles()?;
        self.send_contract_call(staking, "deposit(uint256)", amount_word(amount)).await
    }

    async fn submit_withdraw(&self, amount: U256) -> Result<(), ChainError> {
        let (_, _, staking) = self.read_handles()?;
        self.send_contract_call(staking, "withdraw(uint256)", amount_word(amount)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base58check_round_trips_to_hex() {
        // Well-known mainnet contract address.
        let addr = TronAddress::parse("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t").unwrap();
        assert_eq!(addr.to_hex(), "41a614f803b6fd780986a42c78ec9c7f77e6ded13c");
        // The hex form parses to the same address.
        let from_hex = TronAddress::parse("41a614f803b6fd780986a42c78ec9c7f77e6ded13c").unwrap();
        assert_eq!(addr, from_hex);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        assert!(TronAddress::parse("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6u").is_err());
        assert!(TronAddress::parse("41a614").is_err());
        assert!(TronAddress::parse("00a614f803b6fd780986a42c78ec9c7f77e6ded13c").is_err());
    }

    #[test]
    fn test_abi_word_is_left_padded_20_byte_body() {
        let addr = TronAddress::parse("41a614f803b6fd780986a42c78ec9c7f77e6ded13c").unwrap();
        let word = addr.abi_word();
        assert_eq!(word.len(), 64);
        assert!(word.starts_with("000000000000000000000000"));
        assert!(word.ends_with("a614f803b6fd780986a42c78ec9c7f77e6ded13c"));
    }

    #[test]
    fn test_amount_word_and_decode_round_trip() {
        let amount = U256::from(1_234_567_890u64);
        let word = amount_word(amount);
        assert_eq!(word.len(), 64);
        assert_eq!(decode_word(&word, 0).unwrap(), amount);

        let two_words = format!("{}{}", amount_word(U256::from(7u8)), amount_word(U256::from(9u8)));
        assert_eq!(decode_word(&two_words, 0).unwrap(), U256::from(7u8));
        assert_eq!(decode_word(&two_words, 1).unwrap(), U256::from(9u8));
        assert!(decode_word(&two_words, 2).is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_adapter_reports_not_ready() {
        let cfg = crate::config::NetworkConfig {
            chain: crate::config::ChainKind::Tron,
            rpc_url: String::new(),
            token: crate::config::ContractRef { address: String::new(), decimals: None },
            lp: crate::config::ContractRef { address: String::new(), decimals: None },
            staking: crate::config::ContractRef { address: String::new(), decimals: None },
            signer_key: None,
            user_address: None,
        };
        let adapter = TronAdapter::new(&cfg).unwrap();
        assert!(!adapter.is_ready());
        match adapter.pool_snapshot().await {
            Err(ChainError::NotReady(_)) => {}
            other => panic!("expected NotReady, got {other:?}"),
        }
    }
}
