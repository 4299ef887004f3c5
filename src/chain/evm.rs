//! EVM adapter: `ethers` provider + typed contract bindings.
//!
//! Reads go through a plain `Provider<Http>`; writes require a configured
//! signer key and are awaited to receipt before returning. All six pool
//! reads within one snapshot run concurrently so refresh latency is bound
//! by the slowest single call rather than their sum.

use crate::chain::{
    from_base_units, ChainAdapter, PoolSnapshot, UserStakeRecord, DEFAULT_LP_DECIMALS,
    REWARD_DECIMALS,
};
use crate::config::NetworkConfig;
use crate::errors::ChainError;
use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, TransactionReceipt, U256, U64},
};
use moka::future::Cache;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// Minimal ABI surfaces for the two contracts the position touches.
ethers::contract::abigen!(
    Erc20Token,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
        function decimals() external view returns (uint8)
    ]"#,
);

ethers::contract::abigen!(
    LpStaking,
    r#"[
        function deposit(uint256 amount) external
        function withdraw(uint256 amount) external
        function pending(address u) external view returns (uint256)
        function users(address u) external view returns (uint256 staked, uint256 rewardDebt)
        function endTime() external view returns (uint256)
        function rewardRatePerSec() external view returns (uint256)
    ]"#,
);

type WriteClient = SignerMiddleware<Arc<Provider<Http>>, LocalWallet>;

pub struct EvmAdapter {
    provider: Option<Arc<Provider<Http>>>,
    write_client: Option<Arc<WriteClient>>,
    lp_address: Option<Address>,
    staking_address: Option<Address>,
    /// Address whose stake record is observed: the configured observer, the
    /// signer, or the zero address in that order.
    user: Address,
    lp_decimals_cache: Cache<Address, u8>,
}

impl std::fmt::Debug for EvmAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmAdapter")
            .field("lp_address", &self.lp_address)
            .field("staking_address", &self.staking_address)
            .field("user", &self.user)
            .field("can_write", &self.write_client.is_some())
            .finish()
    }
}

impl EvmAdapter {
    /// Builds the adapter from a network profile. Missing addresses or RPC
    /// endpoint leave the adapter constructed but not ready; a configured
    /// signer key requires a reachable endpoint (the chain id is fetched to
    /// bind the wallet).
    pub async fn connect(cfg: &NetworkConfig) -> Result<Self, ChainError> {
        let provider = if cfg.rpc_url.is_empty() {
            None
        } else {
            let p = Provider::<Http>::try_from(cfg.rpc_url.as_str())
                .map_err(|e| ChainError::Provider(format!("invalid EVM RPC url: {e}")))?
                .interval(Duration::from_millis(500));
            Some(Arc::new(p))
        };

        let lp_address = parse_address(&cfg.lp.address)?;
        let staking_address = parse_address(&cfg.staking.address)?;

        let wallet = match &cfg.signer_key {
            Some(key) => {
                let provider = provider.clone().ok_or_else(|| {
                    ChainError::NotReady("signer configured without an RPC endpoint".into())
                })?;
                let chain_id = provider
                    .get_chainid()
                    .await
                    .map_err(|e| ChainError::Provider(format!("chain id lookup failed: {e}")))?;
                let wallet = LocalWallet::from_str(key)
                    .map_err(|e| ChainError::Wallet(format!("invalid EVM signer key: {e}")))?
                    .with_chain_id(chain_id.as_u64());
                Some(wallet)
            }
            None => None,
        };

        let user = match &cfg.user_address {
            Some(addr) => parse_address(addr)?.ok_or_else(|| {
                ChainError::DataEncoding("user_address resolved to empty".into())
            })?,
            None => wallet
                .as_ref()
                .map(|w| w.address())
                .unwrap_or_else(Address::zero),
        };

        let write_client = match (wallet, provider.clone()) {
            (Some(w), Some(p)) => Some(Arc::new(SignerMiddleware::new(p, w))),
            _ => None,
        };

        Ok(Self {
            provider,
            write_client,
            lp_address,
            staking_address,
            user,
            // Decimals are effectively static per deployment; a short TTL
            // still honors "resolved per refresh cycle, not assumed constant".
            lp_decimals_cache: Cache::builder()
                .time_to_live(Duration::from_secs(60))
                .max_capacity(4)
                .build(),
        })
    }

    fn read_handles(&self) -> Result<(Arc<Provider<Http>>, Address, Address), ChainError> {
        let provider = self
            .provider
            .clone()
            .ok_or_else(|| ChainError::NotReady("no EVM RPC endpoint configured".into()))?;
        let lp = self
            .lp_address
            .ok_or_else(|| ChainError::NotReady("LP token address not configured".into()))?;
        let staking = self
            .staking_address
            .ok_or_else(|| ChainError::NotReady("staking contract address not configured".into()))?;
        Ok((provider, lp, staking))
    }

    fn write_handles(&self) -> Result<(Arc<WriteClient>, Address, Address), ChainError> {
        let client = self
            .write_client
            .clone()
            .ok_or_else(|| ChainError::NotReady("no EVM signer configured".into()))?;
        let lp = self
            .lp_address
            .ok_or_else(|| ChainError::NotReady("LP token address not configured".into()))?;
        let staking = self
            .staking_address
            .ok_or_else(|| ChainError::NotReady("staking contract address not configured".into()))?;
        Ok((client, lp, staking))
    }

    async fn await_receipt(
        &self,
        pending: ethers::providers::PendingTransaction<'_, Http>,
        what: &str,
    ) -> Result<(), ChainError> {
        let receipt: Option<TransactionReceipt> = pending
            .await
            .map_err(|e| ChainError::Write(format!("{what}: {e}")))?;
        let receipt = receipt
            .ok_or_else(|| ChainError::Write(format!("{what}: transaction dropped from mempool")))?;
        if receipt.status != Some(U64::one()) {
            return Err(ChainError::Write(format!(
                "{what}: transaction {:?} reverted",
                receipt.transaction_hash
            )));
        }
        debug!(tx = ?receipt.transaction_hash, "{what} confirmed");
        Ok(())
    }
}

fn parse_address(raw: &str) -> Result<Option<Address>, ChainError> {
    if raw.is_empty() {
        return Ok(None);
    }
    Address::from_str(raw)
        .map(Some)
        .map_err(|e| ChainError::DataEncoding(format!("invalid EVM address '{raw}': {e}")))
}

fn read_err(e: impl std::fmt::Display) -> ChainError {
    ChainError::Read(e.to_string())
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain_name(&self) -> &'static str {
        "evm"
    }

    fn is_ready(&self) -> bool {
        self.provider.is_some() && self.lp_address.is_some() && self.staking_address.is_some()
    }

    async fn pool_snapshot(&self) -> Result<PoolSnapshot, ChainError> {
        let (provider, lp_addr, staking_addr) = self.read_handles()?;
        let lp = Erc20Token::new(lp_addr, provider.clone());
        let staking = LpStaking::new(staking_addr, provider);

        let (lp_balance, pending, (staked, reward_debt), rate, end_time, lp_decimals) = tokio::try_join!(
            async { lp.balance_of(staking_addr).call().await.map_err(read_err) },
            async { staking.pending(self.user).call().await.map_err(read_err) },
            async { staking.users(self.user).call().await.map_err(read_err) },
            async { staking.reward_rate_per_sec().call().await.map_err(read_err) },
            async { staking.end_time().call().await.map_err(read_err) },
            async { Ok::<_, ChainError>(self.lp_decimals().await.unwrap_or(DEFAULT_LP_DECIMALS)) },
        )?;

        let record = UserStakeRecord { staked, reward_debt };

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
        let (provider, lp_addr, _) = self.read_handles()?;
        Ok(self
            .lp_decimals_cache
            .get_with(lp_addr, async move {
                let lp = Erc20Token::new(lp_addr, provider);
                match lp.decimals().call().await {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(error = %e, "decimals() call failed, defaulting to {DEFAULT_LP_DECIMALS}");
                        DEFAULT_LP_DECIMALS
                    }
                }
            })
            .await)
    }

    async fn allowance(&self) -> Result<U256, ChainError> {
        let (client, lp_addr, staking_addr) = self.write_handles()?;
        let owner = client.signer().address();
        let lp = Erc20Token::new(lp_addr, client);
        lp.allowance(owner, staking_addr).call().await.map_err(read_err)
    }

    async fn approve(&self, amount: U256) -> Result<(), ChainError> {
        let (client, lp_addr, staking_addr) = self.write_handles()?;
        let lp = Erc20Token::new(lp_addr, client);
        let call = lp.approve(staking_addr, amount);
        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Write(format!("approve: {e}")))?;
        self.await_receipt(pending, "approve").await
    }

    async fn deposit(&self, amount: U256) -> Result<(), ChainError> {
        let (client, _, staking_addr) = self.write_handles()?;
        let staking = LpStaking::new(staking_addr, client);
        let call = staking.deposit(amount);
        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Write(format!("deposit: {e}")))?;
        self.await_receipt(pending, "deposit").await
    }

    async fn submit_withdraw(&self, amount: U256) -> Result<(), ChainError> {
        let (client, _, staking_addr) = self.write_handles()?;
        let staking = LpStaking::new(staking_addr, client);
        let call = staking.withdraw(amount);
        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Write(format!("withdraw: {e}")))?;
        self.await_receipt(pending, "withdraw").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainKind, ContractRef};

    fn contract(addr: &str) -> ContractRef {
        ContractRef { address: addr.to_string(), decimals: None }
    }

    fn profile(lp: &str, staking: &str, rpc: &str) -> NetworkConfig {
        NetworkConfig {
            chain: ChainKind::Evm,
            rpc_url: rpc.to_string(),
            token: contract("0x0000000000000000000000000000000000000001"),
            lp: contract(lp),
            staking: contract(staking),
            signer_key: None,
            user_address: None,
        }
    }

    #[tokio::test]
    async fn test_unresolved_addresses_leave_adapter_not_ready() {
        let cfg = profile("", "", "http://localhost:8545");
        let adapter = EvmAdapter::connect(&cfg).await.unwrap();
        assert!(!adapter.is_ready());
        match adapter.pool_snapshot().await {
            Err(ChainError::NotReady(_)) => {}
            other => panic!("expected NotReady, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_write_without_signer_is_not_ready() {
        let cfg = profile(
            "0x0000000000000000000000000000000000000002",
            "0x0000000000000000000000000000000000000003",
            "http://localhost:8545",
        );
        let adapter = EvmAdapter::connect(&cfg).await.unwrap();
        assert!(adapter.is_ready());
        // Reads are ready, writes are not: no signer key was configured.
        match adapter.allowance().await {
            Err(ChainError::NotReady(_)) => {}
            other => panic!("expected NotReady, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_address_is_a_config_error() {
        assert!(parse_address("not-an-address").is_err());
        assert!(parse_address("").unwrap().is_none());
        assert!(parse_address("0x0000000000000000000000000000000000000005").unwrap().is_some());
    }
}
