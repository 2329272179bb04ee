use alloy::eips::BlockId;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use async_trait::async_trait;

use crate::watcher::abi::IERC20;

/// Read-only ERC-20 balance lookup against one chain.
#[async_trait]
pub trait BalanceReader: Send + Sync {
    /// `balanceOf(wallet)` on `token`, at `block` when given, latest otherwise.
    async fn balance_of(
        &self,
        token: Address,
        wallet: Address,
        block: Option<u64>,
    ) -> eyre::Result<U256>;
}

/// `BalanceReader` over an alloy HTTP provider.
#[derive(Clone)]
pub struct RpcBalanceReader {
    provider: DynProvider,
}

impl RpcBalanceReader {
    pub fn connect_http(rpc_http: &str) -> eyre::Result<Self> {
        let url = rpc_http
            .parse()
            .map_err(|e| eyre::eyre!("Invalid RPC URL '{}': {}", rpc_http, e))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(Self { provider })
    }
}

#[async_trait]
impl BalanceReader for RpcBalanceReader {
    async fn balance_of(
        &self,
        token: Address,
        wallet: Address,
        block: Option<u64>,
    ) -> eyre::Result<U256> {
        let erc20 = IERC20::new(token, self.provider.clone());
        let call = erc20.balanceOf(wallet);
        let call = match block {
            Some(number) => call.block(BlockId::number(number)),
            None => call,
        };

        call.call()
            .await
            .map_err(|e| eyre::eyre!("balanceOf({:#x}) on {:#x} failed: {}", wallet, token, e))
    }
}
