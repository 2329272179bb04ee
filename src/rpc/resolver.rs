use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ChainConfig;

use super::balance::{BalanceReader, RpcBalanceReader};

/// Resolves per-chain endpoints and read clients.
///
/// Injected into batches and the allocator; lookups may fail per chain
/// without affecting other chains.
pub trait ChainClientResolver: Send + Sync {
    fn ws_url(&self, chain_id: u64) -> Option<String>;

    fn balance_reader(&self, chain_id: u64) -> eyre::Result<Arc<dyn BalanceReader>>;
}

/// Resolver backed by the `[[chains]]` section of the config file.
pub struct ConfigChainResolver {
    chains: HashMap<u64, ChainConfig>,
}

impl ConfigChainResolver {
    pub fn new(chains: &[ChainConfig]) -> Self {
        Self {
            chains: chains.iter().map(|c| (c.chain_id, c.clone())).collect(),
        }
    }
}

impl ChainClientResolver for ConfigChainResolver {
    fn ws_url(&self, chain_id: u64) -> Option<String> {
        self.chains.get(&chain_id).and_then(|c| c.rpc_ws.clone())
    }

    fn balance_reader(&self, chain_id: u64) -> eyre::Result<Arc<dyn BalanceReader>> {
        let chain = self
            .chains
            .get(&chain_id)
            .ok_or_else(|| eyre::eyre!("Chain {} is not configured", chain_id))?;
        let rpc_http = chain
            .rpc_http
            .as_deref()
            .ok_or_else(|| eyre::eyre!("No HTTP RPC URL configured for chain '{}'", chain.name))?;

        Ok(Arc::new(RpcBalanceReader::connect_http(rpc_http)?))
    }
}
