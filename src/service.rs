use std::collections::BTreeMap;

use crate::db::types::{SubscriptionKind, SubscriptionRecord};
use crate::watcher::allocator::ChainBatches;
use crate::watcher::batch::{AddOutcome, BatchDeps, RemoveOutcome};
use crate::watcher::error::BatchError;
use crate::watcher::kind::{ApprovalWatch, BalanceWatch, WatchKind};
use crate::watcher::types::BatchStatus;

/// Per-chain batch topology for one subscription kind.
struct KindTopology<K: WatchKind> {
    chains: BTreeMap<u64, ChainBatches<K>>,
}

impl<K: WatchKind> KindTopology<K> {
    /// Load active records for every chain and build started batches.
    /// Chains without a WebSocket endpoint are skipped with a warning.
    async fn boot(chain_ids: &[u64], deps: &BatchDeps) -> eyre::Result<Self> {
        let mut chains = BTreeMap::new();

        for &chain_id in chain_ids {
            let records = deps
                .store
                .list_active(chain_id, K::KIND)
                .await
                .map_err(|e| {
                    eyre::eyre!(
                        "Failed to load {} subscriptions for chain {}: {}",
                        K::KIND.as_str(),
                        chain_id,
                        e
                    )
                })?;

            let subscriptions: Vec<K::Subscription> = records
                .iter()
                .filter_map(|record| match K::from_record(record) {
                    Ok(sub) => Some(sub),
                    Err(e) => {
                        tracing::warn!(
                            chain_id,
                            subscription_id = %record.subscription_id,
                            error = %e,
                            "Skipping invalid subscription record"
                        );
                        None
                    }
                })
                .collect();
            let count = subscriptions.len();

            let batches = match ChainBatches::<K>::build(chain_id, subscriptions, deps.clone()) {
                Ok(batches) => batches,
                Err(BatchError::NoWsEndpoint(_)) => {
                    tracing::warn!(
                        chain_id,
                        kind = K::KIND.as_str(),
                        skipped = count,
                        "No WebSocket endpoint configured, chain not watched"
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            batches.start_all().await;
            tracing::info!(
                chain_id,
                kind = K::KIND.as_str(),
                subscriptions = count,
                batches = batches.batch_count().await,
                "Chain subscriptions started"
            );
            chains.insert(chain_id, batches);
        }

        Ok(Self { chains })
    }

    async fn add(&self, record: &SubscriptionRecord) -> eyre::Result<AddOutcome> {
        let sub = K::from_record(record)?;
        let chain = self
            .chains
            .get(&record.chain_id)
            .ok_or(BatchError::NoWsEndpoint(record.chain_id))?;
        Ok(chain.add(sub).await?)
    }

    async fn remove(&self, chain_id: u64, subscription_id: &str) -> RemoveOutcome {
        match self.chains.get(&chain_id) {
            Some(chain) => chain.remove(subscription_id).await,
            None => RemoveOutcome::NotFound,
        }
    }

    async fn statuses(&self, chain_id: Option<u64>) -> Vec<BatchStatus> {
        let mut statuses = Vec::new();
        for (id, chain) in &self.chains {
            if chain_id.is_some_and(|wanted| wanted != *id) {
                continue;
            }
            statuses.extend(chain.statuses().await);
        }
        statuses
    }

    async fn shutdown(&self) {
        for chain in self.chains.values() {
            chain.stop_all().await;
        }
        for chain in self.chains.values() {
            chain.drain_all().await;
        }
    }
}

/// Owns the balance and approval batch topology of every configured chain.
pub struct SubscriptionService {
    balances: KindTopology<BalanceWatch>,
    approvals: KindTopology<ApprovalWatch>,
}

impl SubscriptionService {
    /// Build and start batches for every chain from the persisted records.
    pub async fn boot(chain_ids: &[u64], deps: BatchDeps) -> eyre::Result<Self> {
        let balances = KindTopology::boot(chain_ids, &deps).await?;
        let approvals = KindTopology::boot(chain_ids, &deps).await?;
        Ok(Self {
            balances,
            approvals,
        })
    }

    /// Start watching a newly created record.
    pub async fn add(&self, record: &SubscriptionRecord) -> eyre::Result<AddOutcome> {
        match record.kind {
            SubscriptionKind::Balance => self.balances.add(record).await,
            SubscriptionKind::Approval => self.approvals.add(record).await,
        }
    }

    pub async fn remove(
        &self,
        kind: SubscriptionKind,
        chain_id: u64,
        subscription_id: &str,
    ) -> RemoveOutcome {
        match kind {
            SubscriptionKind::Balance => self.balances.remove(chain_id, subscription_id).await,
            SubscriptionKind::Approval => self.approvals.remove(chain_id, subscription_id).await,
        }
    }

    pub async fn statuses(&self) -> Vec<BatchStatus> {
        let mut statuses = self.balances.statuses(None).await;
        statuses.extend(self.approvals.statuses(None).await);
        statuses
    }

    pub async fn chain_statuses(&self, chain_id: u64) -> Vec<BatchStatus> {
        let mut statuses = self.balances.statuses(Some(chain_id)).await;
        statuses.extend(self.approvals.statuses(Some(chain_id)).await);
        statuses
    }

    pub fn watches_chain(&self, chain_id: u64) -> bool {
        self.balances.chains.contains_key(&chain_id) || self.approvals.chains.contains_key(&chain_id)
    }

    /// Stop every batch, then wait for in-flight updates to finish.
    pub async fn shutdown(&self) {
        self.balances.shutdown().await;
        self.approvals.shutdown().await;
        tracing::info!("All subscription batches stopped");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::watcher::batch::tests::{deps, DepsHandle};
    use crate::watcher::update::tests::{balance_record, T1, W1};
    use alloy::primitives::{address, Address};

    const W2: Address = address!("00000000000000000000000000000000000000b2");

    fn approval_record(id: i64) -> SubscriptionRecord {
        SubscriptionRecord {
            kind: SubscriptionKind::Approval,
            wallet_address: None,
            owner_address: Some("0x00000000000000000000000000000000000000aa".to_string()),
            spender_address: Some("0x00000000000000000000000000000000000000bb".to_string()),
            ..balance_record(id, T1, W1)
        }
    }

    /// Chain 1 holds two balance records, one invalid record and one
    /// approval; chain 8453 has records but no WebSocket endpoint.
    pub(crate) async fn booted_service() -> (SubscriptionService, DepsHandle) {
        let handle = deps(1000);
        handle.store.insert(balance_record(1, T1, W1)).await;
        handle.store.insert(balance_record(2, T1, W2)).await;
        handle
            .store
            .insert(SubscriptionRecord {
                wallet_address: Some("not-an-address".to_string()),
                ..balance_record(3, T1, W1)
            })
            .await;
        handle.store.insert(approval_record(4)).await;
        handle
            .store
            .insert(SubscriptionRecord {
                chain_id: 8453,
                ..balance_record(5, T1, W1)
            })
            .await;

        let service = SubscriptionService::boot(&[1, 8453], handle.deps.clone())
            .await
            .unwrap();
        (service, handle)
    }

    #[tokio::test]
    async fn test_boot_builds_topology_per_kind() {
        let (service, handle) = booted_service().await;

        let statuses = service.statuses().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].kind, SubscriptionKind::Balance);
        assert_eq!(statuses[0].subscription_count, 2);
        assert_eq!(statuses[1].kind, SubscriptionKind::Approval);
        assert_eq!(statuses[1].subscription_count, 1);
        assert!(statuses.iter().all(|s| s.is_connected));

        assert!(service.watches_chain(1));
        assert!(!service.watches_chain(8453));
        assert!(service.chain_statuses(8453).await.is_empty());
        assert_eq!(handle.transport.subscribe_count(), 2);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_and_remove_by_kind() {
        let (service, _handle) = booted_service().await;

        let new = balance_record(6, address!("00000000000000000000000000000000000000a9"), W1);
        let outcome = service.add(&new).await.unwrap();
        assert_eq!(outcome, AddOutcome::Added { reconnected: true });

        let dup = SubscriptionRecord {
            subscription_id: "sub-7".to_string(),
            ..balance_record(7, T1, W1)
        };
        assert_eq!(service.add(&dup).await.unwrap(), AddOutcome::AlreadyPresent);

        let unwatched = SubscriptionRecord {
            chain_id: 8453,
            ..balance_record(8, T1, W2)
        };
        assert!(service.add(&unwatched).await.is_err());

        let outcome = service.remove(SubscriptionKind::Approval, 1, "sub-4").await;
        assert!(matches!(outcome, RemoveOutcome::Removed { stopped: true, .. }));
        assert_eq!(
            service.remove(SubscriptionKind::Approval, 1, "sub-4").await,
            RemoveOutcome::NotFound
        );
        assert_eq!(service.chain_statuses(1).await.len(), 1);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let (service, _handle) = booted_service().await;

        service.shutdown().await;
        assert!(service.statuses().await.iter().all(|s| !s.is_running));
    }
}
