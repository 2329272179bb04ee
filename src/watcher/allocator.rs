use std::marker::PhantomData;
use tokio::sync::Mutex;

use super::batch::{AddOutcome, BatchDeps, RemoveOutcome, SubscriptionBatch};
use super::error::BatchError;
use super::kind::WatchKind;
use super::types::BatchStatus;

/// Splits a chain's subscriptions into batches that respect the address cap.
pub struct BatchAllocator<K: WatchKind> {
    deps: BatchDeps,
    _kind: PhantomData<K>,
}

impl<K: WatchKind> BatchAllocator<K> {
    pub fn new(deps: BatchDeps) -> Self {
        Self {
            deps,
            _kind: PhantomData,
        }
    }

    /// Fixed-size chunking in input order; batch index = chunk position.
    /// Batches are returned unstarted.
    pub fn allocate(
        &self,
        chain_id: u64,
        subscriptions: Vec<K::Subscription>,
    ) -> Result<Vec<SubscriptionBatch<K>>, BatchError> {
        let ws_url = self
            .deps
            .resolver
            .ws_url(chain_id)
            .ok_or(BatchError::NoWsEndpoint(chain_id))?;

        subscriptions
            .chunks(self.deps.cap())
            .enumerate()
            .map(|(index, chunk)| {
                SubscriptionBatch::new(
                    chain_id,
                    ws_url.clone(),
                    index,
                    chunk.to_vec(),
                    self.deps.clone(),
                )
            })
            .collect()
    }
}

/// Runtime owner of one chain's batches of one kind.
///
/// Supports single-subscription add/remove; it never moves subscriptions
/// between existing batches.
pub struct ChainBatches<K: WatchKind> {
    chain_id: u64,
    ws_url: String,
    deps: BatchDeps,
    batches: Mutex<Vec<SubscriptionBatch<K>>>,
    next_index: Mutex<usize>,
}

impl<K: WatchKind> ChainBatches<K> {
    /// Allocate `subscriptions` into batches (not started).
    pub fn build(
        chain_id: u64,
        subscriptions: Vec<K::Subscription>,
        deps: BatchDeps,
    ) -> Result<Self, BatchError> {
        let ws_url = deps
            .resolver
            .ws_url(chain_id)
            .ok_or(BatchError::NoWsEndpoint(chain_id))?;
        let batches = BatchAllocator::<K>::new(deps.clone()).allocate(chain_id, subscriptions)?;
        let next_index = batches.len();

        Ok(Self {
            chain_id,
            ws_url,
            deps,
            batches: Mutex::new(batches),
            next_index: Mutex::new(next_index),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub async fn start_all(&self) {
        let batches = self.batches.lock().await.clone();
        for batch in batches {
            batch.start().await;
        }
    }

    pub async fn stop_all(&self) {
        let batches = self.batches.lock().await.clone();
        for batch in batches {
            batch.stop().await;
        }
    }

    pub async fn drain_all(&self) {
        let batches = self.batches.lock().await.clone();
        for batch in batches {
            batch.drain().await;
        }
    }

    pub async fn batch_count(&self) -> usize {
        self.batches.lock().await.len()
    }

    pub async fn statuses(&self) -> Vec<BatchStatus> {
        let batches = self.batches.lock().await.clone();
        let mut statuses = Vec::with_capacity(batches.len());
        for batch in batches {
            statuses.push(batch.status().await);
        }
        statuses
    }

    /// Place a subscription in the first batch with room, opening a new
    /// started batch when every existing one is full.
    pub async fn add(&self, sub: K::Subscription) -> Result<AddOutcome, BatchError> {
        let mut batches = self.batches.lock().await;

        for batch in batches.iter() {
            if batch.contains(&sub).await {
                return Ok(AddOutcome::AlreadyPresent);
            }
        }

        for batch in batches.iter() {
            if !batch.is_running() {
                continue;
            }
            match batch.add_member(sub.clone()).await {
                Err(BatchError::Full { .. }) => continue,
                result => return result,
            }
        }

        let index = {
            let mut next = self.next_index.lock().await;
            let index = *next;
            *next += 1;
            index
        };
        let batch = SubscriptionBatch::new(
            self.chain_id,
            self.ws_url.clone(),
            index,
            vec![sub],
            self.deps.clone(),
        )?;
        tracing::info!(
            chain_id = self.chain_id,
            batch = index,
            kind = K::KIND.as_str(),
            "Opening new subscription batch"
        );
        batch.start().await;
        batches.push(batch);

        Ok(AddOutcome::Added { reconnected: false })
    }

    /// Remove a subscription wherever it lives; batches that stopped because
    /// they emptied are dropped.
    pub async fn remove(&self, subscription_id: &str) -> RemoveOutcome {
        let mut batches = self.batches.lock().await;

        let mut owner = None;
        for (position, batch) in batches.iter().enumerate() {
            if batch.contains_id(subscription_id).await {
                owner = Some(position);
                break;
            }
        }
        let Some(position) = owner else {
            return RemoveOutcome::NotFound;
        };

        let outcome = batches[position].remove_member(subscription_id).await;
        if let RemoveOutcome::Removed { stopped: true, .. } = outcome {
            batches.remove(position);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::batch::tests::{balance_sub, deps, DepsHandle};
    use crate::watcher::kind::BalanceWatch;
    use alloy::primitives::Address;

    fn token(n: u64) -> Address {
        Address::left_padding_from(&n.to_be_bytes())
    }

    #[tokio::test]
    async fn test_allocate_chunks_in_input_order() {
        let DepsHandle { deps, .. } = deps(1000);
        let subs: Vec<_> = (0..2500)
            .map(|i| balance_sub(i, token(i as u64 % 7 + 1), token(10_000 + i as u64)))
            .collect();

        let batches = BatchAllocator::<BalanceWatch>::new(deps)
            .allocate(1, subs)
            .unwrap();

        assert_eq!(batches.len(), 3);
        let mut sizes = Vec::new();
        for (i, batch) in batches.iter().enumerate() {
            assert_eq!(batch.batch_index(), i);
            assert!(!batch.is_running());
            sizes.push(batch.subscription_count().await);
        }
        assert_eq!(sizes, vec![1000, 1000, 500]);

        assert!(batches[0].contains_id("sub-0").await);
        assert!(batches[0].contains_id("sub-999").await);
        assert!(batches[1].contains_id("sub-1000").await);
        assert!(batches[2].contains_id("sub-2499").await);
    }

    #[tokio::test]
    async fn test_zero_cap_allocates_one_per_batch() {
        let DepsHandle { deps, .. } = deps(0);
        let subs = (0..3)
            .map(|i| balance_sub(i, token(1), token(100 + i as u64)))
            .collect();

        let batches = BatchAllocator::<BalanceWatch>::new(deps)
            .allocate(1, subs)
            .unwrap();
        assert_eq!(batches.len(), 3);
        for batch in &batches {
            assert_eq!(batch.subscription_count().await, 1);
        }
    }

    #[tokio::test]
    async fn test_allocate_unknown_chain() {
        let DepsHandle { deps, .. } = deps(1000);
        let result = BatchAllocator::<BalanceWatch>::new(deps).allocate(999, vec![]);
        assert!(matches!(result, Err(BatchError::NoWsEndpoint(999))));
    }

    #[tokio::test]
    async fn test_chain_batches_spill_into_new_batch() {
        let DepsHandle { deps, transport, .. } = deps(2);
        let subs = vec![
            balance_sub(1, token(1), token(101)),
            balance_sub(2, token(1), token(102)),
        ];
        let chain = ChainBatches::<BalanceWatch>::build(1, subs, deps).unwrap();
        chain.start_all().await;
        assert_eq!(chain.batch_count().await, 1);

        let dup = chain.add(balance_sub(9, token(1), token(101))).await.unwrap();
        assert_eq!(dup, AddOutcome::AlreadyPresent);

        chain.add(balance_sub(3, token(2), token(103))).await.unwrap();
        assert_eq!(chain.batch_count().await, 2);
        let statuses = chain.statuses().await;
        assert_eq!(statuses[1].batch_index, 1);
        assert!(statuses[1].is_running);
        assert_eq!(transport.subscribe_count(), 2);

        // Emptying the second batch stops and drops it.
        let outcome = chain.remove("sub-3").await;
        assert!(matches!(outcome, RemoveOutcome::Removed { stopped: true, .. }));
        assert_eq!(chain.batch_count().await, 1);
        assert_eq!(chain.remove("sub-3").await, RemoveOutcome::NotFound);

        chain.stop_all().await;
    }
}
