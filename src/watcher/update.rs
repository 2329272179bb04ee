use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::db::repository::SubscriptionStore;
use crate::db::types::SubscriptionState;
use crate::rpc::balance::BalanceReader;

use super::error::UpdateError;
use super::kind::{Reconcile, WatchKind};
use super::types::{SkipReason, TokenEvent};

/// What a state update needs besides the subscription and the event.
#[derive(Clone)]
pub struct UpdateContext {
    pub chain_id: u64,
    pub store: Arc<dyn SubscriptionStore>,
    pub reader: Option<Arc<dyn BalanceReader>>,
    pub rpc_timeout: Duration,
    pub pin_balance_reads: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied(SubscriptionState),
    Skipped(SkipReason),
}

/// Bring one subscription's persisted state up to date with `event`.
///
/// Order of checks: record exists and is not deleted, the event is not older
/// than the stored `lastEventBlock`, the new value can be obtained. Only then
/// is state written, and the store refuses the write if a concurrent update
/// got further in the meantime.
pub async fn apply_event<K: WatchKind>(
    ctx: &UpdateContext,
    sub: &K::Subscription,
    event: &TokenEvent,
) -> Result<UpdateOutcome, UpdateError> {
    let id = K::record_id(sub);

    let record = ctx.store.find_by_id(id).await.map_err(UpdateError::Store)?;
    let Some(record) = record else {
        return Ok(UpdateOutcome::Skipped(SkipReason::RecordMissing));
    };
    if record.is_deleted() {
        return Ok(UpdateOutcome::Skipped(SkipReason::RecordDeleted));
    }

    if let (Some(stored), Some(incoming)) = (record.last_event_block(), event.block_number) {
        if incoming < stored {
            return Ok(UpdateOutcome::Skipped(SkipReason::StaleBlock));
        }
    }

    let value = match K::reconcile(sub, event) {
        Reconcile::FromEvent(value) => value,
        Reconcile::ReadBalance { token, wallet } => {
            let reader = ctx
                .reader
                .as_ref()
                .ok_or(UpdateError::NoReadClient(ctx.chain_id))?;
            let block = if ctx.pin_balance_reads {
                event.block_number
            } else {
                None
            };

            tokio::time::timeout(ctx.rpc_timeout, reader.balance_of(token, wallet, block))
                .await
                .map_err(|_| UpdateError::ReadTimeout(ctx.rpc_timeout))?
                .map_err(UpdateError::Read)?
        }
    };

    // A log without a block number must not clear the stored high-water mark.
    let block_number = event.block_number.or(record.last_event_block());
    let state = SubscriptionState::new(
        K::KIND,
        value,
        block_number,
        event.tx_hash,
        Utc::now(),
    );

    let written = ctx
        .store
        .update_state(id, &state)
        .await
        .map_err(UpdateError::Store)?;
    if !written {
        // Lost a race with a newer event, or the record was deleted meanwhile.
        return Ok(UpdateOutcome::Skipped(SkipReason::StaleBlock));
    }

    Ok(UpdateOutcome::Applied(state))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::memory::MemorySubscriptionStore;
    use crate::db::types::{SubscriptionKind, SubscriptionRecord, SubscriptionStatus};
    use crate::watcher::kind::{
        ApprovalSubscription, ApprovalWatch, BalanceSubscription, BalanceWatch,
    };
    use alloy::primitives::{address, Address, B256, U256};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reader returning a fixed balance, failing, or hanging.
    pub(crate) enum ScriptedReader {
        Balance(U256, AtomicUsize),
        Fail,
        Hang,
    }

    impl ScriptedReader {
        pub(crate) fn balance(value: u64) -> Self {
            Self::Balance(U256::from(value), AtomicUsize::new(0))
        }

        pub(crate) fn calls(&self) -> usize {
            match self {
                Self::Balance(_, calls) => calls.load(Ordering::SeqCst),
                _ => 0,
            }
        }
    }

    #[async_trait]
    impl BalanceReader for ScriptedReader {
        async fn balance_of(
            &self,
            _token: Address,
            _wallet: Address,
            _block: Option<u64>,
        ) -> eyre::Result<U256> {
            match self {
                Self::Balance(value, calls) => {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(*value)
                }
                Self::Fail => Err(eyre::eyre!("upstream returned 503")),
                Self::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(U256::ZERO)
                }
            }
        }
    }

    pub(crate) const T1: Address = address!("00000000000000000000000000000000000000a1");
    pub(crate) const W1: Address = address!("00000000000000000000000000000000000000b1");
    pub(crate) const Z: Address = address!("00000000000000000000000000000000000000ff");

    pub(crate) fn balance_record(id: i64, token: Address, wallet: Address) -> SubscriptionRecord {
        SubscriptionRecord {
            id,
            subscription_id: format!("sub-{}", id),
            kind: SubscriptionKind::Balance,
            chain_id: 1,
            token_address: format!("{:#x}", token),
            wallet_address: Some(format!("{:#x}", wallet)),
            owner_address: None,
            spender_address: None,
            status: SubscriptionStatus::Active,
            state: None,
            updated_at: Utc::now(),
        }
    }

    fn context(store: Arc<MemorySubscriptionStore>, reader: Option<ScriptedReader>) -> UpdateContext {
        UpdateContext {
            chain_id: 1,
            store,
            reader: reader.map(|r| Arc::new(r) as Arc<dyn BalanceReader>),
            rpc_timeout: Duration::from_millis(100),
            pin_balance_reads: false,
        }
    }

    fn transfer(block: u64) -> TokenEvent {
        TokenEvent {
            token: T1,
            first: W1,
            second: Z,
            value: U256::from(100u64),
            block_number: Some(block),
            tx_hash: Some(B256::with_last_byte(block as u8)),
            log_index: Some(0),
        }
    }

    fn balance_sub() -> BalanceSubscription {
        BalanceSubscription {
            id: 1,
            subscription_id: "sub-1".to_string(),
            token_address: T1,
            wallet_address: W1,
        }
    }

    #[tokio::test]
    async fn test_balance_update_reads_chain() {
        let store = Arc::new(MemorySubscriptionStore::new());
        store.insert(balance_record(1, T1, W1)).await;
        let ctx = context(store.clone(), Some(ScriptedReader::balance(900)));

        let outcome = apply_event::<BalanceWatch>(&ctx, &balance_sub(), &transfer(50))
            .await
            .unwrap();
        assert!(matches!(outcome, UpdateOutcome::Applied(_)));

        let state = store.state(1).await.unwrap();
        assert_eq!(state.balance.as_deref(), Some("900"));
        assert_eq!(state.last_event_block, Some(50));
    }

    #[tokio::test]
    async fn test_older_block_leaves_state_untouched() {
        let store = Arc::new(MemorySubscriptionStore::new());
        store.insert(balance_record(1, T1, W1)).await;
        let ctx = context(store.clone(), Some(ScriptedReader::balance(900)));

        apply_event::<BalanceWatch>(&ctx, &balance_sub(), &transfer(50))
            .await
            .unwrap();
        let before = serde_json::to_vec(&store.state(1).await.unwrap()).unwrap();

        let outcome = apply_event::<BalanceWatch>(&ctx, &balance_sub(), &transfer(49))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Skipped(SkipReason::StaleBlock));

        let after = serde_json::to_vec(&store.state(1).await.unwrap()).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_blockless_event_keeps_high_water_mark() {
        let store = Arc::new(MemorySubscriptionStore::new());
        store.insert(balance_record(1, T1, W1)).await;
        let ctx = context(store.clone(), Some(ScriptedReader::balance(900)));

        apply_event::<BalanceWatch>(&ctx, &balance_sub(), &transfer(50))
            .await
            .unwrap();

        let pending = TokenEvent {
            block_number: None,
            ..transfer(50)
        };
        let outcome = apply_event::<BalanceWatch>(&ctx, &balance_sub(), &pending)
            .await
            .unwrap();
        let UpdateOutcome::Applied(state) = outcome else {
            panic!("expected the update to apply, got {:?}", outcome);
        };
        assert_eq!(state.last_event_block, Some(50));
        assert_eq!(store.state(1).await.unwrap().last_event_block, Some(50));

        let outcome = apply_event::<BalanceWatch>(&ctx, &balance_sub(), &transfer(49))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Skipped(SkipReason::StaleBlock));
        assert_eq!(store.state(1).await.unwrap().last_event_block, Some(50));
    }

    #[tokio::test]
    async fn test_stale_event_skips_rpc_read() {
        let store = Arc::new(MemorySubscriptionStore::new());
        store.insert(balance_record(1, T1, W1)).await;
        let reader = Arc::new(ScriptedReader::balance(900));
        let ctx = UpdateContext {
            reader: Some(reader.clone() as Arc<dyn BalanceReader>),
            ..context(store.clone(), None)
        };

        apply_event::<BalanceWatch>(&ctx, &balance_sub(), &transfer(50))
            .await
            .unwrap();
        apply_event::<BalanceWatch>(&ctx, &balance_sub(), &transfer(10))
            .await
            .unwrap();
        assert_eq!(reader.calls(), 1);
    }

    #[tokio::test]
    async fn test_deleted_and_missing_records_are_skipped() {
        let store = Arc::new(MemorySubscriptionStore::new());
        store.insert(balance_record(1, T1, W1)).await;
        store.set_status(1, SubscriptionStatus::Deleted).await;
        let ctx = context(store.clone(), Some(ScriptedReader::balance(900)));

        let outcome = apply_event::<BalanceWatch>(&ctx, &balance_sub(), &transfer(50))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Skipped(SkipReason::RecordDeleted));

        store.remove(1).await;
        let outcome = apply_event::<BalanceWatch>(&ctx, &balance_sub(), &transfer(50))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Skipped(SkipReason::RecordMissing));
    }

    #[tokio::test]
    async fn test_read_failures_do_not_touch_state() {
        let store = Arc::new(MemorySubscriptionStore::new());
        store.insert(balance_record(1, T1, W1)).await;

        let failing = context(store.clone(), Some(ScriptedReader::Fail));
        let err = apply_event::<BalanceWatch>(&failing, &balance_sub(), &transfer(50))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Read(_)));

        let hanging = context(store.clone(), Some(ScriptedReader::Hang));
        let err = apply_event::<BalanceWatch>(&hanging, &balance_sub(), &transfer(50))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::ReadTimeout(_)));

        let no_reader = context(store.clone(), None);
        let err = apply_event::<BalanceWatch>(&no_reader, &balance_sub(), &transfer(50))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::NoReadClient(1)));

        assert!(store.state(1).await.is_none());
    }

    #[tokio::test]
    async fn test_approval_value_comes_from_event() {
        let owner = address!("00000000000000000000000000000000000000aa");
        let spender = address!("00000000000000000000000000000000000000bb");
        let store = Arc::new(MemorySubscriptionStore::new());
        store
            .insert(SubscriptionRecord {
                kind: SubscriptionKind::Approval,
                wallet_address: None,
                owner_address: Some(format!("{:#x}", owner)),
                spender_address: Some(format!("{:#x}", spender)),
                ..balance_record(2, T1, W1)
            })
            .await;
        let ctx = context(store.clone(), None);

        let sub = ApprovalSubscription {
            id: 2,
            subscription_id: "sub-2".to_string(),
            token_address: T1,
            owner_address: owner,
            spender_address: spender,
        };
        let event = TokenEvent {
            first: owner,
            second: spender,
            value: U256::from(500u64),
            ..transfer(70)
        };

        apply_event::<ApprovalWatch>(&ctx, &sub, &event).await.unwrap();
        let state = store.state(2).await.unwrap();
        assert_eq!(state.approval_amount.as_deref(), Some("500"));
        assert!(state.balance.is_none());
        assert_eq!(state.last_event_block, Some(70));
    }
}
