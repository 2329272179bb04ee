use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::repository::SubscriptionStore;
use super::types::{SubscriptionKind, SubscriptionRecord, SubscriptionState, SubscriptionStatus};

/// In-process store keyed by record id. Applies the same conditional-write
/// rules as the PostgreSQL store.
#[derive(Default)]
pub struct MemorySubscriptionStore {
    records: Mutex<BTreeMap<i64, SubscriptionRecord>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: SubscriptionRecord) {
        self.records.lock().await.insert(record.id, record);
    }

    pub async fn set_status(&self, id: i64, status: SubscriptionStatus) -> bool {
        match self.records.lock().await.get_mut(&id) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, id: i64) -> Option<SubscriptionRecord> {
        self.records.lock().await.remove(&id)
    }

    pub async fn state(&self, id: i64) -> Option<SubscriptionState> {
        self.records
            .lock()
            .await
            .get(&id)
            .and_then(|r| r.state.clone())
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn find_by_id(&self, id: i64) -> eyre::Result<Option<SubscriptionRecord>> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn update_state(&self, id: i64, state: &SubscriptionState) -> eyre::Result<bool> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.is_deleted() || state.regresses(record.state.as_ref()) {
            return Ok(false);
        }

        let mut state = state.clone();
        if state.last_event_block.is_none() {
            state.last_event_block = record.last_event_block();
        }
        record.updated_at = state.last_updated_at;
        record.state = Some(state);
        Ok(true)
    }

    async fn list_active(
        &self,
        chain_id: u64,
        kind: SubscriptionKind,
    ) -> eyre::Result<Vec<SubscriptionRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .values()
            .filter(|r| r.chain_id == chain_id && r.kind == kind && !r.is_deleted())
            .cloned()
            .collect())
    }
}
