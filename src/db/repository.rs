use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use super::types::{SubscriptionKind, SubscriptionRecord, SubscriptionState, SubscriptionStatus};

/// Boundary to the persisted subscription records.
///
/// The engine only reads records and rewrites their `state`; creating and
/// soft-deleting subscriptions belongs to the API layer.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> eyre::Result<Option<SubscriptionRecord>>;

    /// Persist a new state. Returns `false` when the write was refused
    /// because the stored `lastEventBlock` is already ahead of `state`, or
    /// the record is gone or deleted.
    async fn update_state(&self, id: i64, state: &SubscriptionState) -> eyre::Result<bool>;

    /// All non-deleted records of one kind on one chain, ordered by id.
    async fn list_active(
        &self,
        chain_id: u64,
        kind: SubscriptionKind,
    ) -> eyre::Result<Vec<SubscriptionRecord>>;
}

type RecordRow = (
    i64,
    String,
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<Json<SubscriptionState>>,
    DateTime<Utc>,
);

const RECORD_COLUMNS: &str = "id, subscription_id, kind, chain_id, token_address, wallet_address, \
     owner_address, spender_address, status, state, updated_at";

fn record_from_row(row: RecordRow) -> eyre::Result<SubscriptionRecord> {
    let (
        id,
        subscription_id,
        kind,
        chain_id,
        token_address,
        wallet_address,
        owner_address,
        spender_address,
        status,
        state,
        updated_at,
    ) = row;

    Ok(SubscriptionRecord {
        id,
        subscription_id,
        kind: kind.parse()?,
        chain_id: chain_id as u64,
        token_address,
        wallet_address,
        owner_address,
        spender_address,
        status: status.parse()?,
        state: state.map(|Json(s)| s),
        updated_at,
    })
}

/// PostgreSQL-backed store over the `erc20_subscriptions` table.
#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn find_by_id(&self, id: i64) -> eyre::Result<Option<SubscriptionRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM erc20_subscriptions WHERE id = $1",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    /// Conditional write: the `WHERE` clause re-checks block monotonicity so
    /// two racing updates for one subscription can never regress it. A state
    /// without a block keeps the stored `lastEventBlock`.
    async fn update_state(&self, id: i64, state: &SubscriptionState) -> eyre::Result<bool> {
        let block = state.last_event_block.map(|b| b as i64);

        let result = sqlx::query(
            "UPDATE erc20_subscriptions
             SET state = CASE
                     WHEN $4::BIGINT IS NULL AND state->>'lastEventBlock' IS NOT NULL
                     THEN jsonb_set($2::jsonb, '{lastEventBlock}', state->'lastEventBlock')
                     ELSE $2::jsonb
                 END,
                 updated_at = $3
             WHERE id = $1
               AND status <> $5
               AND ($4::BIGINT IS NULL
                    OR state IS NULL
                    OR state->>'lastEventBlock' IS NULL
                    OR (state->>'lastEventBlock')::BIGINT <= $4)",
        )
        .bind(id)
        .bind(Json(state))
        .bind(state.last_updated_at)
        .bind(block)
        .bind(SubscriptionStatus::Deleted.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_active(
        &self,
        chain_id: u64,
        kind: SubscriptionKind,
    ) -> eyre::Result<Vec<SubscriptionRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM erc20_subscriptions
             WHERE chain_id = $1 AND kind = $2 AND status <> 'deleted'
             ORDER BY id",
            RECORD_COLUMNS
        ))
        .bind(chain_id as i64)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }
}
