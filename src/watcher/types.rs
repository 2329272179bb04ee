use alloy::primitives::{Address, B256, U256};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::db::types::SubscriptionKind;

/// A `Transfer` or `Approval` log reduced to what matching needs.
///
/// `first`/`second` are the two indexed addresses: `(from, to)` for
/// transfers, `(owner, spender)` for approvals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEvent {
    pub token: Address,
    pub first: Address,
    pub second: Address,
    pub value: U256,
    pub block_number: Option<u64>,
    pub tx_hash: Option<B256>,
    pub log_index: Option<u64>,
}

/// Connection lifecycle of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Why an update finished without writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    RecordMissing,
    RecordDeleted,
    StaleBlock,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordMissing => "record_missing",
            Self::RecordDeleted => "record_deleted",
            Self::StaleBlock => "stale_block",
        }
    }
}

/// Diagnostic events broadcast by a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    MemberAdded {
        subscription_id: String,
        token: Address,
        reconnect: bool,
    },
    MemberRemoved {
        subscription_id: String,
        token_dropped: bool,
    },
    Connected,
    Disconnected {
        reason: String,
    },
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
    },
    ReconnectExhausted {
        attempts: u32,
    },
    Stopped,
    ReorgDiscarded {
        token: Address,
        tx_hash: Option<B256>,
    },
    StateUpdated {
        subscription_id: String,
        value: U256,
        block_number: Option<u64>,
    },
    UpdateSkipped {
        subscription_id: String,
        reason: SkipReason,
    },
    UpdateFailed {
        subscription_id: String,
        error: String,
    },
}

/// Running totals of update outcomes for one batch.
#[derive(Debug, Default)]
pub struct UpdateCounters {
    applied: AtomicU64,
    skipped: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
    reorged: AtomicU64,
}

impl UpdateCounters {
    pub fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self, reason: SkipReason) {
        match reason {
            SkipReason::StaleBlock => self.stale.fetch_add(1, Ordering::Relaxed),
            SkipReason::RecordMissing | SkipReason::RecordDeleted => {
                self.skipped.fetch_add(1, Ordering::Relaxed)
            }
        };
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reorg(&self) {
        self.reorged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UpdateStats {
        UpdateStats {
            applied: self.applied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            reorged: self.reorged.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateStats {
    pub applied: u64,
    pub skipped: u64,
    pub stale: u64,
    pub failed: u64,
    pub reorged: u64,
}

/// Point-in-time view of a batch, for the status API and logs.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub kind: SubscriptionKind,
    pub chain_id: u64,
    pub batch_index: usize,
    pub token_count: usize,
    pub subscription_count: usize,
    pub is_connected: bool,
    pub is_running: bool,
    pub connection: ConnectionState,
    pub reconnect_attempts: u32,
    pub updates: UpdateStats,
}
