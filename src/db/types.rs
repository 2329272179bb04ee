use alloy::primitives::{B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The two subscription kinds the engine keeps fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SubscriptionKind {
    #[serde(rename = "erc20-balance")]
    Balance,
    #[serde(rename = "erc20-approval")]
    Approval,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Balance => "erc20-balance",
            Self::Approval => "erc20-approval",
        }
    }
}

impl FromStr for SubscriptionKind {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "erc20-balance" => Ok(Self::Balance),
            "erc20-approval" => Ok(Self::Approval),
            other => Err(eyre::eyre!("Unknown subscription kind '{}'", other)),
        }
    }
}

/// Soft-delete aware record status. Only `Deleted` matters to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Deleted,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "deleted" => Ok(Self::Deleted),
            other => Err(eyre::eyre!("Unknown subscription status '{}'", other)),
        }
    }
}

/// One persisted subscription row as the engine sees it.
///
/// Address columns are kept as the strings the API layer wrote; they are
/// parsed into typed addresses when a batch member is built from the record.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub id: i64,
    pub subscription_id: String,
    pub kind: SubscriptionKind,
    pub chain_id: u64,
    pub token_address: String,
    pub wallet_address: Option<String>,
    pub owner_address: Option<String>,
    pub spender_address: Option<String>,
    pub status: SubscriptionStatus,
    pub state: Option<SubscriptionState>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    pub fn is_deleted(&self) -> bool {
        self.status == SubscriptionStatus::Deleted
    }

    pub fn last_event_block(&self) -> Option<u64> {
        self.state.as_ref().and_then(|s| s.last_event_block)
    }
}

/// Persisted state of a subscription, stored as JSON.
///
/// Exactly one of `balance` / `approval_amount` is set depending on the
/// subscription kind. Amounts are decimal strings of a uint256.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_amount: Option<String>,
    pub last_event_block: Option<u64>,
    pub last_event_tx_hash: Option<String>,
    pub last_updated_at: DateTime<Utc>,
}

impl SubscriptionState {
    pub fn new(
        kind: SubscriptionKind,
        value: U256,
        block_number: Option<u64>,
        tx_hash: Option<B256>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let amount = Some(value.to_string());
        let (balance, approval_amount) = match kind {
            SubscriptionKind::Balance => (amount, None),
            SubscriptionKind::Approval => (None, amount),
        };

        Self {
            balance,
            approval_amount,
            last_event_block: block_number,
            last_event_tx_hash: tx_hash.map(|h| format!("{:#x}", h)),
            last_updated_at: updated_at,
        }
    }

    /// The tracked amount, whichever kind this state belongs to.
    pub fn value(&self) -> Option<U256> {
        self.balance
            .as_deref()
            .or(self.approval_amount.as_deref())
            .and_then(|v| U256::from_str(v).ok())
    }

    /// Whether writing `self` over `stored` would move `lastEventBlock` backwards.
    pub fn regresses(&self, stored: Option<&SubscriptionState>) -> bool {
        match (
            self.last_event_block,
            stored.and_then(|s| s.last_event_block),
        ) {
            (Some(incoming), Some(current)) => incoming < current,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_json_shape() {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let state = SubscriptionState::new(
            SubscriptionKind::Approval,
            U256::from(500u64),
            Some(42),
            Some(B256::repeat_byte(0xab)),
            ts,
        );

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["approvalAmount"], "500");
        assert!(json.get("balance").is_none());
        assert_eq!(json["lastEventBlock"], 42);
        assert_eq!(
            json["lastEventTxHash"],
            format!("0x{}", "ab".repeat(32))
        );

        let back: SubscriptionState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.value(), Some(U256::from(500u64)));
    }

    #[test]
    fn test_regression_check() {
        let ts = Utc::now();
        let stored = SubscriptionState::new(SubscriptionKind::Balance, U256::ZERO, Some(50), None, ts);
        let older = SubscriptionState::new(SubscriptionKind::Balance, U256::ZERO, Some(49), None, ts);
        let same = SubscriptionState::new(SubscriptionKind::Balance, U256::ZERO, Some(50), None, ts);
        let unknown = SubscriptionState::new(SubscriptionKind::Balance, U256::ZERO, None, None, ts);

        assert!(older.regresses(Some(&stored)));
        assert!(!same.regresses(Some(&stored)));
        assert!(!unknown.regresses(Some(&stored)));
        assert!(!older.regresses(None));
    }

    #[test]
    fn test_kind_round_trip_strings() {
        for kind in [SubscriptionKind::Balance, SubscriptionKind::Approval] {
            assert_eq!(kind.as_str().parse::<SubscriptionKind>().unwrap(), kind);
        }
        assert!("erc721-owner".parse::<SubscriptionKind>().is_err());
        assert_eq!(
            "deleted".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Deleted
        );
    }
}
