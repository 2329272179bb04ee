use alloy::primitives::{Address, U256};
use std::fmt::Debug;
use std::str::FromStr;

use crate::db::types::{SubscriptionKind, SubscriptionRecord};

use super::abi::{EventTopic, APPROVAL, TRANSFER};
use super::types::TokenEvent;

/// How the new state value of a matched subscription is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// The event carries the resulting value.
    FromEvent(U256),
    /// The event only signals a change; read `balanceOf(wallet)` on `token`.
    ReadBalance { token: Address, wallet: Address },
}

/// Everything that differs between the balance and approval engines.
pub trait WatchKind: Send + Sync + 'static {
    type Subscription: Clone + Debug + Send + Sync + 'static;

    const KIND: SubscriptionKind;
    const EVENT: EventTopic;
    /// Whether updates need a `balanceOf` read client for the chain.
    const READS_BALANCE: bool;

    fn record_id(sub: &Self::Subscription) -> i64;
    fn subscription_id(sub: &Self::Subscription) -> &str;
    fn token(sub: &Self::Subscription) -> Address;

    /// Same (token, counterparties) combination.
    fn same_target(a: &Self::Subscription, b: &Self::Subscription) -> bool;

    /// Whether `event` concerns `sub`. The token has already been matched.
    fn matches(sub: &Self::Subscription, event: &TokenEvent) -> bool;

    fn reconcile(sub: &Self::Subscription, event: &TokenEvent) -> Reconcile;

    fn from_record(record: &SubscriptionRecord) -> eyre::Result<Self::Subscription>;
}

/// A watched (token, wallet) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSubscription {
    pub id: i64,
    pub subscription_id: String,
    pub token_address: Address,
    pub wallet_address: Address,
}

/// A watched (token, owner, spender) triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalSubscription {
    pub id: i64,
    pub subscription_id: String,
    pub token_address: Address,
    pub owner_address: Address,
    pub spender_address: Address,
}

pub struct BalanceWatch;

pub struct ApprovalWatch;

fn parse_address(record: &SubscriptionRecord, field: &str, value: Option<&str>) -> eyre::Result<Address> {
    let value = value.ok_or_else(|| {
        eyre::eyre!(
            "Subscription '{}' has no {}",
            record.subscription_id,
            field
        )
    })?;
    Address::from_str(value.trim()).map_err(|e| {
        eyre::eyre!(
            "Subscription '{}' has invalid {} '{}': {}",
            record.subscription_id,
            field,
            value,
            e
        )
    })
}

fn check_kind(record: &SubscriptionRecord, expected: SubscriptionKind) -> eyre::Result<()> {
    if record.kind != expected {
        return Err(eyre::eyre!(
            "Subscription '{}' is {}, expected {}",
            record.subscription_id,
            record.kind.as_str(),
            expected.as_str()
        ));
    }
    Ok(())
}

impl WatchKind for BalanceWatch {
    type Subscription = BalanceSubscription;

    const KIND: SubscriptionKind = SubscriptionKind::Balance;
    const EVENT: EventTopic = TRANSFER;
    const READS_BALANCE: bool = true;

    fn record_id(sub: &BalanceSubscription) -> i64 {
        sub.id
    }

    fn subscription_id(sub: &BalanceSubscription) -> &str {
        &sub.subscription_id
    }

    fn token(sub: &BalanceSubscription) -> Address {
        sub.token_address
    }

    fn same_target(a: &BalanceSubscription, b: &BalanceSubscription) -> bool {
        a.token_address == b.token_address && a.wallet_address == b.wallet_address
    }

    fn matches(sub: &BalanceSubscription, event: &TokenEvent) -> bool {
        sub.wallet_address == event.first || sub.wallet_address == event.second
    }

    fn reconcile(sub: &BalanceSubscription, _event: &TokenEvent) -> Reconcile {
        Reconcile::ReadBalance {
            token: sub.token_address,
            wallet: sub.wallet_address,
        }
    }

    fn from_record(record: &SubscriptionRecord) -> eyre::Result<BalanceSubscription> {
        check_kind(record, Self::KIND)?;
        Ok(BalanceSubscription {
            id: record.id,
            subscription_id: record.subscription_id.clone(),
            token_address: parse_address(record, "token address", Some(&record.token_address))?,
            wallet_address: parse_address(record, "wallet address", record.wallet_address.as_deref())?,
        })
    }
}

impl WatchKind for ApprovalWatch {
    type Subscription = ApprovalSubscription;

    const KIND: SubscriptionKind = SubscriptionKind::Approval;
    const EVENT: EventTopic = APPROVAL;
    const READS_BALANCE: bool = false;

    fn record_id(sub: &ApprovalSubscription) -> i64 {
        sub.id
    }

    fn subscription_id(sub: &ApprovalSubscription) -> &str {
        &sub.subscription_id
    }

    fn token(sub: &ApprovalSubscription) -> Address {
        sub.token_address
    }

    fn same_target(a: &ApprovalSubscription, b: &ApprovalSubscription) -> bool {
        a.token_address == b.token_address
            && a.owner_address == b.owner_address
            && a.spender_address == b.spender_address
    }

    fn matches(sub: &ApprovalSubscription, event: &TokenEvent) -> bool {
        sub.owner_address == event.first && sub.spender_address == event.second
    }

    fn reconcile(_sub: &ApprovalSubscription, event: &TokenEvent) -> Reconcile {
        Reconcile::FromEvent(event.value)
    }

    fn from_record(record: &SubscriptionRecord) -> eyre::Result<ApprovalSubscription> {
        check_kind(record, Self::KIND)?;
        Ok(ApprovalSubscription {
            id: record.id,
            subscription_id: record.subscription_id.clone(),
            token_address: parse_address(record, "token address", Some(&record.token_address))?,
            owner_address: parse_address(record, "owner address", record.owner_address.as_deref())?,
            spender_address: parse_address(
                record,
                "spender address",
                record.spender_address.as_deref(),
            )?,
        })
    }
}
