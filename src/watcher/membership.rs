use alloy::primitives::Address;
use std::collections::HashMap;
use std::marker::PhantomData;

use super::kind::WatchKind;
use super::types::TokenEvent;

/// Result of inserting into a [`Membership`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    /// First subscription for this token; the log filter must grow.
    NewToken,
    /// Token already watched by another subscription.
    SharedToken,
    AlreadyPresent,
}

/// Token-indexed membership of one batch.
pub struct Membership<K: WatchKind> {
    by_token: HashMap<Address, Vec<K::Subscription>>,
    count: usize,
    _kind: PhantomData<K>,
}

impl<K: WatchKind> Membership<K> {
    pub fn new() -> Self {
        Self {
            by_token: HashMap::new(),
            count: 0,
            _kind: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn token_count(&self) -> usize {
        self.by_token.len()
    }

    /// Watched token addresses, sorted so filters are stable across rebuilds.
    pub fn tokens(&self) -> Vec<Address> {
        let mut tokens: Vec<Address> = self.by_token.keys().copied().collect();
        tokens.sort();
        tokens
    }

    pub fn contains(&self, sub: &K::Subscription) -> bool {
        self.by_token
            .get(&K::token(sub))
            .is_some_and(|subs| subs.iter().any(|s| K::same_target(s, sub)))
    }

    pub fn contains_id(&self, subscription_id: &str) -> bool {
        self.by_token
            .values()
            .flatten()
            .any(|s| K::subscription_id(s) == subscription_id)
    }

    pub fn insert(&mut self, sub: K::Subscription) -> Inserted {
        if self.contains(&sub) {
            return Inserted::AlreadyPresent;
        }

        let subs = self.by_token.entry(K::token(&sub)).or_default();
        let outcome = if subs.is_empty() {
            Inserted::NewToken
        } else {
            Inserted::SharedToken
        };
        subs.push(sub);
        self.count += 1;
        outcome
    }

    /// Remove by external subscription id. Returns the removed subscription
    /// and whether its token left the index.
    pub fn remove(&mut self, subscription_id: &str) -> Option<(K::Subscription, bool)> {
        let (token, position) = self.by_token.iter().find_map(|(token, subs)| {
            subs.iter()
                .position(|s| K::subscription_id(s) == subscription_id)
                .map(|position| (*token, position))
        })?;

        let subs = self.by_token.get_mut(&token)?;
        let removed = subs.remove(position);
        let token_dropped = subs.is_empty();
        if token_dropped {
            self.by_token.remove(&token);
        }
        self.count -= 1;
        Some((removed, token_dropped))
    }

    /// Subscriptions on the event's token whose counterparties match it.
    pub fn matching(&self, event: &TokenEvent) -> Vec<K::Subscription> {
        self.by_token
            .get(&event.token)
            .map(|subs| {
                subs.iter()
                    .filter(|s| K::matches(s, event))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<K: WatchKind> Default for Membership<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::kind::{BalanceSubscription, BalanceWatch};
    use alloy::primitives::{address, U256};

    const T1: Address = address!("00000000000000000000000000000000000000a1");
    const T2: Address = address!("00000000000000000000000000000000000000a2");
    const W1: Address = address!("00000000000000000000000000000000000000b1");
    const W2: Address = address!("00000000000000000000000000000000000000b2");

    fn sub(id: i64, token: Address, wallet: Address) -> BalanceSubscription {
        BalanceSubscription {
            id,
            subscription_id: format!("sub-{}", id),
            token_address: token,
            wallet_address: wallet,
        }
    }

    #[test]
    fn test_insert_tracks_tokens() {
        let mut m = Membership::<BalanceWatch>::new();
        assert_eq!(m.insert(sub(1, T1, W1)), Inserted::NewToken);
        assert_eq!(m.insert(sub(2, T1, W2)), Inserted::SharedToken);
        assert_eq!(m.insert(sub(3, T1, W1)), Inserted::AlreadyPresent);
        assert_eq!(m.insert(sub(4, T2, W1)), Inserted::NewToken);

        assert_eq!(m.len(), 3);
        assert_eq!(m.token_count(), 2);
        assert_eq!(m.tokens(), vec![T1, T2]);
    }

    #[test]
    fn test_remove_drops_empty_token() {
        let mut m = Membership::<BalanceWatch>::new();
        m.insert(sub(1, T1, W1));
        m.insert(sub(2, T1, W2));

        let (removed, dropped) = m.remove("sub-1").unwrap();
        assert_eq!(removed.id, 1);
        assert!(!dropped);

        let (_, dropped) = m.remove("sub-2").unwrap();
        assert!(dropped);
        assert!(m.is_empty());
        assert_eq!(m.token_count(), 0);
        assert!(m.remove("sub-2").is_none());
    }

    #[test]
    fn test_matching_filters_counterparty() {
        let mut m = Membership::<BalanceWatch>::new();
        m.insert(sub(1, T1, W1));
        m.insert(sub(2, T1, W2));

        let event = TokenEvent {
            token: T1,
            first: W1,
            second: address!("00000000000000000000000000000000000000ff"),
            value: U256::from(100u64),
            block_number: Some(50),
            tx_hash: None,
            log_index: None,
        };
        let matched = m.matching(&event);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, 1);

        let other_token = TokenEvent { token: T2, ..event };
        assert!(m.matching(&other_token).is_empty());
    }
}
