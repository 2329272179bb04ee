use alloy::primitives::Address;
use alloy::rpc::types::Log;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::task::TaskTracker;

use crate::config::{SubscriptionSettings, MAX_ADDRESSES_PER_SUBSCRIPTION};
use crate::db::repository::SubscriptionStore;
use crate::rpc::balance::BalanceReader;
use crate::rpc::resolver::ChainClientResolver;

use super::connection::ConnectionSlot;
use super::decoder::{decode_token_log, DecodedLog};
use super::error::{BatchError, UpdateError};
use super::kind::WatchKind;
use super::membership::{Inserted, Membership};
use super::transport::LogTransport;
use super::types::{BatchEvent, BatchStatus, ConnectionState, TokenEvent, UpdateCounters};
use super::update::{apply_event, UpdateContext, UpdateOutcome};

/// Collaborators shared by every batch of a service.
#[derive(Clone)]
pub struct BatchDeps {
    pub store: Arc<dyn SubscriptionStore>,
    pub transport: Arc<dyn LogTransport>,
    pub resolver: Arc<dyn ChainClientResolver>,
    pub settings: SubscriptionSettings,
}

impl BatchDeps {
    /// Effective per-batch cap: the configured value, at least one and never
    /// above the protocol ceiling.
    pub fn cap(&self) -> usize {
        self.settings
            .max_addresses_per_batch
            .clamp(1, MAX_ADDRESSES_PER_SUBSCRIPTION)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added { reconnected: bool },
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    NotFound,
    Removed {
        token_dropped: bool,
        reconnected: bool,
        stopped: bool,
    },
}

/// One physical log subscription covering a bounded set of token contracts
/// on one chain, plus the subscriptions routed through it.
///
/// Cheap to clone; clones share the same batch.
pub struct SubscriptionBatch<K: WatchKind> {
    inner: Arc<BatchInner<K>>,
}

impl<K: WatchKind> Clone for SubscriptionBatch<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub(super) struct BatchInner<K: WatchKind> {
    pub(super) chain_id: u64,
    pub(super) ws_url: String,
    pub(super) batch_index: usize,
    pub(super) deps: BatchDeps,
    pub(super) members: Mutex<Membership<K>>,
    pub(super) connection: Mutex<ConnectionSlot>,
    /// Serializes start/stop/reconnect so only one connection task exists.
    pub(super) lifecycle: Mutex<()>,
    pub(super) running: AtomicBool,
    reader: RwLock<Option<Arc<dyn BalanceReader>>>,
    updates: TaskTracker,
    counters: UpdateCounters,
    events: broadcast::Sender<BatchEvent>,
}

impl<K: WatchKind> SubscriptionBatch<K> {
    /// Build a batch without connecting. Fails if `subscriptions` exceeds
    /// the address cap.
    pub fn new(
        chain_id: u64,
        ws_url: impl Into<String>,
        batch_index: usize,
        subscriptions: Vec<K::Subscription>,
        deps: BatchDeps,
    ) -> Result<Self, BatchError> {
        let cap = deps.cap();
        if subscriptions.len() > cap {
            return Err(BatchError::OverCapacity {
                chain_id,
                batch_index,
                requested: subscriptions.len(),
                cap,
            });
        }

        let mut members = Membership::new();
        for sub in subscriptions {
            members.insert(sub);
        }

        let (events, _) = broadcast::channel(deps.settings.event_buffer.max(1));

        Ok(Self {
            inner: Arc::new(BatchInner {
                chain_id,
                ws_url: ws_url.into(),
                batch_index,
                deps,
                members: Mutex::new(members),
                connection: Mutex::new(ConnectionSlot::default()),
                lifecycle: Mutex::new(()),
                running: AtomicBool::new(false),
                reader: RwLock::new(None),
                updates: TaskTracker::new(),
                counters: UpdateCounters::default(),
                events,
            }),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.inner.chain_id
    }

    pub fn batch_index(&self) -> usize {
        self.inner.batch_index
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub async fn subscription_count(&self) -> usize {
        self.inner.members.lock().await.len()
    }

    pub async fn tokens(&self) -> Vec<Address> {
        self.inner.members.lock().await.tokens()
    }

    pub async fn contains(&self, sub: &K::Subscription) -> bool {
        self.inner.members.lock().await.contains(sub)
    }

    pub async fn contains_id(&self, subscription_id: &str) -> bool {
        self.inner.members.lock().await.contains_id(subscription_id)
    }

    /// Whether a live connection task (and so a transport handle) is installed.
    pub async fn has_transport(&self) -> bool {
        self.inner
            .connection
            .lock()
            .await
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.events.subscribe()
    }

    /// Open the transport and install the log filter.
    ///
    /// Calling `start` on a running batch only logs a warning. A missing read
    /// client does not prevent starting; balance updates then fail one by one
    /// until the batch is restarted.
    pub async fn start(&self) {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;

        if inner.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                chain_id = inner.chain_id,
                batch = inner.batch_index,
                kind = K::KIND.as_str(),
                "Batch already running, ignoring start"
            );
            return;
        }

        if K::READS_BALANCE {
            match inner.deps.resolver.balance_reader(inner.chain_id) {
                Ok(reader) => *inner.reader.write().await = Some(reader),
                Err(e) => tracing::warn!(
                    chain_id = inner.chain_id,
                    batch = inner.batch_index,
                    error = %e,
                    "No read client for chain, balance updates will fail until restart"
                ),
            }
        }

        let (tokens, subscriptions) = {
            let members = inner.members.lock().await;
            (members.token_count(), members.len())
        };
        tracing::info!(
            chain_id = inner.chain_id,
            batch = inner.batch_index,
            kind = K::KIND.as_str(),
            tokens,
            subscriptions,
            "Starting subscription batch"
        );

        inner.open_connection().await;
    }

    /// Tear down the transport and stop accepting logs.
    ///
    /// Updates already spawned keep running and may still write; call
    /// [`drain`](Self::drain) to wait for them.
    pub async fn stop(&self) {
        self.inner.stop().await;
    }

    /// Replace the transport with a fresh one built from the current
    /// membership. Also restarts a batch whose reconnect budget ran out.
    pub async fn reconnect(&self) {
        self.inner.reconnect().await;
    }

    /// Wait until every spawned update task has finished.
    pub async fn drain(&self) {
        let updates = &self.inner.updates;
        updates.close();
        updates.wait().await;
        updates.reopen();
    }

    /// Add a subscription. Identical (token, counterparties) combinations
    /// are a no-op; a token new to the batch rebuilds the filter.
    pub async fn add_member(&self, sub: K::Subscription) -> Result<AddOutcome, BatchError> {
        let inner = &self.inner;
        let subscription_id = K::subscription_id(&sub).to_string();
        let token = K::token(&sub);

        let inserted = {
            let mut members = inner.members.lock().await;
            if members.contains(&sub) {
                tracing::debug!(
                    chain_id = inner.chain_id,
                    batch = inner.batch_index,
                    subscription_id = %subscription_id,
                    "Subscription already in batch"
                );
                return Ok(AddOutcome::AlreadyPresent);
            }
            let cap = inner.deps.cap();
            if members.len() >= cap {
                return Err(BatchError::Full {
                    chain_id: inner.chain_id,
                    batch_index: inner.batch_index,
                    cap,
                });
            }
            members.insert(sub)
        };

        let reconnect = inserted == Inserted::NewToken && inner.is_running();

        tracing::info!(
            chain_id = inner.chain_id,
            batch = inner.batch_index,
            kind = K::KIND.as_str(),
            subscription_id = %subscription_id,
            token = %format!("{:#x}", token),
            reconnect,
            "Subscription added to batch"
        );
        inner.emit(BatchEvent::MemberAdded {
            subscription_id,
            token,
            reconnect,
        });

        if reconnect {
            inner.reconnect().await;
        }
        Ok(AddOutcome::Added {
            reconnected: reconnect,
        })
    }

    /// Remove a subscription by its external id. Removing the last member
    /// stops the batch.
    pub async fn remove_member(&self, subscription_id: &str) -> RemoveOutcome {
        let inner = &self.inner;

        let (token_dropped, remaining_tokens, remaining) = {
            let mut members = inner.members.lock().await;
            let Some((_, token_dropped)) = members.remove(subscription_id) else {
                return RemoveOutcome::NotFound;
            };
            (token_dropped, members.token_count(), members.len())
        };

        tracing::info!(
            chain_id = inner.chain_id,
            batch = inner.batch_index,
            kind = K::KIND.as_str(),
            subscription_id,
            token_dropped,
            remaining,
            "Subscription removed from batch"
        );
        inner.emit(BatchEvent::MemberRemoved {
            subscription_id: subscription_id.to_string(),
            token_dropped,
        });

        if remaining == 0 {
            tracing::info!(
                chain_id = inner.chain_id,
                batch = inner.batch_index,
                "Batch is empty, stopping"
            );
            inner.stop().await;
            return RemoveOutcome::Removed {
                token_dropped,
                reconnected: false,
                stopped: true,
            };
        }

        let reconnect = token_dropped && remaining_tokens > 0 && inner.is_running();
        if reconnect {
            inner.reconnect().await;
        }
        RemoveOutcome::Removed {
            token_dropped,
            reconnected: reconnect,
            stopped: false,
        }
    }

    pub async fn status(&self) -> BatchStatus {
        let inner = &self.inner;
        let (token_count, subscription_count) = {
            let members = inner.members.lock().await;
            (members.token_count(), members.len())
        };
        let (connection, reconnect_attempts) = {
            let slot = inner.connection.lock().await;
            (slot.state, slot.attempts)
        };

        BatchStatus {
            kind: K::KIND,
            chain_id: inner.chain_id,
            batch_index: inner.batch_index,
            token_count,
            subscription_count,
            is_connected: connection == ConnectionState::Connected,
            is_running: inner.is_running(),
            connection,
            reconnect_attempts,
            updates: inner.counters.snapshot(),
        }
    }

    /// Route one delivered log. Returns the number of updates scheduled.
    pub async fn handle_log(&self, log: &Log) -> usize {
        self.inner.dispatch_log(log).await
    }
}

impl<K: WatchKind> BatchInner<K> {
    pub(super) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(super) fn emit(&self, event: BatchEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub(super) async fn stop(self: &Arc<Self>) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::debug!(
                chain_id = self.chain_id,
                batch = self.batch_index,
                "Batch already stopped"
            );
            return;
        }

        self.teardown_connection().await;
        tracing::info!(
            chain_id = self.chain_id,
            batch = self.batch_index,
            kind = K::KIND.as_str(),
            "Subscription batch stopped"
        );
        self.emit(BatchEvent::Stopped);
    }

    pub(super) async fn reconnect(self: &Arc<Self>) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.is_running() {
            tracing::debug!(
                chain_id = self.chain_id,
                batch = self.batch_index,
                "Batch not running, skipping reconnect"
            );
            return;
        }

        tracing::info!(
            chain_id = self.chain_id,
            batch = self.batch_index,
            kind = K::KIND.as_str(),
            "Rebuilding log subscription"
        );
        self.teardown_connection().await;
        self.connection.lock().await.attempts = 0;
        self.open_connection().await;
    }

    /// Decode a log and schedule one update task per matching subscription.
    pub(super) async fn dispatch_log(self: &Arc<Self>, log: &Log) -> usize {
        if !self.is_running() {
            return 0;
        }

        let event = match decode_token_log(log, K::EVENT.hash) {
            Some(DecodedLog::Event(event)) => event,
            Some(DecodedLog::Removed { token, tx_hash }) => {
                tracing::info!(
                    chain_id = self.chain_id,
                    batch = self.batch_index,
                    token = %format!("{:#x}", token),
                    tx_hash = ?tx_hash,
                    "Discarding log removed by reorg"
                );
                self.counters.record_reorg();
                self.emit(BatchEvent::ReorgDiscarded { token, tx_hash });
                return 0;
            }
            None => {
                tracing::debug!(
                    chain_id = self.chain_id,
                    batch = self.batch_index,
                    address = %format!("{:#x}", log.inner.address),
                    "Ignoring log that is not a {} event",
                    K::EVENT.name
                );
                return 0;
            }
        };

        let matches = self.members.lock().await.matching(&event);
        if matches.is_empty() {
            return 0;
        }

        let ctx = self.update_context().await;
        for sub in &matches {
            self.spawn_update(ctx.clone(), sub.clone(), event.clone());
        }
        matches.len()
    }

    async fn update_context(&self) -> UpdateContext {
        UpdateContext {
            chain_id: self.chain_id,
            store: self.deps.store.clone(),
            reader: self.reader.read().await.clone(),
            rpc_timeout: self.deps.settings.rpc_timeout(),
            pin_balance_reads: self.deps.settings.pin_balance_reads,
        }
    }

    fn spawn_update(self: &Arc<Self>, ctx: UpdateContext, sub: K::Subscription, event: TokenEvent) {
        let batch = self.clone();
        self.updates.spawn(async move {
            let outcome = apply_event::<K>(&ctx, &sub, &event).await;
            batch.record_outcome(&sub, &event, outcome);
        });
    }

    fn record_outcome(
        &self,
        sub: &K::Subscription,
        event: &TokenEvent,
        outcome: Result<UpdateOutcome, UpdateError>,
    ) {
        let subscription_id = K::subscription_id(sub).to_string();

        match outcome {
            Ok(UpdateOutcome::Applied(state)) => {
                self.counters.record_applied();
                let value = state.value().unwrap_or_default();
                tracing::info!(
                    chain_id = self.chain_id,
                    batch = self.batch_index,
                    kind = K::KIND.as_str(),
                    subscription_id = %subscription_id,
                    value = %value,
                    block = ?event.block_number,
                    log_index = ?event.log_index,
                    "Subscription state updated"
                );
                self.emit(BatchEvent::StateUpdated {
                    subscription_id,
                    value,
                    block_number: event.block_number,
                });
            }
            Ok(UpdateOutcome::Skipped(reason)) => {
                self.counters.record_skip(reason);
                tracing::warn!(
                    chain_id = self.chain_id,
                    batch = self.batch_index,
                    subscription_id = %subscription_id,
                    block = ?event.block_number,
                    log_index = ?event.log_index,
                    reason = reason.as_str(),
                    "Skipping subscription update"
                );
                self.emit(BatchEvent::UpdateSkipped {
                    subscription_id,
                    reason,
                });
            }
            Err(e) => {
                self.counters.record_failed();
                tracing::error!(
                    chain_id = self.chain_id,
                    batch = self.batch_index,
                    subscription_id = %subscription_id,
                    block = ?event.block_number,
                    log_index = ?event.log_index,
                    error = %e,
                    "Subscription update failed"
                );
                self.emit(BatchEvent::UpdateFailed {
                    subscription_id,
                    error: e.to_string(),
                });
            }
        }
    }
}
