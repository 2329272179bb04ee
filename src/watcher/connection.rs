use alloy::rpc::types::Filter;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::batch::BatchInner;
use super::kind::WatchKind;
use super::transport::LogSubscription;
use super::types::{BatchEvent, ConnectionState};

/// The batch's single connection task and its reconnect bookkeeping.
#[derive(Default)]
pub(super) struct ConnectionSlot {
    pub(super) state: ConnectionState,
    /// Consecutive failed reconnects since the last successful connect.
    pub(super) attempts: u32,
    pub(super) cancel: Option<CancellationToken>,
    pub(super) task: Option<JoinHandle<()>>,
}

impl<K: WatchKind> BatchInner<K> {
    /// Subscribe with the current token set and hand the stream to a new
    /// connection task. The batch reports connected as soon as this returns
    /// with a live stream; a failed first subscribe is treated like a dropped
    /// connection. Callers hold the lifecycle lock.
    pub(super) async fn open_connection(self: &Arc<Self>) {
        if self.members.lock().await.is_empty() {
            tracing::debug!(
                chain_id = self.chain_id,
                batch = self.batch_index,
                "No tokens to watch, not opening a subscription"
            );
            return;
        }

        self.set_state(ConnectionState::Connecting).await;
        let initial = match self.subscribe().await {
            Ok(sub) => {
                self.set_connected().await;
                Some(sub)
            }
            Err(e) => {
                tracing::warn!(
                    chain_id = self.chain_id,
                    batch = self.batch_index,
                    error = %e,
                    "Log subscription failed"
                );
                self.set_state(ConnectionState::Disconnected).await;
                self.emit(BatchEvent::Disconnected {
                    reason: e.to_string(),
                });
                None
            }
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.clone().run_connection(initial, cancel.clone()));

        let mut slot = self.connection.lock().await;
        slot.cancel = Some(cancel);
        slot.task = Some(task);
    }

    /// Cancel the connection task and wait for it so two filters never
    /// overlap. Callers hold the lifecycle lock.
    pub(super) async fn teardown_connection(&self) {
        let (cancel, task) = {
            let mut slot = self.connection.lock().await;
            (slot.cancel.take(), slot.task.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(
                    chain_id = self.chain_id,
                    batch = self.batch_index,
                    error = %e,
                    "Connection task ended abnormally"
                );
            }
        }
        self.set_state(ConnectionState::Disconnected).await;
    }

    async fn subscribe(&self) -> eyre::Result<LogSubscription> {
        let tokens = self.members.lock().await.tokens();
        if tokens.is_empty() {
            return Err(eyre::eyre!("no token addresses to subscribe to"));
        }

        let filter = Filter::new()
            .address(tokens)
            .event_signature(K::EVENT.hash);
        self.deps.transport.subscribe(&self.ws_url, filter).await
    }

    pub(super) async fn set_state(&self, state: ConnectionState) {
        self.connection.lock().await.state = state;
    }

    async fn set_connected(&self) {
        {
            let mut slot = self.connection.lock().await;
            slot.state = ConnectionState::Connected;
            slot.attempts = 0;
        }
        tracing::info!(
            chain_id = self.chain_id,
            batch = self.batch_index,
            kind = K::KIND.as_str(),
            "Log subscription active"
        );
        self.emit(BatchEvent::Connected);
    }

    /// Connection state machine:
    /// Connected -> Disconnected (stream ended) -> Reconnecting{n} -> Connecting -> ...
    /// with a `n × base` delay, giving up after `max_reconnect_attempts`.
    async fn run_connection(
        self: Arc<Self>,
        initial: Option<LogSubscription>,
        cancel: CancellationToken,
    ) {
        let mut current = initial;

        loop {
            if let Some(sub) = current.take() {
                if !self.pump(sub, &cancel).await {
                    return;
                }

                tracing::warn!(
                    chain_id = self.chain_id,
                    batch = self.batch_index,
                    "Log stream ended"
                );
                self.set_state(ConnectionState::Disconnected).await;
                self.emit(BatchEvent::Disconnected {
                    reason: "log stream ended".to_string(),
                });
            }

            if cancel.is_cancelled() || !self.is_running() {
                return;
            }

            let max_attempts = self.deps.settings.max_reconnect_attempts;
            let attempt = {
                let mut slot = self.connection.lock().await;
                slot.attempts += 1;
                slot.attempts
            };
            if attempt > max_attempts {
                tracing::error!(
                    chain_id = self.chain_id,
                    batch = self.batch_index,
                    kind = K::KIND.as_str(),
                    max_attempts,
                    "Reconnect attempts exhausted, batch stays disconnected until restarted"
                );
                {
                    // Nothing is left to cancel; dropping our own handle detaches it.
                    let mut slot = self.connection.lock().await;
                    slot.attempts = max_attempts;
                    slot.state = ConnectionState::Disconnected;
                    slot.cancel = None;
                    slot.task = None;
                }
                self.emit(BatchEvent::ReconnectExhausted {
                    attempts: max_attempts,
                });
                return;
            }

            let delay = self.deps.settings.reconnect_delay(attempt);
            self.set_state(ConnectionState::Reconnecting { attempt }).await;
            tracing::warn!(
                chain_id = self.chain_id,
                batch = self.batch_index,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            self.emit(BatchEvent::ReconnectScheduled { attempt, delay });

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            self.set_state(ConnectionState::Connecting).await;
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.subscribe() => result,
            };

            match result {
                Ok(sub) => {
                    self.set_connected().await;
                    current = Some(sub);
                }
                Err(e) => {
                    tracing::warn!(
                        chain_id = self.chain_id,
                        batch = self.batch_index,
                        attempt,
                        error = %e,
                        "Reconnect failed"
                    );
                    self.set_state(ConnectionState::Disconnected).await;
                    self.emit(BatchEvent::Disconnected {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Feed logs to the dispatcher. Returns `true` if the stream ended and
    /// `false` if the task was cancelled.
    async fn pump(self: &Arc<Self>, mut sub: LogSubscription, cancel: &CancellationToken) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                next = sub.stream.next() => match next {
                    Some(log) => {
                        self.dispatch_log(&log).await;
                    }
                    None => return true,
                },
            }
        }
    }
}
