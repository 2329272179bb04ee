use std::time::Duration;

/// Configuration errors raised synchronously by batch construction and
/// membership changes. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("batch {batch_index} on chain {chain_id} would hold {requested} subscriptions, cap is {cap}")]
    OverCapacity {
        chain_id: u64,
        batch_index: usize,
        requested: usize,
        cap: usize,
    },

    #[error("batch {batch_index} on chain {chain_id} is full ({cap} subscriptions)")]
    Full {
        chain_id: u64,
        batch_index: usize,
        cap: usize,
    },

    #[error("no WebSocket endpoint configured for chain {0}")]
    NoWsEndpoint(u64),
}

/// Failures of a single state update. Logged and counted, never propagated
/// to the log loop.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("no read client available for chain {0}")]
    NoReadClient(u64),

    #[error("balanceOf read timed out after {0:?}")]
    ReadTimeout(Duration),

    #[error("balanceOf read failed: {0}")]
    Read(eyre::Report),

    #[error("subscription store error: {0}")]
    Store(eyre::Report),
}
