pub mod abi;
pub mod allocator;
pub mod batch;
mod connection;
pub mod decoder;
pub mod error;
pub mod kind;
pub mod membership;
pub mod transport;
pub mod types;
pub mod update;

pub use allocator::{BatchAllocator, ChainBatches};
pub use batch::{AddOutcome, BatchDeps, RemoveOutcome, SubscriptionBatch};
pub use error::{BatchError, UpdateError};
pub use kind::{ApprovalSubscription, ApprovalWatch, BalanceSubscription, BalanceWatch, WatchKind};
pub use types::{BatchEvent, BatchStatus, ConnectionState};
