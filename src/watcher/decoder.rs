use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;

use super::types::TokenEvent;

/// Outcome of decoding a delivered log.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodedLog {
    /// The node flagged the log as invalidated by a reorg.
    Removed { token: Address, tx_hash: Option<B256> },
    Event(TokenEvent),
}

/// Decode a log carrying the event identified by `topic0`.
///
/// Reorg-removed logs are reported before any shape checks so they are
/// always discarded. Returns `None` if:
/// - topic0 is not the expected event signature
/// - the log doesn't carry exactly two indexed addresses
/// - the data is shorter than one word
pub fn decode_token_log(log: &Log, topic0: B256) -> Option<DecodedLog> {
    let inner = &log.inner;

    if log.removed {
        return Some(DecodedLog::Removed {
            token: inner.address,
            tx_hash: log.transaction_hash,
        });
    }

    // We need exactly 3 topics (signature + two indexed addresses)
    let topics = inner.data.topics();
    if topics.len() != 3 || topics[0] != topic0 {
        return None;
    }

    let data = inner.data.data.as_ref();
    if data.len() < 32 {
        return None;
    }

    Some(DecodedLog::Event(TokenEvent {
        token: inner.address,
        first: Address::from_word(topics[1]),
        second: Address::from_word(topics[2]),
        value: U256::from_be_slice(&data[..32]),
        block_number: log.block_number,
        tx_hash: log.transaction_hash,
        log_index: log.log_index,
    }))
}
