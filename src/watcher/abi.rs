use alloy::primitives::B256;
use alloy::sol;
use alloy::sol_types::SolEvent;

// Event ABIs for the two watched shapes. Both carry two indexed addresses
// and one non-indexed uint256, so they share a decoder.
sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
    event Approval(address indexed owner, address indexed spender, uint256 value);
}

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
    }
}

/// Static description of a watched event: name, canonical signature and
/// topic0 hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTopic {
    pub name: &'static str,
    pub signature: &'static str,
    pub hash: B256,
}

pub const TRANSFER: EventTopic = EventTopic {
    name: "Transfer",
    signature: <Transfer as SolEvent>::SIGNATURE,
    hash: <Transfer as SolEvent>::SIGNATURE_HASH,
};

pub const APPROVAL: EventTopic = EventTopic {
    name: "Approval",
    signature: <Approval as SolEvent>::SIGNATURE,
    hash: <Approval as SolEvent>::SIGNATURE_HASH,
};

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{b256, keccak256};

    #[test]
    fn test_signature_hashes() {
        assert_eq!(TRANSFER.signature, "Transfer(address,address,uint256)");
        assert_eq!(APPROVAL.signature, "Approval(address,address,uint256)");
        assert_eq!(TRANSFER.hash, keccak256(TRANSFER.signature));
        assert_eq!(
            TRANSFER.hash,
            b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")
        );
        assert_eq!(
            APPROVAL.hash,
            b256!("8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925")
        );
    }
}
