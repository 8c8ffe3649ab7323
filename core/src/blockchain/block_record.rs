use crate::blockchain::coin::Coin;
use crate::blockchain::sized_bytes::Bytes32;
use crate::blockchain::sub_epoch_summary::SubEpochSummary;
use evg_macros::Streamable;
use serde::{Deserialize, Serialize};

/// Everything the chain needs to remember about a committed block without
/// holding the block itself: fork choice, difficulty tracking, reward
/// claims and the challenge the next proof of space must answer. Records
/// are looked up by header hash; parents are referenced by hash, never by
/// an owning handle.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct BlockRecord {
    pub header_hash: Bytes32,
    pub prev_hash: Bytes32,
    pub height: u32,
    pub weight: u128,
    pub total_iters: u128,
    pub signage_point_index: u8,
    /// Challenge under which this block's proof of space was created.
    pub cc_challenge: Bytes32,
    pub sub_slot_iters: u64,
    pub required_iters: u64,
    /// Iterations from the start of its sub-slot to this block's infusion.
    pub ip_iters: u64,
    pub overflow: bool,
    pub pool_puzzle_hash: Bytes32,
    pub farmer_puzzle_hash: Bytes32,
    pub prev_transaction_block_hash: Option<Bytes32>,
    pub prev_transaction_block_height: u32,
    pub timestamp: Option<u64>,
    pub fees: Option<u64>,
    pub reward_claims_incorporated: Option<Vec<Coin>>,
    pub sub_epoch_summary_included: Option<SubEpochSummary>,
}

impl BlockRecord {
    pub fn is_transaction_block(&self) -> bool {
        self.timestamp.is_some()
    }
}
