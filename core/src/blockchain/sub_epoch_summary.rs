use crate::blockchain::sized_bytes::Bytes32;
use evg_macros::Streamable;
use evg_serialize::{hash_256, Streamable};
use serde::{Deserialize, Serialize};

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct SubEpochSummary {
    pub prev_subepoch_summary_hash: Bytes32,
    pub reward_chain_hash: Bytes32,
    pub num_blocks_overflow: u8,
    /// Set only at epoch boundaries, where the adjustment takes effect.
    pub new_difficulty: Option<u64>,
    pub new_sub_slot_iters: Option<u64>,
}

impl SubEpochSummary {
    pub fn get_hash(&self) -> Bytes32 {
        Bytes32::new(hash_256(self.to_bytes()))
    }
}
