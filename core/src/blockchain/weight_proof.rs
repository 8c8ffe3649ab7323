use crate::blockchain::block_record::BlockRecord;
use crate::blockchain::sized_bytes::Bytes32;
use evg_macros::Streamable;
use serde::{Deserialize, Serialize};

/// One sub-epoch's contribution to a weight proof.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct SubEpochData {
    pub reward_chain_hash: Bytes32,
    pub num_blocks_overflow: u8,
    pub new_sub_slot_iters: Option<u64>,
    pub new_difficulty: Option<u64>,
}

/// Succinct certificate that a claimed peak's weight is consistent with the
/// chain of sub-epoch summaries, plus enough recent chain to anchor the tip.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct WeightProof {
    pub sub_epochs: Vec<SubEpochData>,
    pub recent_chain: Vec<BlockRecord>,
}

impl WeightProof {
    pub fn peak(&self) -> Option<&BlockRecord> {
        self.recent_chain.last()
    }

    pub fn claimed_weight(&self) -> u128 {
        self.peak().map_or(0, |record| record.weight)
    }

    pub fn claimed_height(&self) -> u32 {
        self.peak().map_or(0, |record| record.height)
    }
}
