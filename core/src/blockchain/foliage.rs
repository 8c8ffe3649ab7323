use crate::blockchain::pool_target::PoolTarget;
use crate::blockchain::sized_bytes::{Bytes32, Bytes96};
use evg_macros::Streamable;
use evg_serialize::{hash_256, Streamable};
use serde::{Deserialize, Serialize};

/// The farmer-signed portion of an unfinished block.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct FoliageBlockData {
    pub unfinished_reward_block_hash: Bytes32,
    pub pool_target: PoolTarget,
    /// Absent when the plot is claimed by a pool contract rather than a
    /// pool key.
    pub pool_signature: Option<Bytes96>,
    pub farmer_reward_puzzle_hash: Bytes32,
    pub extension_data: Bytes32,
}

impl FoliageBlockData {
    pub fn get_hash(&self) -> Bytes32 {
        Bytes32::new(hash_256(self.to_bytes()))
    }
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Foliage {
    pub prev_block_hash: Bytes32,
    pub reward_block_hash: Bytes32,
    pub foliage_block_data: FoliageBlockData,
    pub foliage_block_data_signature: Bytes96,
    pub foliage_transaction_block_hash: Option<Bytes32>,
    pub foliage_transaction_block_signature: Option<Bytes96>,
}

impl Foliage {
    pub fn get_hash(&self) -> Bytes32 {
        Bytes32::new(hash_256(self.to_bytes()))
    }
}
