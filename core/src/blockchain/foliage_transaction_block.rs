use crate::blockchain::sized_bytes::Bytes32;
use evg_macros::Streamable;
use evg_serialize::{hash_256, Streamable};
use serde::{Deserialize, Serialize};

#[derive(Streamable, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct FoliageTransactionBlock {
    pub prev_transaction_block_hash: Bytes32,
    pub timestamp: u64,
    pub filter_hash: Bytes32,
    pub additions_root: Bytes32,
    pub removals_root: Bytes32,
    pub transactions_info_hash: Bytes32,
}

impl FoliageTransactionBlock {
    pub fn get_hash(&self) -> Bytes32 {
        Bytes32::new(hash_256(self.to_bytes()))
    }
}
