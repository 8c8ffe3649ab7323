use crate::blockchain::end_of_subslot::EndOfSubSlotBundle;
use crate::blockchain::foliage::Foliage;
use crate::blockchain::foliage_transaction_block::FoliageTransactionBlock;
use crate::blockchain::program::SerializedProgram;
use crate::blockchain::reward_chain_block::RewardChainBlockUnfinished;
use crate::blockchain::sized_bytes::Bytes32;
use crate::blockchain::transactions_info::TransactionsInfo;
use crate::blockchain::vdf::VdfProof;
use evg_macros::Streamable;
use serde::{Deserialize, Serialize};

/// A block awaiting infusion by the timelord. Distinct foliage variants of
/// the same reward chain block may circulate until one is infused.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct UnfinishedBlock {
    pub finished_sub_slots: Vec<EndOfSubSlotBundle>,
    pub reward_chain_block: RewardChainBlockUnfinished,
    pub challenge_chain_sp_proof: Option<VdfProof>,
    pub reward_chain_sp_proof: Option<VdfProof>,
    pub foliage: Foliage,
    pub foliage_transaction_block: Option<FoliageTransactionBlock>,
    pub transactions_info: Option<TransactionsInfo>,
    pub transactions_generator: Option<SerializedProgram>,
    pub transactions_generator_ref_list: Vec<u32>,
}

impl UnfinishedBlock {
    pub fn reward_hash(&self) -> Bytes32 {
        self.reward_chain_block.get_hash()
    }

    pub fn foliage_hash(&self) -> Bytes32 {
        self.foliage.get_hash()
    }
}
