use crate::blockchain::end_of_subslot::EndOfSubSlotBundle;
use crate::blockchain::foliage::Foliage;
use crate::blockchain::foliage_transaction_block::FoliageTransactionBlock;
use crate::blockchain::program::SerializedProgram;
use crate::blockchain::reward_chain_block::RewardChainBlock;
use crate::blockchain::sized_bytes::Bytes32;
use crate::blockchain::transactions_info::TransactionsInfo;
use crate::blockchain::vdf::VdfProof;
use evg_macros::Streamable;
use evg_serialize::{hash_256, Streamable};
use serde::{Deserialize, Serialize};

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct FullBlock {
    pub finished_sub_slots: Vec<EndOfSubSlotBundle>,
    pub reward_chain_block: RewardChainBlock,
    pub challenge_chain_sp_proof: Option<VdfProof>,
    pub challenge_chain_ip_proof: VdfProof,
    pub reward_chain_sp_proof: Option<VdfProof>,
    pub reward_chain_ip_proof: VdfProof,
    pub infused_challenge_chain_ip_proof: Option<VdfProof>,
    pub foliage: Foliage,
    pub foliage_transaction_block: Option<FoliageTransactionBlock>,
    pub transactions_info: Option<TransactionsInfo>,
    pub transactions_generator: Option<SerializedProgram>,
    pub transactions_generator_ref_list: Vec<u32>,
}

impl FullBlock {
    /// The header alone is sufficient for fork choice; its hash commits to
    /// the foliage (which commits to everything farmer-signed) and the
    /// reward chain block (which commits to the proofs).
    pub fn header_hash(&self) -> Bytes32 {
        let mut buf = self.foliage.to_bytes();
        self.reward_chain_block.stream(&mut buf);
        Bytes32::new(hash_256(buf))
    }

    pub fn height(&self) -> u32 {
        self.reward_chain_block.height
    }

    pub fn weight(&self) -> u128 {
        self.reward_chain_block.weight
    }

    pub fn total_iters(&self) -> u128 {
        self.reward_chain_block.total_iters
    }

    pub fn prev_header_hash(&self) -> Bytes32 {
        self.foliage.prev_block_hash
    }

    pub fn is_transaction_block(&self) -> bool {
        self.foliage_transaction_block.is_some()
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.foliage_transaction_block.as_ref().map(|ftb| ftb.timestamp)
    }
}
