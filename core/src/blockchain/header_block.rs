use crate::blockchain::end_of_subslot::EndOfSubSlotBundle;
use crate::blockchain::foliage::Foliage;
use crate::blockchain::foliage_transaction_block::FoliageTransactionBlock;
use crate::blockchain::full_block::FullBlock;
use crate::blockchain::reward_chain_block::RewardChainBlock;
use crate::blockchain::sized_bytes::Bytes32;
use crate::blockchain::transactions_info::TransactionsInfo;
use crate::blockchain::vdf::VdfProof;
use evg_macros::Streamable;
use evg_serialize::{hash_256, Streamable};
use serde::{Deserialize, Serialize};

/// A full block with the generator stripped, served to light clients.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct HeaderBlock {
    pub finished_sub_slots: Vec<EndOfSubSlotBundle>,
    pub reward_chain_block: RewardChainBlock,
    pub challenge_chain_sp_proof: Option<VdfProof>,
    pub challenge_chain_ip_proof: VdfProof,
    pub reward_chain_sp_proof: Option<VdfProof>,
    pub reward_chain_ip_proof: VdfProof,
    pub infused_challenge_chain_ip_proof: Option<VdfProof>,
    pub foliage: Foliage,
    pub foliage_transaction_block: Option<FoliageTransactionBlock>,
    pub transactions_filter: Vec<u8>,
    pub transactions_info: Option<TransactionsInfo>,
}

impl HeaderBlock {
    pub fn header_hash(&self) -> Bytes32 {
        let mut buf = self.foliage.to_bytes();
        self.reward_chain_block.stream(&mut buf);
        Bytes32::new(hash_256(buf))
    }

    pub fn height(&self) -> u32 {
        self.reward_chain_block.height
    }
}

impl From<&FullBlock> for HeaderBlock {
    fn from(block: &FullBlock) -> Self {
        HeaderBlock {
            finished_sub_slots: block.finished_sub_slots.clone(),
            reward_chain_block: block.reward_chain_block.clone(),
            challenge_chain_sp_proof: block.challenge_chain_sp_proof.clone(),
            challenge_chain_ip_proof: block.challenge_chain_ip_proof.clone(),
            reward_chain_sp_proof: block.reward_chain_sp_proof.clone(),
            reward_chain_ip_proof: block.reward_chain_ip_proof.clone(),
            infused_challenge_chain_ip_proof: block.infused_challenge_chain_ip_proof.clone(),
            foliage: block.foliage.clone(),
            foliage_transaction_block: block.foliage_transaction_block,
            transactions_filter: Vec::new(),
            transactions_info: block.transactions_info.clone(),
        }
    }
}
