use crate::blockchain::sized_bytes::Bytes32;
use crate::blockchain::vdf::{VdfInfo, VdfProof};
use evg_macros::Streamable;
use evg_serialize::{hash_256, Streamable};
use serde::{Deserialize, Serialize};

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct ChallengeChainSubSlot {
    pub challenge_chain_end_of_slot_vdf: VdfInfo,
    pub infused_challenge_chain_sub_slot_hash: Option<Bytes32>,
    /// Present in the first slot after a sub-epoch boundary.
    pub subepoch_summary_hash: Option<Bytes32>,
    pub new_sub_slot_iters: Option<u64>,
    pub new_difficulty: Option<u64>,
}

impl ChallengeChainSubSlot {
    pub fn get_hash(&self) -> Bytes32 {
        Bytes32::new(hash_256(self.to_bytes()))
    }
}

#[derive(Streamable, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct InfusedChallengeChainSubSlot {
    pub infused_challenge_chain_end_of_slot_vdf: VdfInfo,
}

impl InfusedChallengeChainSubSlot {
    pub fn get_hash(&self) -> Bytes32 {
        Bytes32::new(hash_256(self.to_bytes()))
    }
}

#[derive(Streamable, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct RewardChainSubSlot {
    pub end_of_slot_vdf: VdfInfo,
    pub challenge_chain_sub_slot_hash: Bytes32,
    pub infused_challenge_chain_sub_slot_hash: Option<Bytes32>,
    pub deficit: u8,
}

impl RewardChainSubSlot {
    pub fn get_hash(&self) -> Bytes32 {
        Bytes32::new(hash_256(self.to_bytes()))
    }
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct SubSlotProofs {
    pub challenge_chain_slot_proof: VdfProof,
    pub infused_challenge_chain_slot_proof: Option<VdfProof>,
    pub reward_chain_slot_proof: VdfProof,
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct EndOfSubSlotBundle {
    pub challenge_chain: ChallengeChainSubSlot,
    pub infused_challenge_chain: Option<InfusedChallengeChainSubSlot>,
    pub reward_chain: RewardChainSubSlot,
    pub proofs: SubSlotProofs,
}
