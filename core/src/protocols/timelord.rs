use crate::blockchain::end_of_subslot::EndOfSubSlotBundle;
use crate::blockchain::reward_chain_block::RewardChainBlockUnfinished;
use crate::blockchain::sized_bytes::Bytes32;
use crate::blockchain::sub_epoch_summary::SubEpochSummary;
use crate::blockchain::vdf::{VdfInfo, VdfProof};
use evg_macros::Streamable;
use serde::{Deserialize, Serialize};

/// Tells the timelord where to point its VDFs after a peak change.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct NewPeakTimelord {
    pub reward_chain_tip: Bytes32,
    pub height: u32,
    pub weight: u128,
    pub difficulty: u64,
    pub sub_slot_iters: u64,
    pub sub_epoch_summary: Option<SubEpochSummary>,
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct NewUnfinishedBlockTimelord {
    pub reward_chain_block: RewardChainBlockUnfinished,
    pub difficulty: u64,
    pub sub_slot_iters: u64,
}

/// A finished infusion-point VDF, turning an unfinished block into a full
/// one.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct NewInfusionPointVdf {
    pub unfinished_reward_hash: Bytes32,
    pub challenge_chain_ip_vdf: VdfInfo,
    pub challenge_chain_ip_proof: VdfProof,
    pub reward_chain_ip_vdf: VdfInfo,
    pub reward_chain_ip_proof: VdfProof,
    pub infused_challenge_chain_ip_vdf: Option<VdfInfo>,
    pub infused_challenge_chain_ip_proof: Option<VdfProof>,
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct NewSignagePointVdf {
    pub index_from_challenge: u8,
    pub challenge_chain_sp_vdf: VdfInfo,
    pub challenge_chain_sp_proof: VdfProof,
    pub reward_chain_sp_vdf: VdfInfo,
    pub reward_chain_sp_proof: VdfProof,
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct NewEndOfSubSlotVdf {
    pub end_of_sub_slot_bundle: EndOfSubSlotBundle,
}
