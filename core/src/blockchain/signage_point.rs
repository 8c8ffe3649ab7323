use crate::blockchain::vdf::{VdfInfo, VdfProof};
use evg_macros::Streamable;
use serde::{Deserialize, Serialize};

/// One of the checkpoints within a sub-slot that gate proof-of-space
/// submissions. Index 0 is the sub-slot start itself, which carries no
/// VDFs of its own.
#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Default)]
pub struct SignagePoint {
    pub cc_vdf: Option<VdfInfo>,
    pub cc_proof: Option<VdfProof>,
    pub rc_vdf: Option<VdfInfo>,
    pub rc_proof: Option<VdfProof>,
}
