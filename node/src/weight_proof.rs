use crate::blockchain::Blockchain;
use evg_core::blockchain::sub_epoch_summary::SubEpochSummary;
use evg_core::blockchain::weight_proof::{SubEpochData, WeightProof};
use evg_core::consensus::constants::ConsensusConstants;
use evg_core::errors::{ChainError, ErrorCode, ValidationError};
use evg_core::blockchain::sized_bytes::Bytes32;
use log::debug;
use std::sync::Arc;

/// What a verified weight proof vouches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedWeight {
    pub peak: Bytes32,
    pub height: u32,
    pub weight: u128,
}

/// Builds and verifies sub-epoch weight proofs for fast initial sync.
pub struct WeightProofHandler {
    constants: Arc<ConsensusConstants>,
}

impl WeightProofHandler {
    pub fn new(constants: Arc<ConsensusConstants>) -> Self {
        Self { constants }
    }

    /// Assembles a proof from the stored sub-epoch summaries and the recent
    /// main chain.
    pub fn create_weight_proof(&self, chain: &Blockchain) -> Result<WeightProof, ChainError> {
        let Some(peak) = chain.peak_record() else {
            return Ok(WeightProof {
                sub_epochs: Vec::new(),
                recent_chain: Vec::new(),
            });
        };
        let sub_epochs = chain
            .get_sub_epoch_summaries()?
            .iter()
            .map(|summary| SubEpochData {
                reward_chain_hash: summary.reward_chain_hash,
                num_blocks_overflow: summary.num_blocks_overflow,
                new_sub_slot_iters: summary.new_sub_slot_iters,
                new_difficulty: summary.new_difficulty,
            })
            .collect();
        let start = peak
            .height
            .saturating_sub(self.constants.weight_proof_recent_blocks - 1);
        let recent_chain = chain.headers_between(start, peak.height)?;
        Ok(WeightProof {
            sub_epochs,
            recent_chain,
        })
    }

    /// Checks a proof's internal consistency: the summary chain hashes
    /// link, the claimed weight covers the summarised sub-epochs under the
    /// declared difficulty schedule, and the recent chain is a properly
    /// linked suffix ending at the claimed peak.
    pub fn validate_weight_proof(
        &self,
        proof: &WeightProof,
    ) -> Result<VerifiedWeight, ValidationError> {
        let constants = &self.constants;
        let peak = proof.peak().ok_or_else(|| {
            ValidationError::new(ErrorCode::InvalidWeightProof, "empty recent chain")
        })?;

        // recent chain linkage
        for window in proof.recent_chain.windows(2) {
            let (prev, next) = (&window[0], &window[1]);
            if next.prev_hash != prev.header_hash {
                return Err(ValidationError::new(
                    ErrorCode::InvalidWeightProof,
                    format!("recent chain breaks at height {}", next.height),
                ));
            }
            if next.height != prev.height + 1 {
                return Err(ValidationError::new(
                    ErrorCode::InvalidWeightProof,
                    format!("recent chain skips from {} to {}", prev.height, next.height),
                ));
            }
            if next.weight <= prev.weight {
                return Err(ValidationError::new(
                    ErrorCode::InvalidWeightProof,
                    format!("weight not increasing at height {}", next.height),
                ));
            }
        }

        // sub-epoch summary chain and its difficulty schedule
        let mut running_hash = constants.genesis_challenge;
        let mut difficulty = constants.difficulty_starting;
        let mut summarised_weight: u128 = 0;
        for (index, data) in proof.sub_epochs.iter().enumerate() {
            let summary = SubEpochSummary {
                prev_subepoch_summary_hash: running_hash,
                reward_chain_hash: data.reward_chain_hash,
                num_blocks_overflow: data.num_blocks_overflow,
                new_difficulty: data.new_difficulty,
                new_sub_slot_iters: data.new_sub_slot_iters,
            };
            running_hash = summary.get_hash();
            summarised_weight +=
                u128::from(difficulty) * u128::from(constants.sub_epoch_blocks);
            if let Some(new_difficulty) = data.new_difficulty {
                let max_factor = u64::from(constants.difficulty_change_max_factor);
                if new_difficulty == 0
                    || new_difficulty > difficulty.saturating_mul(max_factor)
                    || new_difficulty < difficulty / max_factor
                {
                    return Err(ValidationError::new(
                        ErrorCode::InvalidWeightProof,
                        format!("sub epoch {index} difficulty jump"),
                    ));
                }
                difficulty = new_difficulty;
            }
            debug!("sub epoch {index} verified, running weight {summarised_weight}");
        }

        let full_sub_epochs = peak.height / constants.sub_epoch_blocks;
        if full_sub_epochs as usize != proof.sub_epochs.len() {
            return Err(ValidationError::new(
                ErrorCode::InvalidWeightProof,
                format!(
                    "{} sub epochs for height {}",
                    proof.sub_epochs.len(),
                    peak.height
                ),
            ));
        }
        if peak.weight < summarised_weight {
            return Err(ValidationError::new(
                ErrorCode::InvalidWeightProof,
                format!(
                    "claimed weight {} below summarised {summarised_weight}",
                    peak.weight
                ),
            ));
        }

        Ok(VerifiedWeight {
            peak: peak.header_hash,
            height: peak.height,
            weight: peak.weight,
        })
    }
}
