use evg_core::blockchain::conditions::BlockProgramOutput;
use evg_core::blockchain::program::SerializedProgram;
use evg_core::blockchain::proof_of_space::ProofOfSpace;
use evg_core::blockchain::sized_bytes::Bytes32;
use evg_core::blockchain::spend_bundle::SpendBundle;
use evg_core::blockchain::vdf::{VdfInfo, VdfProof};
use evg_core::errors::ValidationError;
use std::sync::Arc;

/// Contract with the external deterministic script evaluator. Both entry
/// points must agree: running the generator produced by block assembly
/// yields the union of the conditions of the bundles it was built from.
///
/// Implementations must be pure: same inputs, same output, no side
/// effects. Cost accounting is the evaluator's; exceeding `max_cost` is an
/// error, not a truncation.
pub trait BlockProgramRunner: Send + Sync {
    fn run_block_program(
        &self,
        program: &SerializedProgram,
        block_refs: &[SerializedProgram],
        max_cost: u64,
        height: u32,
    ) -> Result<BlockProgramOutput, ValidationError>;

    fn run_spend_bundle(
        &self,
        bundle: &SpendBundle,
        max_cost: u64,
        height: u32,
    ) -> Result<BlockProgramOutput, ValidationError>;
}

/// Contract with the external proof-of-space verifier. Returns the quality
/// string when the proof is valid for the challenge, `None` otherwise.
pub trait PosVerifier: Send + Sync {
    fn validate_proof(&self, pos: &ProofOfSpace, plot_id: &Bytes32, challenge: &Bytes32)
        -> Option<Bytes32>;
}

/// Contract with the external VDF verifier.
pub trait VdfVerifier: Send + Sync {
    fn validate_vdf(&self, info: &VdfInfo, proof: &VdfProof) -> bool;
}

/// The three external collaborators bundled for the validator.
#[derive(Clone)]
pub struct Verifiers {
    pub program_runner: Arc<dyn BlockProgramRunner>,
    pub pos: Arc<dyn PosVerifier>,
    pub vdf: Arc<dyn VdfVerifier>,
}
