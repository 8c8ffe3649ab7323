//! Development backends for the three external collaborators. These let a
//! node run end-to-end on a private simulator network; they are never
//! acceptable on a real network, where the native proof-of-space, VDF and
//! script-evaluator implementations are linked in instead.

use crate::verifiers::{BlockProgramRunner, PosVerifier, VdfVerifier, Verifiers};
use evg_core::blockchain::coin_spend::CoinSpend;
use evg_core::blockchain::conditions::{BlockProgramOutput, SpendConditions};
use evg_core::blockchain::program::SerializedProgram;
use evg_core::blockchain::proof_of_space::ProofOfSpace;
use evg_core::blockchain::sized_bytes::{Bytes32, Bytes48};
use evg_core::blockchain::spend_bundle::SpendBundle;
use evg_core::blockchain::vdf::{VdfInfo, VdfProof};
use evg_core::errors::{ErrorCode, ValidationError};
use evg_macros::Streamable;
use evg_serialize::{hash_256, Streamable};
use std::sync::Arc;

/// Accepts every delay proof. The simulator network has no timelords
/// racing each other, so sequential-time guarantees are meaningless there.
pub struct SimulatorVdf;

impl VdfVerifier for SimulatorVdf {
    fn validate_vdf(&self, _info: &VdfInfo, _proof: &VdfProof) -> bool {
        true
    }
}

/// Derives a deterministic quality from the plot id and challenge, so a
/// simulated farmer wins with the same cadence on every machine.
pub struct SimulatorPos;

pub fn simulator_quality(plot_id: &Bytes32, challenge: &Bytes32) -> Bytes32 {
    let mut buf = Vec::with_capacity(64);
    buf.extend(plot_id.as_slice());
    buf.extend(challenge.as_slice());
    Bytes32::new(hash_256(buf))
}

impl PosVerifier for SimulatorPos {
    fn validate_proof(
        &self,
        _pos: &ProofOfSpace,
        plot_id: &Bytes32,
        challenge: &Bytes32,
    ) -> Option<Bytes32> {
        Some(simulator_quality(plot_id, challenge))
    }
}

/// The simulator's spend condition language: a solution is the canonical
/// encoding of this record, and a generator is the canonical encoding of
/// the spend list, exactly what block assembly emits.
#[derive(Streamable, Clone, Debug, Default)]
pub struct SimulatorSolution {
    pub created_coins: Vec<evg_core::blockchain::coin::Coin>,
    pub agg_sig_pairs: Vec<(Bytes48, Vec<u8>)>,
    pub assert_height_absolute: Option<u32>,
    pub assert_before_height_absolute: Option<u32>,
    pub cost: u64,
}

pub struct SimulatorRunner;

impl SimulatorRunner {
    fn spend_conditions(spend: &CoinSpend) -> Result<SpendConditions, ValidationError> {
        let solution = SimulatorSolution::from_bytes(spend.solution.as_slice()).map_err(|e| {
            ValidationError::new(ErrorCode::GeneratorRunError, format!("bad solution: {e}"))
        })?;
        Ok(SpendConditions {
            coin_id: spend.coin.coin_id(),
            puzzle_hash: spend.puzzle_reveal.hash(),
            created_coins: solution.created_coins,
            agg_sig_pairs: solution.agg_sig_pairs,
            assert_height_absolute: solution.assert_height_absolute,
            assert_seconds_absolute: None,
            assert_before_height_absolute: solution.assert_before_height_absolute,
            cost: solution.cost,
        })
    }

    fn run_spends(
        spends: &[CoinSpend],
        max_cost: u64,
    ) -> Result<BlockProgramOutput, ValidationError> {
        let mut output = BlockProgramOutput::default();
        for spend in spends {
            let conditions = Self::spend_conditions(spend)?;
            output.cost = output.cost.saturating_add(conditions.cost);
            output.spends.push(conditions);
        }
        if output.cost > max_cost {
            return Err(ValidationError::new(
                ErrorCode::CostTooHigh,
                format!("{} > {max_cost}", output.cost),
            ));
        }
        Ok(output)
    }
}

impl BlockProgramRunner for SimulatorRunner {
    fn run_block_program(
        &self,
        program: &SerializedProgram,
        _block_refs: &[SerializedProgram],
        max_cost: u64,
        _height: u32,
    ) -> Result<BlockProgramOutput, ValidationError> {
        let spends = Vec::<CoinSpend>::from_bytes(program.as_slice()).map_err(|e| {
            ValidationError::new(ErrorCode::GeneratorRunError, format!("bad generator: {e}"))
        })?;
        Self::run_spends(&spends, max_cost)
    }

    fn run_spend_bundle(
        &self,
        bundle: &SpendBundle,
        max_cost: u64,
        _height: u32,
    ) -> Result<BlockProgramOutput, ValidationError> {
        Self::run_spends(&bundle.coin_spends, max_cost)
    }
}

pub fn simulator_verifiers() -> Verifiers {
    Verifiers {
        program_runner: Arc::new(SimulatorRunner),
        pos: Arc::new(SimulatorPos),
        vdf: Arc::new(SimulatorVdf),
    }
}
